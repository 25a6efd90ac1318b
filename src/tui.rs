use std::io::{self, Write};

use actix::{Actor, Context, Handler, Message};
use bytes::Bytes;
use tracing::{error, info, warn};

use crate::{
    database::DatabaseInfo,
    models::{PlayerStats, Port, Sector, Trader},
    script::ScriptStatus,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Fire-and-forget event stream from the proxy to whatever front-end is
/// attached. Every dispatch is a `do_send`, so the proxy never blocks on
/// the display.
#[derive(Message, Clone, Debug)]
#[rtype(result = "()")]
pub enum TuiEvent {
    ConnectionStatusChanged {
        status: ConnectionStatus,
        address: String,
    },
    ConnectionError {
        message: String,
    },
    /// Raw inbound bytes, ANSI colours intact.
    Data(Bytes),
    ScriptStatusChanged(ScriptStatus),
    ScriptError {
        script: String,
        message: String,
    },
    DatabaseStateChanged {
        info: DatabaseInfo,
        is_loaded: bool,
    },
    /// The player's own ship moved.
    CurrentSectorChanged(Sector),
    /// Sector data changed without the player moving (probes, passive
    /// updates).
    SectorUpdated(Sector),
    PortUpdated {
        sector: i64,
        port: Port,
    },
    TraderDataUpdated {
        sector: i64,
        traders: Vec<Trader>,
    },
    PlayerStatsUpdated(PlayerStats),
}

/// Reference front-end: renders the raw stream to stdout and logs the
/// structured events. Real widget layers subscribe to the same mailbox.
#[derive(Default)]
pub struct TerminalUi;

impl TerminalUi {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Actor for TerminalUi {
    type Context = Context<Self>;
}

impl Handler<TuiEvent> for TerminalUi {
    type Result = ();

    fn handle(&mut self, msg: TuiEvent, _ctx: &mut Self::Context) -> Self::Result {
        match msg {
            TuiEvent::Data(bytes) => {
                let mut stdout = io::stdout().lock();
                if stdout.write_all(&bytes).and_then(|()| stdout.flush()).is_err() {
                    warn!("failed to write to terminal");
                }
            }
            TuiEvent::ConnectionStatusChanged { status, address } => {
                info!(?status, %address, "connection status changed");
            }
            TuiEvent::ConnectionError { message } => {
                error!(%message, "connection error");
            }
            TuiEvent::ScriptStatusChanged(status) => {
                info!(
                    active = status.active_count,
                    total = status.total_count,
                    names = ?status.script_names,
                    "script status changed"
                );
            }
            TuiEvent::ScriptError { script, message } => {
                error!(%script, %message, "script error");
            }
            TuiEvent::DatabaseStateChanged { info, is_loaded } => {
                info!(
                    game = %info.game_name,
                    db = %info.db_name,
                    is_loaded,
                    "database state changed"
                );
            }
            TuiEvent::CurrentSectorChanged(sector) => {
                info!(sector = sector.number, "current sector changed");
            }
            TuiEvent::SectorUpdated(sector) => {
                info!(sector = sector.number, "sector data updated");
            }
            TuiEvent::PortUpdated { sector, port } => {
                info!(sector, port = %port.name, "port updated");
            }
            TuiEvent::TraderDataUpdated { sector, traders } => {
                info!(sector, count = traders.len(), "trader data updated");
            }
            TuiEvent::PlayerStatsUpdated(stats) => {
                info!(
                    sector = stats.current_sector,
                    credits = stats.credits,
                    turns = stats.turns,
                    "player stats updated"
                );
            }
        }
    }
}
