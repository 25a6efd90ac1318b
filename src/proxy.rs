use std::path::PathBuf;

use actix::{
    Actor, ActorFutureExt, Addr, AsyncContext, Context, Handler, MessageResult, Recipient,
    ResponseActFuture, ResponseFuture, WrapFuture,
};
use futures::future;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, instrument, Span};

use crate::{
    ansi::AnsiStripper,
    config::Config,
    detector::GameDetector,
    messages::{
        CloseSession, Connect, Disconnect, GetCurrentSector, GetPlayerInfo, GetPlayerStats,
        GetPortInfo, GetScriptStatus, GetSectorInfo, IsConnected, LoadScript, SendData,
        SendToServer, SendToTui, SessionClosed, Shutdown, StopAllScripts,
    },
    models::{PlayerStats, Port, Sector},
    parser::GameParser,
    script::{ScriptError, ScriptManager, ScriptStatus},
    session::{write_loop, Session},
    telnet::{self, TelnetCodec, TransportError},
    tui::{ConnectionStatus, TuiEvent},
};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    InvalidState,
    #[error("bad address `{0}`")]
    BadAddress(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

enum ProxyState {
    Disconnected,
    Connecting,
    Connected(Addr<Session>),
}

/// The orchestrator: owns the connection state machine and dispatches every
/// ProxyAPI operation to it. All send-type operations while disconnected
/// are silent successes.
pub struct Proxy {
    config: Config,
    initial_script: Option<PathBuf>,
    state: ProxyState,
    tui: Option<Recipient<TuiEvent>>,
    address: String,
}

impl Proxy {
    #[must_use]
    pub fn new(config: Config, initial_script: Option<PathBuf>) -> Self {
        Self {
            config,
            initial_script,
            state: ProxyState::Disconnected,
            tui: None,
            address: String::new(),
        }
    }

    fn emit(&self, event: TuiEvent) {
        if let Some(tui) = &self.tui {
            tui.do_send(event);
        }
    }

    fn emit_status(&self, status: ConnectionStatus) {
        self.emit(TuiEvent::ConnectionStatusChanged {
            status,
            address: self.address.clone(),
        });
    }

    fn session(&self) -> Option<Addr<Session>> {
        match &self.state {
            ProxyState::Connected(addr) => Some(addr.clone()),
            _ => None,
        }
    }
}

impl Actor for Proxy {
    type Context = Context<Self>;
}

fn parse_address(address: &str) -> Result<(String, u16), ProxyError> {
    let (host, port) = address
        .rsplit_once(':')
        .map_or((address, "23"), |(host, port)| (host, port));

    if host.is_empty() {
        return Err(ProxyError::BadAddress(address.to_string()));
    }

    let port = port
        .parse()
        .map_err(|_| ProxyError::BadAddress(address.to_string()))?;

    Ok((host.to_string(), port))
}

impl Handler<Connect> for Proxy {
    type Result = ResponseActFuture<Self, Result<(), ProxyError>>;

    #[instrument(parent = &msg.span, skip_all, fields(address = %msg.address))]
    fn handle(&mut self, msg: Connect, _ctx: &mut Self::Context) -> Self::Result {
        if !matches!(self.state, ProxyState::Disconnected) {
            return Box::pin(actix::fut::ready(Err(ProxyError::AlreadyConnected)));
        }

        let (host, port) = match parse_address(&msg.address) {
            Ok(parts) => parts,
            Err(error) => return Box::pin(actix::fut::ready(Err(error))),
        };

        self.tui = Some(msg.tui);
        self.address = msg.address;
        self.state = ProxyState::Connecting;
        self.emit_status(ConnectionStatus::Connecting);

        let dial_timeout = self.config.dial_timeout;
        let dial = {
            let host = host.clone();
            async move { telnet::connect(&host, port, dial_timeout).await }
        };

        Box::pin(dial.into_actor(self).map(move |res, this, ctx| {
            if !matches!(this.state, ProxyState::Connecting) {
                // disconnected while dialing; drop the stream on the floor
                debug!("connect aborted");
                return Ok(());
            }

            match res {
                Ok(stream) => {
                    let session = this.start_session(stream, host, port, ctx);
                    this.state = ProxyState::Connected(session.clone());
                    info!("connected");
                    this.emit_status(ConnectionStatus::Connected);

                    if let Some(path) = this.initial_script.clone() {
                        session.do_send(LoadScript {
                            path,
                            span: Span::current(),
                        });
                    }

                    Ok(())
                }
                Err(error) => {
                    this.state = ProxyState::Disconnected;
                    this.emit(TuiEvent::ConnectionError {
                        message: error.to_string(),
                    });
                    this.emit_status(ConnectionStatus::Disconnected);
                    Err(error.into())
                }
            }
        }))
    }
}

impl Proxy {
    fn start_session(
        &self,
        stream: tokio::net::TcpStream,
        host: String,
        port: u16,
        ctx: &mut Context<Self>,
    ) -> Addr<Session> {
        let config = self.config.clone();
        let tui = self.tui.clone().expect("set during connect");
        let proxy = ctx.address().recipient();
        let address = self.address.clone();
        let span = Span::current();

        let (read, write) = tokio::io::split(stream);

        Session::create(move |sctx| {
            sctx.add_stream(FramedRead::new(
                read,
                TelnetCodec::new(config.terminal_type.clone()),
            ));

            let (outbound, rx) = mpsc::channel(config.outbound_queue_depth);
            actix_rt::spawn(write_loop(
                write,
                rx,
                sctx.address(),
                config.terminal_type.clone(),
            ));

            Session {
                host,
                port,
                address,
                tui,
                proxy,
                outbound,
                parser: GameParser::new(),
                detector: GameDetector::new(config.detection_timeout),
                scripts: ScriptManager::new(),
                parser_stripper: AnsiStripper::new(),
                detector_stripper: AnsiStripper::new(),
                script_stripper: AnsiStripper::new(),
                script_line_carry: String::new(),
                store: None,
                store_info: None,
                data_dir: config.data_dir,
                closing: false,
                span,
            }
        })
    }
}

/// Installs the Disconnected state first; closing the session's transport
/// then unblocks its inbound worker, and `SessionClosed` arrives once the
/// teardown finishes.
impl Handler<Disconnect> for Proxy {
    type Result = ();

    #[instrument(parent = &msg.span, skip_all)]
    fn handle(&mut self, msg: Disconnect, _ctx: &mut Self::Context) -> Self::Result {
        match std::mem::replace(&mut self.state, ProxyState::Disconnected) {
            ProxyState::Connected(session) => {
                session.do_send(CloseSession {
                    span: Span::current(),
                });
            }
            ProxyState::Connecting => debug!("disconnect while connecting"),
            ProxyState::Disconnected => {}
        }
    }
}

impl Handler<SessionClosed> for Proxy {
    type Result = ();

    #[instrument(parent = &msg.span, skip_all)]
    fn handle(&mut self, msg: SessionClosed, _ctx: &mut Self::Context) -> Self::Result {
        self.state = ProxyState::Disconnected;
        self.emit_status(ConnectionStatus::Disconnected);
    }
}

impl Handler<IsConnected> for Proxy {
    type Result = MessageResult<IsConnected>;

    fn handle(&mut self, _msg: IsConnected, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(matches!(self.state, ProxyState::Connected(_)))
    }
}

impl Handler<Shutdown> for Proxy {
    type Result = ();

    #[instrument(parent = &msg.span, skip_all)]
    fn handle(&mut self, msg: Shutdown, ctx: &mut Self::Context) -> Self::Result {
        info!("shutting down");
        ctx.notify(Disconnect {
            span: Span::current(),
        });
    }
}

impl Handler<SendData> for Proxy {
    type Result = ();

    fn handle(&mut self, msg: SendData, _ctx: &mut Self::Context) -> Self::Result {
        match self.session() {
            Some(session) => session.do_send(msg),
            // disconnected sends succeed silently
            None => debug!("dropping input while disconnected"),
        }
    }
}

impl Handler<SendToServer> for Proxy {
    type Result = ();

    fn handle(&mut self, msg: SendToServer, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(session) = self.session() {
            session.do_send(msg);
        }
    }
}

impl Handler<SendToTui> for Proxy {
    type Result = ();

    fn handle(&mut self, msg: SendToTui, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(session) = self.session() {
            session.do_send(msg);
        }
    }
}

impl Handler<LoadScript> for Proxy {
    type Result = ResponseFuture<Result<(), ScriptError>>;

    fn handle(&mut self, msg: LoadScript, _ctx: &mut Self::Context) -> Self::Result {
        let session = self.session();
        Box::pin(async move {
            let Some(session) = session else {
                return Err(ScriptError::LoadFailed("not connected".to_string()));
            };

            session
                .send(msg)
                .await
                .map_err(|e| ScriptError::LoadFailed(e.to_string()))?
        })
    }
}

impl Handler<StopAllScripts> for Proxy {
    type Result = ();

    fn handle(&mut self, msg: StopAllScripts, _ctx: &mut Self::Context) -> Self::Result {
        if let Some(session) = self.session() {
            session.do_send(msg);
        }
    }
}

impl Handler<GetScriptStatus> for Proxy {
    type Result = ResponseFuture<ScriptStatus>;

    fn handle(&mut self, msg: GetScriptStatus, _ctx: &mut Self::Context) -> Self::Result {
        let Some(session) = self.session() else {
            return Box::pin(future::ready(ScriptStatus::default()));
        };

        Box::pin(async move { session.send(msg).await.unwrap_or_default() })
    }
}

impl Handler<GetCurrentSector> for Proxy {
    type Result = ResponseFuture<i64>;

    fn handle(&mut self, msg: GetCurrentSector, _ctx: &mut Self::Context) -> Self::Result {
        let Some(session) = self.session() else {
            return Box::pin(future::ready(0));
        };

        Box::pin(async move { session.send(msg).await.unwrap_or(0) })
    }
}

impl Handler<GetSectorInfo> for Proxy {
    type Result = ResponseFuture<Option<Sector>>;

    fn handle(&mut self, msg: GetSectorInfo, _ctx: &mut Self::Context) -> Self::Result {
        let Some(session) = self.session() else {
            return Box::pin(future::ready(None));
        };

        Box::pin(async move { session.send(msg).await.unwrap_or(None) })
    }
}

impl Handler<GetPortInfo> for Proxy {
    type Result = ResponseFuture<Option<Port>>;

    fn handle(&mut self, msg: GetPortInfo, _ctx: &mut Self::Context) -> Self::Result {
        let Some(session) = self.session() else {
            return Box::pin(future::ready(None));
        };

        Box::pin(async move { session.send(msg).await.unwrap_or(None) })
    }
}

impl Handler<GetPlayerInfo> for Proxy {
    type Result = ResponseFuture<Option<PlayerStats>>;

    fn handle(&mut self, msg: GetPlayerInfo, _ctx: &mut Self::Context) -> Self::Result {
        let Some(session) = self.session() else {
            return Box::pin(future::ready(None));
        };

        Box::pin(async move { session.send(msg).await.unwrap_or(None) })
    }
}

impl Handler<GetPlayerStats> for Proxy {
    type Result = ResponseFuture<Option<PlayerStats>>;

    fn handle(&mut self, msg: GetPlayerStats, _ctx: &mut Self::Context) -> Self::Result {
        let Some(session) = self.session() else {
            return Box::pin(future::ready(None));
        };

        Box::pin(async move { session.send(msg).await.unwrap_or(None) })
    }
}

#[cfg(test)]
mod test {
    use super::parse_address;

    #[test]
    fn addresses_parse_with_and_without_port() {
        assert_eq!(
            parse_address("games.example.com:2002").unwrap(),
            ("games.example.com".to_string(), 2002)
        );
        assert_eq!(
            parse_address("localhost").unwrap(),
            ("localhost".to_string(), 23)
        );
        assert!(parse_address(":2002").is_err());
        assert!(parse_address("host:notaport").is_err());
    }
}
