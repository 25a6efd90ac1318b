use std::{
    io,
    path::PathBuf,
    time::{Duration, Instant},
};

use actix::{
    fut::wrap_future, Actor, ActorContext, ActorFutureExt, Addr, AsyncContext, Context, Handler,
    MessageResult, Recipient, ResponseFuture, StreamHandler,
};
use bytes::Bytes;
use futures::future;
use tokio::{
    io::{AsyncWriteExt, WriteHalf},
    net::TcpStream,
    sync::mpsc,
};
use tokio_util::codec::Encoder;
use tracing::{debug, error, info, instrument, warn, Span};

use crate::{
    ansi::AnsiStripper,
    database::{
        events::{
            CloseStore, LoadAllScriptVariables, LoadSector, MergeDensity, MergePort,
            MergeWarpLink, SavePlayerStats, SaveSector, SaveScriptVariable,
        },
        DatabaseInfo, GameStore, StoreError,
    },
    detector::{DetectorAction, GameDetector},
    messages::{
        CloseSession, GetCurrentSector, GetPlayerInfo, GetPlayerStats, GetPortInfo,
        GetScriptStatus, GetSectorInfo, LoadScript, SendData, SendToServer, SendToTui,
        SessionClosed, StopAllScripts,
    },
    models::Sector,
    parser::{GameParser, ParserEvent},
    script::{value::Value, ScriptEffect, ScriptError, ScriptManager, EVENT_CONNECTION_LOST},
    telnet::{TelnetCodec, TelnetItem, TransportError},
    tui::TuiEvent,
};

/// How often due delay triggers are checked.
const TRIGGER_TICK: Duration = Duration::from_millis(100);

/// How often detector inactivity is checked.
const DETECTOR_TICK: Duration = Duration::from_secs(1);

/// Bound on the script feed's partial-line carry.
const SCRIPT_LINE_CARRY_MAX: usize = 1024;

/// One item for the outbound writer task.
#[derive(Debug)]
pub enum WriterItem {
    /// In-band bytes; 0xFF is escaped on the way out.
    Data(Bytes),
    /// Pre-formed telnet negotiation bytes, written verbatim.
    Raw(Bytes),
}

/// The connected state: owns the framed reader (via the actor's stream),
/// the outbound writer channel, and the parser/detector/script trio fed by
/// the inbound fan-out.
///
/// Fan-out is atomic per chunk: each consumer sees chunk N before any
/// consumer sees chunk N+1.
pub struct Session {
    pub host: String,
    pub port: u16,
    pub address: String,
    pub tui: Recipient<TuiEvent>,
    pub proxy: Recipient<SessionClosed>,
    pub outbound: mpsc::Sender<WriterItem>,
    pub parser: GameParser,
    pub detector: GameDetector,
    pub scripts: ScriptManager,
    pub parser_stripper: AnsiStripper,
    pub detector_stripper: AnsiStripper,
    pub script_stripper: AnsiStripper,
    pub script_line_carry: String,
    pub store: Option<Addr<GameStore>>,
    pub store_info: Option<DatabaseInfo>,
    pub data_dir: PathBuf,
    pub closing: bool,
    pub span: Span,
}

impl Actor for Session {
    type Context = Context<Self>;

    #[instrument(parent = &self.span, skip_all)]
    fn started(&mut self, ctx: &mut Self::Context) {
        info!(address = %self.address, "session started");

        self.scripts.set_global("connected", Value::Num(1.0));
        self.scripts.set_global("currentsector", Value::Num(0.0));
        self.scripts
            .set_global("game", Value::Str(String::new()));

        ctx.run_interval(TRIGGER_TICK, |this, ctx| {
            let effects = this.scripts.tick(Instant::now());
            this.apply_script_effects(effects, ctx);
        });

        ctx.run_interval(DETECTOR_TICK, |this, ctx| {
            let actions = this.detector.check_timeout(Instant::now());
            this.apply_detector_actions(actions, ctx);
        });
    }

    /// Winds the session down in order: scripts get their connection-lost
    /// event, then stop; the detector closes any open store; finally the
    /// proxy is told we're gone (which is what flips the public state to
    /// Disconnected).
    #[instrument(parent = &self.span, skip_all)]
    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.closing = true;

        let effects = self.scripts.fire_event(EVENT_CONNECTION_LOST);
        self.apply_script_effects(effects, ctx);

        let effects = self.scripts.stop_all();
        self.apply_script_effects(effects, ctx);

        let actions = self.detector.shutdown();
        self.apply_detector_actions(actions, ctx);

        if let Some(store) = self.store.take() {
            store.do_send(CloseStore {
                span: Span::current(),
            });
        }

        info!("session stopped");
        self.proxy.do_send(SessionClosed {
            span: Span::current(),
        });
    }
}

/// Drains the outbound channel onto the write half of the socket. Script
/// and operator data is IAC-escaped; negotiation replies go out verbatim.
pub async fn write_loop(
    mut write: WriteHalf<TcpStream>,
    mut rx: mpsc::Receiver<WriterItem>,
    session: Addr<Session>,
    terminal_type: String,
) {
    let mut codec = TelnetCodec::new(terminal_type);
    let mut buffer = bytes::BytesMut::new();

    if let Err(error) = write.write_all(&TelnetCodec::initial_negotiation()).await {
        session.do_send(WriterFailed(error));
        return;
    }

    while let Some(item) = rx.recv().await {
        let result = match item {
            WriterItem::Raw(bytes) => write.write_all(&bytes).await,
            WriterItem::Data(bytes) => {
                buffer.clear();
                match codec.encode(bytes, &mut buffer) {
                    Ok(()) => write.write_all(&buffer).await,
                    Err(error) => Err(error),
                }
            }
        };

        if let Err(error) = result {
            session.do_send(WriterFailed(error));
            break;
        }
    }

    let _ = write.shutdown().await;
}

/// Sent by the writer task when the socket rejects a write.
#[derive(actix::Message)]
#[rtype(result = "()")]
struct WriterFailed(io::Error);

impl Handler<WriterFailed> for Session {
    type Result = ();

    #[instrument(parent = &self.span, skip_all)]
    fn handle(&mut self, msg: WriterFailed, ctx: &mut Self::Context) -> Self::Result {
        let error = TransportError::from_stream_error(msg.0);
        error!(%error, "failed to write to server");

        self.tui.do_send(TuiEvent::ConnectionError {
            message: error.to_string(),
        });
        ctx.stop();
    }
}

/// The inbound half: every decoded telnet item from the server arrives
/// here.
impl StreamHandler<Result<TelnetItem, io::Error>> for Session {
    #[instrument(parent = &self.span, skip_all)]
    fn handle(&mut self, item: Result<TelnetItem, io::Error>, ctx: &mut Self::Context) {
        match item {
            Ok(TelnetItem::Data(bytes)) => self.dispatch_inbound(&bytes, ctx),
            Ok(TelnetItem::Reply(bytes)) => {
                if self.outbound.try_send(WriterItem::Raw(bytes)).is_err() {
                    warn!("dropping telnet negotiation reply, outbound queue unavailable");
                }
            }
            Err(error) => {
                let error = TransportError::from_stream_error(error);
                error!(%error, "failed to read from server");

                self.tui.do_send(TuiEvent::ConnectionError {
                    message: error.to_string(),
                });
                ctx.stop();
            }
        }
    }

    #[instrument(parent = &self.span, skip_all)]
    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!("server closed the connection");
        self.tui.do_send(TuiEvent::ConnectionError {
            message: TransportError::Eof.to_string(),
        });
        ctx.stop();
    }
}

impl Session {
    /// Fans one inbound chunk out to the parser, detector, script feed and
    /// terminal, in that order.
    fn dispatch_inbound(&mut self, bytes: &Bytes, ctx: &mut Context<Self>) {
        let parser_text = self.parser_stripper.feed(bytes);
        if !parser_text.is_empty() {
            let events = self.parser.feed(&parser_text);
            self.apply_parser_events(events, ctx);
        }

        let detector_text = self.detector_stripper.feed(bytes);
        if !detector_text.is_empty() {
            let actions = self.detector.process_text(&detector_text);
            self.apply_detector_actions(actions, ctx);
        }

        let script_text = self.script_stripper.feed(bytes);
        if !script_text.is_empty() {
            let mut effects = self.scripts.feed_text(&script_text);

            self.script_line_carry.push_str(&script_text);
            while let Some(pos) = self.script_line_carry.find('\n') {
                let line = self.script_line_carry[..pos]
                    .trim_end_matches('\r')
                    .to_string();
                self.script_line_carry.drain(..=pos);
                effects.extend(self.scripts.feed_inbound_line(&line));
            }
            if self.script_line_carry.len() > SCRIPT_LINE_CARRY_MAX {
                let drop = self.script_line_carry.len() - SCRIPT_LINE_CARRY_MAX / 2;
                self.script_line_carry.drain(..drop);
            }

            self.apply_script_effects(effects, ctx);
        }

        self.tui.do_send(TuiEvent::Data(bytes.clone()));
    }

    fn apply_parser_events(&mut self, events: Vec<ParserEvent>, ctx: &mut Context<Self>) {
        for event in events {
            match event {
                ParserEvent::SectorComplete { sector, movement } => {
                    self.set_sector_global();

                    if !sector.traders.is_empty() {
                        self.tui.do_send(TuiEvent::TraderDataUpdated {
                            sector: sector.number,
                            traders: sector.traders.clone(),
                        });
                    }

                    if let Some(store) = self.store.clone() {
                        let fut = store.send(SaveSector {
                            sector: sector.clone(),
                            span: Span::current(),
                        });
                        ctx.spawn(wrap_future(fut).map(|res, _: &mut Self, _| {
                            log_store_write(res);
                        }));
                    }

                    self.tui.do_send(if movement {
                        TuiEvent::CurrentSectorChanged(sector)
                    } else {
                        TuiEvent::SectorUpdated(sector)
                    });
                }
                ParserEvent::CursorMoved(number) => {
                    self.set_sector_global();

                    if let Some(store) = self.store.clone() {
                        let fut = store.send(LoadSector {
                            number,
                            span: Span::current(),
                        });
                        ctx.spawn(wrap_future(fut).map(move |res, this: &mut Self, _| {
                            let sector = match res {
                                Ok(Ok(Some(sector))) => sector,
                                _ => Sector::new(number),
                            };
                            this.tui.do_send(TuiEvent::CurrentSectorChanged(sector));
                        }));
                    } else {
                        self.tui
                            .do_send(TuiEvent::CurrentSectorChanged(Sector::new(number)));
                    }
                }
                ParserEvent::PortUpdated { sector, port } => {
                    if let Some(store) = self.store.clone() {
                        let fut = store.send(MergePort {
                            number: sector,
                            port: port.clone(),
                            span: Span::current(),
                        });
                        ctx.spawn(wrap_future(fut).map(move |res, this: &mut Self, _| {
                            let port = match res {
                                Ok(Ok(updated)) => updated.port.unwrap_or(port),
                                other => {
                                    log_store_write(other.map(|r| r.map(|_| ())));
                                    port
                                }
                            };
                            this.tui.do_send(TuiEvent::PortUpdated { sector, port });
                        }));
                    } else {
                        self.tui.do_send(TuiEvent::PortUpdated { sector, port });
                    }
                }
                ParserEvent::DensityReading {
                    sector,
                    density,
                    warp_count: _,
                    nav_haz,
                    anomaly,
                } => {
                    if let Some(store) = self.store.clone() {
                        let fut = store.send(MergeDensity {
                            number: sector,
                            density,
                            nav_haz,
                            anomaly,
                            span: Span::current(),
                        });
                        ctx.spawn(wrap_future(fut).map(|res, this: &mut Self, _| match res {
                            Ok(Ok(sector)) => {
                                this.tui.do_send(TuiEvent::SectorUpdated(sector));
                            }
                            other => log_store_write(other.map(|r| r.map(|_| ()))),
                        }));
                    } else {
                        let mut synthetic = Sector::new(sector);
                        synthetic.density = density;
                        synthetic.nav_haz = nav_haz;
                        synthetic.anomaly = anomaly;
                        self.tui.do_send(TuiEvent::SectorUpdated(synthetic));
                    }
                }
                ParserEvent::WarpLink { from, to } => {
                    if let Some(store) = self.store.clone() {
                        let fut = store.send(MergeWarpLink {
                            from,
                            to,
                            span: Span::current(),
                        });
                        ctx.spawn(wrap_future(fut).map(|res, this: &mut Self, _| match res {
                            Ok(Ok(sector)) => {
                                this.tui.do_send(TuiEvent::SectorUpdated(sector));
                            }
                            other => log_store_write(other.map(|r| r.map(|_| ()))),
                        }));
                    }
                }
                ParserEvent::StatsUpdated(stats) => {
                    if let Some(store) = self.store.clone() {
                        let fut = store.send(SavePlayerStats {
                            stats: stats.clone(),
                            span: Span::current(),
                        });
                        ctx.spawn(wrap_future(fut).map(|res, _: &mut Self, _| {
                            log_store_write(res);
                        }));
                    }

                    self.tui.do_send(TuiEvent::PlayerStatsUpdated(stats));
                }
            }
        }
    }

    fn set_sector_global(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        self.scripts.set_global(
            "currentsector",
            Value::Num(self.parser.current_sector() as f64),
        );
    }

    fn apply_detector_actions(&mut self, actions: Vec<DetectorAction>, ctx: &mut Context<Self>) {
        for action in actions {
            match action {
                DetectorAction::LoadDatabase { game_name } => self.open_store(game_name, ctx),
                DetectorAction::UnloadDatabase => self.close_store(),
            }
        }
    }

    /// Opens the per-game store and swaps it in. The swap is atomic from
    /// the actor's point of view: the new store is installed before the old
    /// one is closed, and both happen within one actor turn.
    fn open_store(&mut self, game_name: String, ctx: &mut Context<Self>) {
        let data_dir = self.data_dir.clone();
        let host = self.host.clone();
        let port = self.port;

        let fut = async move { GameStore::open(&data_dir, &host, port, &game_name).await };

        ctx.spawn(
            wrap_future(fut).map(|res, this: &mut Self, ctx| match res {
                Ok(store) => {
                    let info = store.info.clone();
                    let addr = store.start();

                    let old = this.store.replace(addr.clone());
                    this.store_info = Some(info.clone());
                    if let Some(old) = old {
                        old.do_send(CloseStore {
                            span: Span::current(),
                        });
                    }

                    this.scripts
                        .set_global("game", Value::Str(info.game_name.clone()));
                    this.tui.do_send(TuiEvent::DatabaseStateChanged {
                        info,
                        is_loaded: true,
                    });

                    // bring the persisted script variables into the cache
                    let fut = addr.send(LoadAllScriptVariables {
                        span: Span::current(),
                    });
                    ctx.spawn(wrap_future(fut).map(|res, this: &mut Self, _| match res {
                        Ok(Ok(rows)) => this.scripts.prime_variables(rows),
                        Ok(Err(error)) => warn!(%error, "failed to load script variables"),
                        Err(error) => warn!(%error, "store unavailable"),
                    }));
                }
                Err(error) => {
                    error!(%error, "failed to open game database");
                }
            }),
        );
    }

    fn close_store(&mut self) {
        if let Some(store) = self.store.take() {
            store.do_send(CloseStore {
                span: Span::current(),
            });
        }

        self.scripts.clear_variables();
        self.scripts.set_global("game", Value::Str(String::new()));

        if let Some(info) = self.store_info.take() {
            self.tui.do_send(TuiEvent::DatabaseStateChanged {
                info,
                is_loaded: false,
            });
        }
    }

    fn apply_script_effects(&mut self, effects: Vec<ScriptEffect>, ctx: &mut Context<Self>) {
        for effect in effects {
            match effect {
                ScriptEffect::SendToServer(text) => self.send_script_output(&text, ctx),
                ScriptEffect::SendToTui(text) => {
                    self.tui.do_send(TuiEvent::Data(Bytes::from(text)));
                }
                ScriptEffect::PersistVariable { name, value } => {
                    if let Some(store) = self.store.clone() {
                        let fut = store.send(SaveScriptVariable {
                            name,
                            value,
                            span: Span::current(),
                        });
                        ctx.spawn(wrap_future(fut).map(|res, _: &mut Self, _| {
                            log_store_write(res);
                        }));
                    }
                }
                ScriptEffect::Error { script, message } => {
                    self.tui.do_send(TuiEvent::ScriptError { script, message });
                }
                ScriptEffect::StatusChanged => {
                    self.tui
                        .do_send(TuiEvent::ScriptStatusChanged(self.scripts.status()));
                }
            }
        }
    }

    /// Script output counts as operator input for game detection, but does
    /// not loop back through outbound text triggers. When the bounded
    /// outbound queue is full the script side waits for space instead of
    /// dropping.
    fn send_script_output(&mut self, text: &str, ctx: &mut Context<Self>) {
        if self.closing {
            warn!("script send while disconnecting, dropping");
            return;
        }

        let actions = self.detector.process_user_input(text);
        self.apply_detector_actions(actions, ctx);

        let item = WriterItem::Data(Bytes::from(text.to_string()));
        if let Err(mpsc::error::TrySendError::Full(item)) = self.outbound.try_send(item) {
            let outbound = self.outbound.clone();
            // backpressure: hold the actor until the writer catches up
            ctx.wait(wrap_future(async move {
                let _ = outbound.send(item).await;
            }));
        }
    }
}

/// Operator keystrokes: outbound triggers, then game detection, then the
/// wire. Dropped (with a warning) when the outbound queue is full -- the
/// operator can retype, the UI must not stall.
impl Handler<SendData> for Session {
    type Result = ();

    #[instrument(parent = &msg.span, skip_all)]
    fn handle(&mut self, msg: SendData, ctx: &mut Self::Context) -> Self::Result {
        let text = String::from_utf8_lossy(&msg.data).into_owned();

        let effects = self.scripts.feed_outbound(&text);
        self.apply_script_effects(effects, ctx);

        let actions = self.detector.process_user_input(&text);
        self.apply_detector_actions(actions, ctx);

        if self.outbound.try_send(WriterItem::Data(msg.data)).is_err() {
            warn!("outbound queue full, dropping operator input");
        }
    }
}

/// Bypass path for menu-originated commands: no triggers, no detection.
impl Handler<SendToServer> for Session {
    type Result = ();

    #[instrument(parent = &msg.span, skip_all)]
    fn handle(&mut self, msg: SendToServer, _ctx: &mut Self::Context) -> Self::Result {
        if self.outbound.try_send(WriterItem::Data(msg.data)).is_err() {
            warn!("outbound queue full, dropping direct send");
        }
    }
}

/// Synthetic inbound data: fans out exactly like server bytes.
impl Handler<SendToTui> for Session {
    type Result = ();

    #[instrument(parent = &msg.span, skip_all)]
    fn handle(&mut self, msg: SendToTui, ctx: &mut Self::Context) -> Self::Result {
        self.dispatch_inbound(&msg.data, ctx);
    }
}

impl Handler<LoadScript> for Session {
    type Result = Result<(), ScriptError>;

    #[instrument(parent = &msg.span, skip_all, fields(path = %msg.path.display()))]
    fn handle(&mut self, msg: LoadScript, ctx: &mut Self::Context) -> Self::Result {
        let name = msg
            .path
            .file_stem()
            .map_or_else(|| "script".to_string(), |s| s.to_string_lossy().into_owned());

        let source = std::fs::read_to_string(&msg.path)
            .map_err(|e| ScriptError::LoadFailed(e.to_string()))?;

        match self.scripts.load(&name, &source) {
            Ok(effects) => {
                self.apply_script_effects(effects, ctx);
                Ok(())
            }
            Err(error) => {
                self.tui.do_send(TuiEvent::ScriptError {
                    script: name,
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }
}

impl Handler<StopAllScripts> for Session {
    type Result = ();

    #[instrument(parent = &msg.span, skip_all)]
    fn handle(&mut self, msg: StopAllScripts, ctx: &mut Self::Context) -> Self::Result {
        let effects = self.scripts.stop_all();
        self.apply_script_effects(effects, ctx);
    }
}

impl Handler<GetScriptStatus> for Session {
    type Result = MessageResult<GetScriptStatus>;

    fn handle(&mut self, _msg: GetScriptStatus, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.scripts.status())
    }
}

impl Handler<GetCurrentSector> for Session {
    type Result = MessageResult<GetCurrentSector>;

    fn handle(&mut self, _msg: GetCurrentSector, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.parser.current_sector())
    }
}

impl Handler<GetSectorInfo> for Session {
    type Result = ResponseFuture<Option<Sector>>;

    #[instrument(parent = &msg.span, skip_all, fields(sector = msg.number))]
    fn handle(&mut self, msg: GetSectorInfo, _ctx: &mut Self::Context) -> Self::Result {
        let Some(store) = self.store.clone() else {
            return Box::pin(future::ready(None));
        };

        Box::pin(async move {
            store
                .send(LoadSector {
                    number: msg.number,
                    span: Span::current(),
                })
                .await
                .ok()
                .and_then(Result::ok)
                .flatten()
        })
    }
}

impl Handler<GetPortInfo> for Session {
    type Result = ResponseFuture<Option<crate::models::Port>>;

    #[instrument(parent = &msg.span, skip_all, fields(sector = msg.number))]
    fn handle(&mut self, msg: GetPortInfo, _ctx: &mut Self::Context) -> Self::Result {
        let Some(store) = self.store.clone() else {
            return Box::pin(future::ready(None));
        };

        Box::pin(async move {
            store
                .send(crate::database::events::LoadPort {
                    number: msg.number,
                    span: Span::current(),
                })
                .await
                .ok()
                .and_then(Result::ok)
                .flatten()
        })
    }
}

impl Handler<GetPlayerInfo> for Session {
    type Result = ResponseFuture<Option<crate::models::PlayerStats>>;

    #[instrument(parent = &msg.span, skip_all)]
    fn handle(&mut self, msg: GetPlayerInfo, _ctx: &mut Self::Context) -> Self::Result {
        let Some(store) = self.store.clone() else {
            return Box::pin(future::ready(None));
        };

        Box::pin(async move {
            store
                .send(crate::database::events::LoadPlayerStats {
                    span: Span::current(),
                })
                .await
                .ok()
                .and_then(Result::ok)
                .flatten()
        })
    }
}

impl Handler<GetPlayerStats> for Session {
    type Result = MessageResult<GetPlayerStats>;

    fn handle(&mut self, _msg: GetPlayerStats, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(Some(self.parser.stats().clone()))
    }
}

impl Handler<CloseSession> for Session {
    type Result = ();

    #[instrument(parent = &msg.span, skip_all)]
    fn handle(&mut self, msg: CloseSession, ctx: &mut Self::Context) -> Self::Result {
        debug!("closing session");
        ctx.stop();
    }
}

fn log_store_write<T>(result: Result<Result<T, StoreError>, actix::MailboxError>) {
    match result {
        Ok(Ok(_)) => {}
        Ok(Err(error)) => warn!(%error, "store write failed"),
        Err(error) => warn!(%error, "store unavailable"),
    }
}
