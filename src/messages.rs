use std::path::PathBuf;

use actix::{Message, Recipient};
use bytes::Bytes;
use tracing::Span;

use crate::{
    models::{PlayerStats, Port, Sector},
    proxy::ProxyError,
    script::{ScriptError, ScriptStatus},
    tui::TuiEvent,
};

/// Dial the game server and bring up a session. Fails if a session is
/// already up.
#[derive(Message)]
#[rtype(result = "Result<(), ProxyError>")]
pub struct Connect {
    pub address: String,
    pub tui: Recipient<TuiEvent>,
    pub span: Span,
}

/// Tear the current session down. A no-op while disconnected.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub span: Span,
}

#[derive(Message)]
#[rtype(result = "bool")]
pub struct IsConnected;

/// Disconnect and stop accepting further work.
#[derive(Message)]
#[rtype(result = "()")]
pub struct Shutdown {
    pub span: Span,
}

/// Operator keystrokes; routed through outbound script triggers and the
/// game detector before reaching the wire. Silently dropped while
/// disconnected.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct SendData {
    pub data: Bytes,
    pub span: Span,
}

/// Bytes for the wire that bypass every trigger hook (menu-originated
/// commands).
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct SendToServer {
    pub data: Bytes,
    pub span: Span,
}

/// Synthetic inbound data: fans out to the parser, detector, scripts and
/// terminal exactly like server bytes, but never reaches the server.
#[derive(Message, Clone)]
#[rtype(result = "()")]
pub struct SendToTui {
    pub data: Bytes,
    pub span: Span,
}

/// Compile and start the script at `path`.
#[derive(Message)]
#[rtype(result = "Result<(), ScriptError>")]
pub struct LoadScript {
    pub path: PathBuf,
    pub span: Span,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct StopAllScripts {
    pub span: Span,
}

#[derive(Message)]
#[rtype(result = "ScriptStatus")]
pub struct GetScriptStatus {
    pub span: Span,
}

/// The sector the player is currently in; 0 before the first prompt or
/// while disconnected.
#[derive(Message)]
#[rtype(result = "i64")]
pub struct GetCurrentSector;

#[derive(Message)]
#[rtype(result = "Option<Sector>")]
pub struct GetSectorInfo {
    pub number: i64,
    pub span: Span,
}

#[derive(Message)]
#[rtype(result = "Option<Port>")]
pub struct GetPortInfo {
    pub number: i64,
    pub span: Span,
}

/// The live player record as the parser currently sees it.
#[derive(Message)]
#[rtype(result = "Option<PlayerStats>")]
pub struct GetPlayerStats;

/// The player record as persisted in the active game database.
#[derive(Message)]
#[rtype(result = "Option<PlayerStats>")]
pub struct GetPlayerInfo {
    pub span: Span,
}

/// Proxy → session: close the transport and stop.
#[derive(Message)]
#[rtype(result = "()")]
pub struct CloseSession {
    pub span: Span,
}

/// Session → proxy: the session (and everything it owned) is gone.
#[derive(Message)]
#[rtype(result = "()")]
pub struct SessionClosed {
    pub span: Span,
}
