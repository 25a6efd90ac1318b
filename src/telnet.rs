use std::{io, net::IpAddr, time::Duration};

use bytes::{BufMut, Bytes, BytesMut};
use hickory_resolver::TokioAsyncResolver;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;

pub const OPT_ECHO: u8 = 1;
pub const OPT_SUPPRESS_GO_AHEAD: u8 = 3;
pub const OPT_TERMINAL_TYPE: u8 = 24;
pub const OPT_NAWS: u8 = 31;

const TTYPE_IS: u8 = 0;
const TTYPE_SEND: u8 = 1;

/// Subnegotiations longer than this are discarded rather than buffered.
const MAX_SUBNEGOTIATION: usize = 256;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to resolve {0}")]
    ResolveFailed(String),
    #[error("connection refused by {0}")]
    ConnectRefused(String),
    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),
    #[error("connection reset by peer")]
    Reset,
    #[error("connection closed by peer")]
    Eof,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Maps a mid-session read/write error onto the transport taxonomy.
    #[must_use]
    pub fn from_stream_error(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe => Self::Reset,
            io::ErrorKind::UnexpectedEof => Self::Eof,
            _ => Self::Io(error),
        }
    }
}

/// Resolves `host` and dials the game server, with a bounded dial timeout.
pub async fn connect(
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, TransportError> {
    let address = format!("{host}:{port}");

    let ip = if let Ok(ip) = host.parse::<IpAddr>() {
        ip
    } else {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|_| TransportError::ResolveFailed(host.to_string()))?;

        resolver
            .lookup_ip(host)
            .await
            .ok()
            .and_then(|lookup| lookup.iter().next())
            .ok_or_else(|| TransportError::ResolveFailed(host.to_string()))?
    };

    let stream = tokio::time::timeout(timeout, TcpStream::connect((ip, port)))
        .await
        .map_err(|_| TransportError::ConnectTimeout(address.clone()))?
        .map_err(|e| match e.kind() {
            io::ErrorKind::ConnectionRefused => TransportError::ConnectRefused(address.clone()),
            _ => TransportError::Io(e),
        })?;

    stream.set_nodelay(true)?;

    Ok(stream)
}

/// One decoded unit of the telnet read side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetItem {
    /// In-band bytes with all IAC sequences stripped.
    Data(Bytes),
    /// A negotiation reply that must be written back to the server verbatim,
    /// without passing through the outbound trigger hooks.
    Reply(Bytes),
}

/// Codec sitting directly on the socket: answers RFC 854 option negotiation
/// and hands everything else downstream untouched.
///
/// The options we agree to mirror what the classic BBS door servers ask for:
/// we WILL do terminal-type and suppress-go-ahead, and we DO let the server
/// echo.
pub struct TelnetCodec {
    terminal_type: String,
}

impl TelnetCodec {
    #[must_use]
    pub fn new(terminal_type: impl Into<String>) -> Self {
        Self {
            terminal_type: terminal_type.into(),
        }
    }

    /// The negotiation blob sent as soon as the connection opens.
    #[must_use]
    pub fn initial_negotiation() -> Bytes {
        Bytes::from_static(&[
            IAC,
            WILL,
            OPT_TERMINAL_TYPE,
            IAC,
            WILL,
            OPT_SUPPRESS_GO_AHEAD,
            IAC,
            DO,
            OPT_SUPPRESS_GO_AHEAD,
        ])
    }

    fn negotiate(&self, command: u8, option: u8) -> Bytes {
        let response = match command {
            DO => match option {
                OPT_TERMINAL_TYPE | OPT_SUPPRESS_GO_AHEAD | OPT_NAWS => WILL,
                _ => WONT,
            },
            WILL => match option {
                OPT_ECHO | OPT_SUPPRESS_GO_AHEAD => DO,
                _ => DONT,
            },
            // DONT/WONT need no acknowledgement
            _ => return Bytes::new(),
        };

        debug!(command, option, response, "answering telnet negotiation");
        Bytes::from(vec![IAC, response, option])
    }

    fn subnegotiate(&self, payload: &[u8]) -> Bytes {
        if payload == [OPT_TERMINAL_TYPE, TTYPE_SEND] {
            let mut reply = BytesMut::with_capacity(6 + self.terminal_type.len());
            reply.put_slice(&[IAC, SB, OPT_TERMINAL_TYPE, TTYPE_IS]);
            reply.put_slice(self.terminal_type.as_bytes());
            reply.put_slice(&[IAC, SE]);
            return reply.freeze();
        }

        Bytes::new()
    }
}

impl Decoder for TelnetCodec {
    type Item = TelnetItem;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(&first) = src.first() else {
                return Ok(None);
            };

            if first != IAC {
                let end = src.iter().position(|&b| b == IAC).unwrap_or(src.len());
                return Ok(Some(TelnetItem::Data(src.split_to(end).freeze())));
            }

            let Some(&command) = src.get(1) else {
                return Ok(None);
            };

            match command {
                // escaped 0xFF data byte
                IAC => {
                    let _ = src.split_to(2);
                    return Ok(Some(TelnetItem::Data(Bytes::from_static(&[IAC]))));
                }
                DO | DONT | WILL | WONT => {
                    let Some(&option) = src.get(2) else {
                        return Ok(None);
                    };
                    let _ = src.split_to(3);

                    let reply = self.negotiate(command, option);
                    if !reply.is_empty() {
                        return Ok(Some(TelnetItem::Reply(reply)));
                    }
                }
                SB => {
                    let Some(end) = find_subnegotiation_end(src) else {
                        if src.len() > MAX_SUBNEGOTIATION {
                            warn!("discarding oversized telnet subnegotiation");
                            src.clear();
                        }
                        return Ok(None);
                    };

                    let payload = src[2..end].to_vec();
                    let _ = src.split_to(end + 2);

                    let reply = self.subnegotiate(&payload);
                    if !reply.is_empty() {
                        return Ok(Some(TelnetItem::Reply(reply)));
                    }
                }
                // two-byte commands (NOP, GA, ..) are dropped
                _ => {
                    let _ = src.split_to(2);
                }
            }
        }
    }
}

impl Encoder<Bytes> for TelnetCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len());
        for &byte in &item {
            if byte == IAC {
                dst.put_slice(&[IAC, IAC]);
            } else {
                dst.put_u8(byte);
            }
        }

        Ok(())
    }
}

/// Index of the `IAC SE` terminator within a subnegotiation, if complete.
fn find_subnegotiation_end(src: &BytesMut) -> Option<usize> {
    let mut i = 2;
    while i + 1 < src.len() {
        if src[i] == IAC && src[i + 1] == SE {
            return Some(i);
        }
        i += 1;
    }

    None
}
