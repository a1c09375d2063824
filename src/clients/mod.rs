//! UDP client stubs for the four servers.
//!
//! Each client shares a [`ReplyRouter`](crate::net::ReplyRouter) socket,
//! draws packet ids from a 12-bit generator, applies authentication when
//! configured, and turns Type 7 answers into typed errors. The location and
//! query clients carry the two caches that keep the pipeline fast.

pub mod location;
pub mod query;
pub mod report;
pub mod weather;

pub use location::LocationClient;
pub use query::{fingerprint, CachedWeather, QueryClient};
pub use report::ReportClient;
pub use weather::WeatherClient;

use std::error::Error;
use std::fmt;
use std::io;

use crate::auth::AuthError;
use crate::packet::{Frame, PacketError, PacketType};

#[derive(Debug)]
pub enum ClientError {
    Io(io::Error),
    Packet(PacketError),
    Auth(AuthError),
    /// The server answered with a Type 7 carrying this code.
    Server { code: u16 },
    /// The reply decoded fine but was not the packet type expected.
    UnexpectedType(PacketType),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(e) => write!(f, "network error: {e}"),
            ClientError::Packet(e) => write!(f, "codec error: {e}"),
            ClientError::Auth(e) => write!(f, "auth error: {e}"),
            ClientError::Server { code } => write!(f, "server error {code}"),
            ClientError::UnexpectedType(t) => write!(f, "unexpected reply type {t:?}"),
        }
    }
}

impl Error for ClientError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClientError::Io(e) => Some(e),
            ClientError::Packet(e) => Some(e),
            ClientError::Auth(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Io(e)
    }
}

impl From<PacketError> for ClientError {
    fn from(e: PacketError) -> Self {
        ClientError::Packet(e)
    }
}

impl From<AuthError> for ClientError {
    fn from(e: AuthError) -> Self {
        ClientError::Auth(e)
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Decode a reply, mapping a Type 7 to `ClientError::Server` and anything
/// other than `expected` to `UnexpectedType`.
pub(crate) fn expect_reply(data: &[u8], expected: PacketType) -> ClientResult<Frame> {
    let frame = Frame::decode(data)?;
    match frame.header.packet_type {
        t if t == expected => Ok(frame),
        PacketType::Error => {
            let code = frame.payload.map(|p| p.weather_code).unwrap_or(0);
            Err(ClientError::Server { code })
        }
        other => Err(ClientError::UnexpectedType(other)),
    }
}
