#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

/// WebSocket error variants.
///
/// Every variant is a connection error: it ends the current connect attempt
/// (or the current frame sequence) but never the process.
#[non_exhaustive]
#[derive(Debug)]
pub enum WsError {
    /// Error connecting to or communicating with the notification server
    Connection(tokio_tungstenite::tungstenite::Error),
    /// The bearer token cannot be carried in an HTTP header
    InvalidCredential,
    /// The upgrade did not complete within the configured connect timeout
    Timeout(Duration),
    /// The subscribe control message could not be delivered
    SubscriptionFailed(String),
    /// The server ended the stream, with the close code and reason if it sent a CLOSE frame
    ConnectionClosed { code: Option<u16>, reason: String },
    /// Nothing arrived within the heartbeat timeout of a PING
    HeartbeatTimeout(Duration),
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::InvalidCredential => write!(f, "auth token is not a valid header value"),
            Self::Timeout(after) => write!(f, "WebSocket handshake timed out after {after:?}"),
            Self::SubscriptionFailed(reason) => write!(f, "Subscription failed: {reason}"),
            Self::ConnectionClosed { code: Some(code), reason } => {
                write!(f, "WebSocket connection closed by server ({code}): {reason}")
            }
            Self::ConnectionClosed { code: None, .. } => {
                write!(f, "WebSocket connection closed by server")
            }
            Self::HeartbeatTimeout(after) => {
                write!(f, "Heartbeat timeout: no response to PING within {after:?}")
            }
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, WsError::Connection(e))
    }
}
