use std::error::Error as StdError;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::ws::RawFrame;

/// `type` tag carried by notification envelopes.
pub const EVENT_KIND: &str = "event";

/// `event_type` tag for a newly received message.
pub const MESSAGE_RECEIVED: &str = "message.received";

/// Decoded shape of one inbound frame.
///
/// Only [`decode`] constructs an [`Envelope`]; `event_kind` is present exactly when
/// `kind` is [`EVENT_KIND`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    kind: String,
    event_kind: Option<String>,
    payload: Value,
}

impl Envelope {
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn event_kind(&self) -> Option<&str> {
        self.event_kind.as_deref()
    }

    #[must_use]
    pub fn payload(&self) -> &Value {
        &self.payload
    }
}

#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    message: Option<Value>,
}

/// Reasons a frame could not be turned into an [`Envelope`].
#[non_exhaustive]
#[derive(Debug)]
pub enum DecodeError {
    /// Empty or whitespace-only frame
    Empty,
    /// Not JSON, or JSON without a string `type`
    Json(serde_json::Error),
    /// `type` is `event` but `event_type` is absent
    MissingEventType,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty frame"),
            Self::Json(e) => write!(f, "malformed envelope: {e}"),
            Self::MissingEventType => write!(f, "event envelope without event_type"),
        }
    }
}

impl StdError for DecodeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for crate::error::Error {
    fn from(e: DecodeError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::Internal, e)
    }
}

/// Parses a raw frame into an [`Envelope`].
pub fn decode(frame: &RawFrame) -> Result<Envelope, DecodeError> {
    let bytes = frame.as_bytes();
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }

    let wire: WireEnvelope = serde_json::from_slice(bytes).map_err(DecodeError::Json)?;
    let event_kind = if wire.kind == EVENT_KIND {
        Some(wire.event_type.ok_or(DecodeError::MissingEventType)?)
    } else {
        None
    };

    Ok(Envelope {
        kind: wire.kind,
        event_kind,
        payload: wire.message.unwrap_or(Value::Null),
    })
}

/// The closed set of events the bridge reacts to.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizedEvent {
    /// A new message arrived in one of the subscribed inboxes
    MessageReceived { payload: Value },
    /// Decoded fine, but nothing to do
    Ignored,
}

/// Maps an [`Envelope`] onto a [`RecognizedEvent`].
#[must_use]
pub fn classify(envelope: Envelope) -> RecognizedEvent {
    match (envelope.kind.as_str(), envelope.event_kind.as_deref()) {
        (EVENT_KIND, Some(MESSAGE_RECEIVED)) => RecognizedEvent::MessageReceived {
            payload: envelope.payload,
        },
        _ => RecognizedEvent::Ignored,
    }
}
