use bon::Builder;

use super::types::response::RecognizedEvent;
use crate::session::{Session, Turn};

/// What the session is asked to do when a message arrives.
pub const DEFAULT_INSTRUCTIONS: &str = "A new email has just arrived in your inbox. \
Interrupt the conversation to let the user know they received a new message, \
say who it is from and what it is about, then read its contents.";

/// Outcome of handling one event, for callers that want to inspect it.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reaction {
    /// The event needs no reaction
    Ignored,
    /// The session completed a turn for the event
    Replied(Turn),
    /// The session failed; the failure has been logged
    Failed,
}

/// Turns recognized events into session turns.
///
/// [`SessionBridge::handle`] awaits the whole reaction (interrupt, then reply) before
/// returning, so driving it from a single loop gives in-order, non-overlapping turns.
#[derive(Clone, Debug, Builder)]
pub struct SessionBridge {
    #[builder(into, default = DEFAULT_INSTRUCTIONS.to_owned())]
    instructions: String,
}

impl Default for SessionBridge {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionBridge {
    #[must_use]
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// React to one event.
    ///
    /// Session failures are logged and reported as [`Reaction::Failed`]; they never escape.
    /// A failed `interrupt` is logged and the reply is still requested.
    pub async fn handle(&self, event: RecognizedEvent, session: &dyn Session) -> Reaction {
        let payload = match event {
            RecognizedEvent::Ignored => return Reaction::Ignored,
            RecognizedEvent::MessageReceived { payload } => payload,
        };

        if let Err(e) = session.interrupt().await {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, "Unable to interrupt session before announcing message");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }

        let context = payload.to_string();
        match session.generate_reply(&self.instructions, &context).await {
            Ok(turn) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(turn_id = %turn.id, "Announced inbound message");
                Reaction::Replied(turn)
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Failed to announce inbound message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                Reaction::Failed
            }
        }
    }
}
