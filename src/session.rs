//! The narrow capability the bridge needs from a live conversational session.
//!
//! The conversational engine (speech, turn-taking, model calls) lives outside this crate and
//! is reached only through [`Session`]. Implementations are shared between the bridge task and
//! the rest of the session machinery, so they must do their own internal synchronization.

use async_trait::async_trait;
use bon::Builder;
use uuid::Uuid;

use crate::Result;

/// One completed cycle of the session producing a response.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq, Builder)]
pub struct Turn {
    /// Identifier assigned by the session
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    /// Text of the response, when the engine exposes it
    #[builder(into)]
    pub transcript: Option<String>,
}

/// A live, stateful conversational actor.
#[async_trait]
pub trait Session: Send + Sync {
    /// Cancel any in-progress turn.
    ///
    /// Must be idempotent: calling it with nothing in flight is a successful no-op that
    /// returns promptly.
    async fn interrupt(&self) -> Result<()>;

    /// Drive a new turn to completion.
    ///
    /// `instructions` tells the session what to do; `context` carries the grounding data
    /// (for inbound mail, the serialized message). Dropping the returned future cancels the
    /// turn.
    async fn generate_reply(&self, instructions: &str, context: &str) -> Result<Turn>;
}
