//! Inbox REST tools and the session's opening turn.
//!
//! **Feature flag:** `inbox` (enabled by default)
//!
//! The bridge itself only listens; this module covers what a voice assistant does once when a
//! session starts: fetch the latest threads, hand them to the session as context, and greet.

pub mod client;

pub use client::Client;

use crate::Result;
use crate::session::{Session, Turn};

/// Default number of threads fetched for the opening context.
pub const DEFAULT_THREAD_LIMIT: u32 = 20;

/// Instructions for the opening turn.
pub const GREETING_INSTRUCTIONS: &str =
    "Greet the user, summarize the latest threads in your inbox, and offer your assistance.";

/// Persona for a voice and email assistant reachable at `inbox_id`.
#[must_use]
pub fn assistant_instructions(inbox_id: &str) -> String {
    format!("You are a helpful voice and email AI assistant. Your email address is {inbox_id}.")
}

/// Instructions for the opening turn, prefixed with the persona for `inbox_id`.
///
/// [`Session`] has no separate system prompt, so the persona travels with the greeting.
#[must_use]
pub fn greeting_instructions(inbox_id: &str) -> String {
    format!("{} {GREETING_INSTRUCTIONS}", assistant_instructions(inbox_id))
}

/// Run the opening turn, grounded in the latest threads of `inbox_id`.
pub async fn greet(
    client: &Client,
    session: &dyn Session,
    inbox_id: &str,
    limit: u32,
) -> Result<Turn> {
    let context = client.initial_context(inbox_id, limit).await?;
    session
        .generate_reply(&greeting_instructions(inbox_id), &context)
        .await
}
