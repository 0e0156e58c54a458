use std::collections::BTreeSet;

use serde::Serialize;

use crate::Result;
use crate::error::Error;

/// The immutable set of inbox identifiers registered at connect time.
///
/// Identifiers are trimmed and deduplicated; blank identifiers are rejected.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    inbox_ids: BTreeSet<String>,
}

impl Subscription {
    pub fn new<I: IntoIterator<Item = String>>(inbox_ids: I) -> Result<Self> {
        let mut ids = BTreeSet::new();
        for id in inbox_ids {
            let trimmed = id.trim();
            if trimmed.is_empty() {
                return Err(Error::validation("inbox id cannot be blank"));
            }
            ids.insert(trimmed.to_owned());
        }

        if ids.is_empty() {
            return Err(Error::validation(
                "inbox_ids cannot be empty: at least one inbox must be provided for subscription",
            ));
        }

        Ok(Self { inbox_ids: ids })
    }

    pub fn inbox_ids(&self) -> impl Iterator<Item = &str> {
        self.inbox_ids.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inbox_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inbox_ids.is_empty()
    }

    /// The control message announcing this subscription to the server.
    #[must_use]
    pub fn request(&self) -> SubscribeRequest<'_> {
        SubscribeRequest {
            action: SubscribeAction::Subscribe,
            inbox_ids: self.inbox_ids().collect(),
        }
    }
}

/// Subscribe control message, sent once right after the WebSocket upgrade.
///
/// ```json
/// { "type": "subscribe", "inbox_ids": ["inbox_1"] }
/// ```
#[non_exhaustive]
#[derive(Clone, Debug, Serialize)]
pub struct SubscribeRequest<'sub> {
    #[serde(rename = "type")]
    pub action: SubscribeAction,
    pub inbox_ids: Vec<&'sub str>,
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscribeAction {
    Subscribe,
}
