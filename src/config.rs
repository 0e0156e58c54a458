//! Connection parameters supplied by the embedding application.
//!
//! A [`ConnectionParams`] is built once at startup (usually from the result of inbox
//! provisioning) and passed by value into
//! [`LifecycleController::on_session_enter`](crate::bridge::LifecycleController::on_session_enter).

use bon::bon;
use secrecy::SecretString;
use url::Url;

use crate::Result;
use crate::bridge::types::request::Subscription;
use crate::error::Error;

/// Environment variable holding the bearer token for the notification service.
pub const API_KEY_VAR: &str = "AGENTMAIL_API_KEY";

/// Environment variable overriding the notification endpoint.
pub const WS_URL_VAR: &str = "AGENTMAIL_WS_URL";

/// Notification endpoint used when [`WS_URL_VAR`] is not set.
pub const DEFAULT_WS_URL: &str = "wss://ws.agentmail.to/v0";

/// Endpoint, credential and inbox set for one bridge.
///
/// The token is held as a [`SecretString`] and is redacted from `Debug` output.
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct ConnectionParams {
    endpoint: Url,
    token: SecretString,
    subscription: Subscription,
}

#[bon]
impl ConnectionParams {
    /// Validates and assembles connection parameters.
    ///
    /// Fails if `endpoint` is not a `ws://`/`wss://` URL or `inbox_ids` is empty.
    #[builder]
    pub fn new<I, S>(
        #[builder(into)] endpoint: String,
        #[builder(into)] token: String,
        inbox_ids: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoint = Url::parse(&endpoint)?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "endpoint must use ws or wss, got {}",
                endpoint.scheme()
            )));
        }

        Ok(Self {
            endpoint,
            token: SecretString::from(token),
            subscription: Subscription::new(inbox_ids.into_iter().map(Into::into))?,
        })
    }
}

impl ConnectionParams {
    /// Reads the token from [`API_KEY_VAR`] and the endpoint from [`WS_URL_VAR`],
    /// falling back to [`DEFAULT_WS_URL`].
    pub fn from_env<I, S>(inbox_ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let token = std::env::var(API_KEY_VAR)
            .map_err(|_e| Error::validation(format!("{API_KEY_VAR} is not set")))?;
        let endpoint = std::env::var(WS_URL_VAR).unwrap_or_else(|_| DEFAULT_WS_URL.to_owned());

        Self::builder()
            .endpoint(endpoint)
            .token(token)
            .inbox_ids(inbox_ids)
            .build()
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    #[must_use]
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    #[must_use]
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }
}
