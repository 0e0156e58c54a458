use reqwest::{
    Client as ReqwestClient, Method,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use secrecy::{ExposeSecret as _, SecretString};
use serde_json::Value;
use url::Url;

use crate::Result;
use crate::config::API_KEY_VAR;
use crate::error::Error;

/// Environment variable overriding the REST host.
pub const API_URL_VAR: &str = "AGENTMAIL_API_URL";

/// REST host used when [`API_URL_VAR`] is not set.
pub const DEFAULT_API_URL: &str = "https://api.agentmail.to/v0/";

/// Client for the inbox REST API.
///
/// Responses are returned as opaque JSON; the bridge only forwards them to the session.
///
/// # Example
///
/// ```no_run
/// use inbox_bridge::inbox::Client;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = Client::from_env()?;
/// let threads = client.list_threads("support@agentmail.to", 20).await?;
/// println!("{threads}");
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct Client {
    host: Url,
    client: ReqwestClient,
}

impl Client {
    /// Creates a new inbox API client for `host`, authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host URL is invalid, the token is not a valid header value, or
    /// the HTTP client fails to build.
    pub fn new(host: &str, token: &SecretString) -> Result<Client> {
        let mut headers = HeaderMap::new();

        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_e| Error::validation("auth token is not a valid header value"))?;
        bearer.set_sensitive(true);

        headers.insert("User-Agent", HeaderValue::from_static("inbox_bridge"));
        headers.insert("Accept", HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, bearer);
        let client = ReqwestClient::builder().default_headers(headers).build()?;

        let mut host = Url::parse(host)?;
        if !host.path().ends_with('/') {
            let path = format!("{}/", host.path());
            host.set_path(&path);
        }

        Ok(Self { host, client })
    }

    /// Reads the token from [`API_KEY_VAR`] and the host from [`API_URL_VAR`].
    pub fn from_env() -> Result<Client> {
        let token = std::env::var(API_KEY_VAR)
            .map_err(|_e| Error::validation(format!("{API_KEY_VAR} is not set")))?;
        let host = std::env::var(API_URL_VAR).unwrap_or_else(|_| DEFAULT_API_URL.to_owned());

        Self::new(&host, &SecretString::from(token))
    }

    /// Returns the host URL for the client.
    #[must_use]
    pub fn host(&self) -> &Url {
        &self.host
    }

    /// List the most recent threads of an inbox.
    ///
    /// `inbox_id` is percent-encoded as a single path segment.
    pub async fn list_threads(&self, inbox_id: &str, limit: u32) -> Result<Value> {
        let mut url = self.host.clone();
        url.path_segments_mut()
            .map_err(|()| Error::validation(format!("{} cannot be a base URL", self.host)))?
            .pop_if_empty()
            .extend(["inboxes", inbox_id, "threads"]);

        let request = self
            .client
            .request(Method::GET, url)
            .query(&[("limit", limit)])
            .build()?;

        crate::request(&self.client, request).await
    }

    /// Opening context for a session: the latest threads of `inbox_id`.
    pub async fn initial_context(&self, inbox_id: &str, limit: u32) -> Result<String> {
        let threads = self.list_threads(inbox_id, limit).await?;
        Ok(format!("Here are the latest threads in your inbox: {threads}"))
    }
}
