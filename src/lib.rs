#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod bridge;
pub mod config;
pub mod error;
#[cfg(feature = "inbox")]
pub mod inbox;
pub mod session;
pub mod ws;

#[cfg(feature = "inbox")]
use serde::de::DeserializeOwned;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(feature = "inbox")]
#[cfg_attr(
    feature = "tracing",
    tracing::instrument(
        level = "debug",
        skip(client, request),
        fields(
            method = %request.method(),
            path = request.url().path(),
            status_code
        )
    )
)]
async fn request<Response: DeserializeOwned>(
    client: &reqwest::Client,
    request: reqwest::Request,
) -> Result<Response> {
    let method = request.method().clone();
    let path = request.url().path().to_owned();

    let response = client.execute(request).await?;
    let status_code = response.status();

    #[cfg(feature = "tracing")]
    tracing::Span::current().record("status_code", status_code.as_u16());

    if !status_code.is_success() {
        let message = response.text().await.unwrap_or_default();

        #[cfg(feature = "tracing")]
        tracing::warn!(
            status = %status_code,
            method = %method,
            path = %path,
            message = %message,
            "API request failed"
        );

        return Err(Error::status(status_code, method, path, message));
    }

    Ok(response.json::<Response>().await?)
}
