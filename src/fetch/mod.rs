//! HTTP plumbing shared by the trace provider and map-matching adapters.

mod basic;
mod client;
mod rate_limit;
pub mod auth;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use rate_limit::RateLimited;

use anyhow::{Result, anyhow};
use serde::de::DeserializeOwned;

/// GETs `url` and returns the body, failing on any non-success status.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(anyhow!("GET {} returned status {}: {}", redact(url), status, body));
    }
    Ok(resp.bytes().await?.to_vec())
}

/// GETs `url` and decodes the JSON body.
pub async fn fetch_json<C, T>(client: &C, url: &str) -> Result<T>
where
    C: HttpClient + ?Sized,
    T: DeserializeOwned,
{
    let bytes = fetch_bytes(client, url).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| anyhow!("Failed to parse response from {}: {}", redact(url), e))
}

/// Strips the query string so tokens never end up in logs.
pub fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}
