//! HTTP access for remote input files.

mod auth;
mod basic;
mod client;

pub use auth::ApiKey;
pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result};
use reqwest::StatusCode;
use tracing::debug;

/// GETs `url` and returns the body. Non-success statuses are errors.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Vec<u8>> {
    fetch_optional(client, url)
        .await?
        .with_context(|| format!("{url} not found"))
}

/// Like [`fetch_bytes`], but a 404 yields `None`.
pub async fn fetch_optional<C: HttpClient + ?Sized>(
    client: &C,
    url: &str,
) -> Result<Option<Vec<u8>>> {
    let req = reqwest::Request::new(
        reqwest::Method::GET,
        url.parse().with_context(|| format!("invalid url '{url}'"))?,
    );

    let resp = client
        .execute(req)
        .await
        .with_context(|| format!("request to {url} failed"))?;
    if resp.status() == StatusCode::NOT_FOUND {
        debug!(url, "Remote file not found");
        return Ok(None);
    }
    let resp = resp.error_for_status()?;
    Ok(Some(resp.bytes().await?.to_vec()))
}
