//! Access tokens for Google APIs.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use warmpool_core::{Error, Result};

/// Token endpoint of the metadata server, for the VM's default service account.
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Supplies bearer tokens for outgoing API calls.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A fixed token, for tests and for tokens minted out of band.
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct AccessToken {
    access_token: String,
    expires_in: u64,
}

/// Fetches tokens from the GCE metadata server and caches them until shortly
/// before they expire.
pub struct MetadataServerToken {
    client: reqwest::Client,
    url: String,
    cached: Mutex<Option<(String, Instant)>>,
}

impl MetadataServerToken {
    pub fn new() -> Self {
        Self::with_url(METADATA_TOKEN_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<AccessToken> {
        let resp = self
            .client
            .get(&self.url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| Error::Http(format!("fetching access token: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                status: status.as_u16(),
                message: format!("fetching access token: {body}"),
            });
        }

        resp.json()
            .await
            .map_err(|e| Error::Http(format!("decoding access token: {e}")))
    }
}

impl Default for MetadataServerToken {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenSource for MetadataServerToken {
    async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some((token, expires)) = cached.as_ref() {
            if Instant::now() < *expires {
                return Ok(token.clone());
            }
        }

        let fresh = self.fetch().await?;
        let lifetime = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_MARGIN);
        debug!(expires_in = fresh.expires_in, "refreshed access token");
        *cached = Some((fresh.access_token.clone(), Instant::now() + lifetime));
        Ok(fresh.access_token)
    }
}
