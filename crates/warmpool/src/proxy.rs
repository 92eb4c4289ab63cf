//! Client for the reverse proxy's admin API.
//!
//! The proxy routes each user to the backend registered for them. Pooled VMs
//! are registered twice: once with no end user when they join the pool, and
//! again with their owner when they are assigned.

use crate::gce::TokenSource;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use warmpool_core::{Error, Instance, Result};

/// A routing entry as the proxy stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    pub id: String,
    #[serde(default)]
    pub end_user: String,
    #[serde(default)]
    pub backend_user: String,
    #[serde(default)]
    pub path_prefixes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
}

impl Backend {
    /// Builds the record routing `user` to `vm`.
    pub fn for_vm(vm: &Instance, user: &str) -> Result<Self> {
        let id = vm.backend_id().ok_or_else(|| Error::InvalidInstance {
            name: vm.name.clone(),
            reason: "no backend-id metadata".to_string(),
        })?;
        let backend_user = vm
            .first_service_account()
            .ok_or_else(|| Error::InvalidInstance {
                name: vm.name.clone(),
                reason: "no service account attached".to_string(),
            })?;

        Ok(Self {
            id: id.to_string(),
            end_user: user.to_string(),
            backend_user: backend_user.to_string(),
            path_prefixes: vec!["/".to_string()],
            last_used: None,
        })
    }

    /// True if the backend was used at some point and not within `idle_for`.
    pub fn is_idle(&self, idle_for: Duration, now: DateTime<Utc>) -> bool {
        let Some(last_used) = self.last_used.filter(|t| t.timestamp() > 0) else {
            return false;
        };
        match (now - last_used).to_std() {
            Ok(age) => age > idle_for,
            Err(_) => false,
        }
    }
}

/// Ids of the backends in `backends` that are idle at `now`.
pub fn idle_backend_ids(backends: &[Backend], idle_for: Duration, now: DateTime<Utc>) -> Vec<String> {
    backends
        .iter()
        .filter(|b| b.is_idle(idle_for, now))
        .map(|b| b.id.clone())
        .collect()
}

/// Where pooled VMs get registered and idle ones get discovered.
#[async_trait]
pub trait BackendRegistry: Send + Sync {
    /// Routes `user` (empty for an unassigned VM) to `vm`.
    async fn register_backend(&self, vm: &Instance, user: &str) -> Result<()>;

    /// Ids of backends unused for longer than `idle_for`.
    async fn idle_backends(&self, idle_for: Duration) -> Result<Vec<String>>;
}

/// JSON-over-HTTP client for `<admin_url>/api/backends`.
pub struct ProxyAdmin {
    client: reqwest::Client,
    admin_url: String,
    tokens: Option<Arc<dyn TokenSource>>,
}

impl ProxyAdmin {
    pub fn new(admin_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            admin_url: admin_url.into().trim_end_matches('/').to_string(),
            tokens: None,
        }
    }

    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    fn backends_url(&self) -> String {
        format!("{}/api/backends", self.admin_url)
    }

    async fn authorize(&self, req: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        match &self.tokens {
            Some(tokens) => Ok(req.bearer_auth(tokens.token().await?)),
            None => Ok(req),
        }
    }

    pub async fn list_backends(&self) -> Result<Vec<Backend>> {
        let req = self.authorize(self.client.get(self.backends_url())).await?;
        let resp = req.send().await.map_err(proxy_error)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Proxy(format!("listing backends: {status}: {body}")));
        }
        resp.json().await.map_err(proxy_error)
    }
}

fn proxy_error(e: reqwest::Error) -> Error {
    Error::Proxy(e.to_string())
}

#[async_trait]
impl BackendRegistry for ProxyAdmin {
    async fn register_backend(&self, vm: &Instance, user: &str) -> Result<()> {
        let backend = Backend::for_vm(vm, user)?;
        let req = self
            .authorize(self.client.post(self.backends_url()).json(&backend))
            .await?;
        let resp = req.send().await.map_err(proxy_error)?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Proxy(format!(
                "registering backend {}: {status}: {body}",
                backend.id
            )));
        }

        info!(backend = %backend.id, instance = %vm.name, user, "registered backend");
        Ok(())
    }

    async fn idle_backends(&self, idle_for: Duration) -> Result<Vec<String>> {
        let backends = self.list_backends().await?;
        let idle = idle_backend_ids(&backends, idle_for, Utc::now());
        debug!(total = backends.len(), idle = idle.len(), "checked backend usage");
        Ok(idle)
    }
}
