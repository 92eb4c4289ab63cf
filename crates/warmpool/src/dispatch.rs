//! Inbound HTTP entry point.
//!
//! Every request, whatever its path, is treated as "take me to my VM": the
//! caller's identity comes from a header set by the authenticating front
//! end, the assignment pipeline runs, and the caller gets a page that keeps
//! refreshing until the proxy starts routing them to their VM.

use crate::assign::Assigner;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

pub const DEFAULT_IDENTITY_HEADER: &str = "x-goog-authenticated-user-email";
pub const DEFAULT_IDENTITY_PREFIX: &str = "accounts.google.com:";

/// Seconds between holding page reloads.
const REFRESH_SECS: u32 = 5;

/// How the caller's identity is read and which identities are served.
#[derive(Debug, Clone)]
pub struct IdentityPolicy {
    pub header: String,
    pub strip_prefix: String,
    /// When set, only addresses `@allowed_domain` are served.
    pub allowed_domain: Option<String>,
}

impl Default for IdentityPolicy {
    fn default() -> Self {
        Self {
            header: DEFAULT_IDENTITY_HEADER.to_string(),
            strip_prefix: DEFAULT_IDENTITY_PREFIX.to_string(),
            allowed_domain: None,
        }
    }
}

impl IdentityPolicy {
    pub fn with_allowed_domain(mut self, domain: impl Into<String>) -> Self {
        self.allowed_domain = Some(domain.into());
        self
    }

    /// The caller's identity, if present and allowed.
    pub fn user_from(&self, headers: &HeaderMap) -> Option<String> {
        let raw = headers.get(self.header.as_str())?.to_str().ok()?.trim();
        let user = raw.strip_prefix(self.strip_prefix.as_str()).unwrap_or(raw);
        if user.is_empty() {
            return None;
        }

        if let Some(domain) = &self.allowed_domain {
            let (_, user_domain) = user.rsplit_once('@')?;
            if !user_domain.eq_ignore_ascii_case(domain) {
                debug!(user, "identity outside allowed domain");
                return None;
            }
        }
        Some(user.to_string())
    }
}

#[derive(Clone)]
pub struct DispatchState {
    assigner: Arc<Assigner>,
    identity: Arc<IdentityPolicy>,
}

impl DispatchState {
    pub fn new(assigner: Arc<Assigner>, identity: IdentityPolicy) -> Self {
        Self {
            assigner,
            identity: Arc::new(identity),
        }
    }
}

pub fn router(state: DispatchState) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    listener: tokio::net::TcpListener,
    state: DispatchState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn dispatch(State(state): State<DispatchState>, headers: HeaderMap) -> Response {
    let Some(user) = state.identity.user_from(&headers) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state.assigner.assign(&user).await {
        Ok(vm) => {
            info!(user, instance = %vm.name, "dispatched user");
            Html(holding_page()).into_response()
        }
        Err(e) => {
            error!(user, error = %e, "assignment failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn holding_page() -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="{REFRESH_SECS}">
<title>Starting your workspace</title>
</head>
<body>
<p>Your workspace is starting. This page reloads every {REFRESH_SECS} seconds.</p>
</body>
</html>
"#
    )
}
