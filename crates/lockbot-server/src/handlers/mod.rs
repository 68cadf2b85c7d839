//! HTTP handlers.
//!
//! - `/api/...` - REST lock API, bearer-authenticated per team
//! - `/slack/events` - slash commands and Events API callbacks
//! - `/slack/install`, `/slack/oauth_redirect` - app installation
//! - `GET /health`

pub mod api;
pub mod install;
pub mod slack;

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use lockbot_core::{Clock, LockManager, TokenManager};
use serde::Serialize;

use crate::oauth::SlackOAuth;

/// Slack app settings used by the chat and install handlers.
pub struct SlackSettings {
    /// When `None`, request signatures are not checked.
    pub signing_secret: Option<String>,
    /// When `None`, installation is disabled.
    pub oauth: Option<SlackOAuth>,
    pub authorize_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub allow_chat_force: bool,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub locks: LockManager,
    pub tokens: TokenManager,
    pub clock: Arc<dyn Clock>,
    pub slack: Arc<SlackSettings>,
    pub backend: &'static str,
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub backend: &'static str,
}

/// GET /health - Health check endpoint.
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        backend: state.backend,
    })
}
