//! Slack app installation: `GET /slack/install` starts the OAuth handshake,
//! `GET /slack/oauth_redirect` finishes it.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use lockbot_core::{StateTokenError, TokenError};
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::error::{ApiError, Result};
use crate::handlers::AppState;

#[derive(Debug, Deserialize)]
pub struct InstallQuery {
    /// Local path to land on after a successful install.
    pub redirect: Option<String>,
    pub team: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthRedirectQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Only same-site paths are accepted as redirect targets.
fn is_local_path(redirect: &str) -> bool {
    redirect.starts_with('/') && !redirect.starts_with("//") && !redirect.contains('\\')
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

/// GET /slack/install
pub async fn install_handler(
    State(state): State<AppState>,
    Query(query): Query<InstallQuery>,
) -> Result<Response> {
    let oauth = state
        .slack
        .oauth
        .as_ref()
        .ok_or(ApiError::NotConfigured("Slack OAuth"))?;

    let redirect = query.redirect.unwrap_or_default();
    if !redirect.is_empty() && !is_local_path(&redirect) {
        return Err(ApiError::BadRequest("redirect must be a local path".into()));
    }

    let token = state
        .tokens
        .issue_state_token(query.team.as_deref(), &redirect)?;

    let scopes = state.slack.scopes.join(",");
    let url = Url::parse_with_params(
        &state.slack.authorize_url,
        &[
            ("client_id", oauth.client_id()),
            ("scope", scopes.as_str()),
            ("redirect_uri", state.slack.redirect_uri.as_str()),
            ("state", token.as_str()),
        ],
    )
    .map_err(|e| ApiError::BadRequest(format!("invalid authorize URL: {e}")))?;

    Ok(found(url.as_str()))
}

/// GET /slack/oauth_redirect
///
/// Nothing is written unless the state token verifies and the code exchange
/// succeeds.
pub async fn oauth_redirect_handler(
    State(state): State<AppState>,
    Query(query): Query<OAuthRedirectQuery>,
) -> Result<Response> {
    let oauth = state
        .slack
        .oauth
        .as_ref()
        .ok_or(ApiError::NotConfigured("Slack OAuth"))?;

    let token = query
        .state
        .as_deref()
        .ok_or(TokenError::StateToken(StateTokenError::Malformed))?;
    let context = state.tokens.verify_state_token(token).await?;

    if let Some(error) = query.error {
        warn!("Installation cancelled: {}", error);
        return Err(ApiError::BadRequest(format!("installation cancelled: {error}")));
    }
    let code = query
        .code
        .ok_or_else(|| ApiError::BadRequest("missing code".into()))?;

    let grant = oauth
        .exchange(&code, &state.slack.redirect_uri)
        .await
        .map_err(|e| ApiError::OAuth(e.to_string()))?;

    if let Err(e) = context.check_team(&grant.team) {
        warn!("Rejected installation: {}", e);
        return Err(TokenError::StateToken(e).into());
    }

    state
        .tokens
        .store_access_token(
            &grant.team,
            &grant.access_token,
            &grant.scopes,
            grant.bot_user_id.as_deref(),
        )
        .await?;
    info!("Completed installation for team {}", grant.team);

    if context.redirect.is_empty() {
        Ok((StatusCode::OK, "lockbot is installed. You can close this window.").into_response())
    } else {
        Ok(found(&context.redirect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_paths() {
        assert!(is_local_path("/"));
        assert!(is_local_path("/welcome?x=1"));
        assert!(!is_local_path("//evil.example.com"));
        assert!(!is_local_path("https://evil.example.com"));
        assert!(!is_local_path("/\\evil.example.com"));
    }
}
