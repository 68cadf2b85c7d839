//! Slack `oauth.v2.access` client.

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum OAuthError {
    #[error("request failed: {0}")]
    Http(String),

    #[error("Slack rejected the code: {0}")]
    Rejected(String),

    #[error("unexpected response: {0}")]
    InvalidResponse(String),
}

/// What a successful exchange yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthGrant {
    pub team: String,
    pub access_token: String,
    pub scopes: Vec<String>,
    pub bot_user_id: Option<String>,
}

#[derive(Deserialize)]
struct AccessResponse {
    ok: bool,
    error: Option<String>,
    access_token: Option<String>,
    scope: Option<String>,
    bot_user_id: Option<String>,
    team: Option<TeamInfo>,
}

#[derive(Deserialize)]
struct TeamInfo {
    id: String,
}

pub struct SlackOAuth {
    client: Client,
    api_url: String,
    client_id: String,
    client_secret: String,
}

impl SlackOAuth {
    pub fn new(api_url: String, client_id: String, client_secret: String) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Trade an authorization code for the team's access token.
    pub async fn exchange(&self, code: &str, redirect_uri: &str) -> Result<OAuthGrant, OAuthError> {
        let url = format!("{}/oauth.v2.access", self.api_url);
        debug!("Exchanging OAuth code at {}", url);

        let response = self
            .client
            .post(&url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| OAuthError::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| OAuthError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(OAuthError::Http(format!(
                "oauth.v2.access returned {}: {}",
                status, body
            )));
        }

        let access: AccessResponse = serde_json::from_str(&body)
            .map_err(|e| OAuthError::InvalidResponse(e.to_string()))?;

        if !access.ok {
            let error = access.error.unwrap_or_else(|| "unknown_error".to_string());
            warn!("oauth.v2.access rejected the code: {}", error);
            return Err(OAuthError::Rejected(error));
        }

        let (Some(access_token), Some(team)) = (access.access_token, access.team) else {
            return Err(OAuthError::InvalidResponse(
                "missing access_token or team".to_string(),
            ));
        };

        Ok(OAuthGrant {
            team: team.id,
            access_token,
            scopes: access
                .scope
                .unwrap_or_default()
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            bot_user_id: access.bot_user_id,
        })
    }
}
