//! POST /slack/events - slash commands (form-encoded) and Events API
//! callbacks (JSON).

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use lockbot_core::{LockKey, TokenError};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::bot::{BotCommand, BotReply};
use crate::error::{ApiError, Result};
use crate::handlers::AppState;
use crate::signature::{self, SIGNATURE_HEADER, TIMESTAMP_HEADER};

/// Events API envelope.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlackEvent {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        team_id: String,
        event: InnerEvent,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InnerEvent {
    AppUninstalled,
    TokensRevoked,
    #[serde(other)]
    Other,
}

/// A slash command invocation.
#[derive(Debug)]
pub struct SlashCommand {
    pub team: String,
    pub channel: String,
    pub user: String,
    pub command: String,
    pub text: String,
}

impl SlashCommand {
    fn from_form(body: &[u8]) -> Result<Self> {
        let mut fields: HashMap<String, String> = url::form_urlencoded::parse(body)
            .into_owned()
            .collect();
        let mut take = |name: &str| {
            fields
                .remove(name)
                .ok_or_else(|| ApiError::BadRequest(format!("missing field `{name}`")))
        };
        Ok(Self {
            team: take("team_id")?,
            channel: take("channel_id")?,
            user: take("user_id")?,
            command: take("command")?,
            text: take("text").unwrap_or_default(),
        })
    }
}

pub async fn events_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    if let Some(secret) = &state.slack.signing_secret {
        let header_str = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        signature::verify(
            secret.as_bytes(),
            header_str(TIMESTAMP_HEADER),
            header_str(SIGNATURE_HEADER),
            &body,
            state.clock.now().timestamp(),
        )
        .map_err(|e| {
            warn!("Rejected Slack request: {}", e);
            ApiError::InvalidSignature
        })?;
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));

    if is_json {
        let event: SlackEvent = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid event payload: {e}")))?;
        handle_event(&state, event).await
    } else {
        let invocation = SlashCommand::from_form(&body)?;
        let reply = handle_command(&state, &invocation).await;
        Ok(Json(reply).into_response())
    }
}

async fn handle_event(state: &AppState, event: SlackEvent) -> Result<Response> {
    match event {
        SlackEvent::UrlVerification { challenge } => {
            Ok(Json(json!({ "challenge": challenge })).into_response())
        }
        SlackEvent::EventCallback {
            team_id,
            event: InnerEvent::AppUninstalled | InnerEvent::TokensRevoked,
        } => {
            state.tokens.revoke_access_token(&team_id).await?;
            info!("Team {} uninstalled the app", team_id);
            Ok(StatusCode::OK.into_response())
        }
        other => {
            debug!("Ignoring Slack event {:?}", other);
            Ok(StatusCode::OK.into_response())
        }
    }
}

/// Run a slash command and produce the reply. Never fails: every error
/// becomes an ephemeral message.
pub async fn handle_command(state: &AppState, invocation: &SlashCommand) -> BotReply {
    let ctx = match state.tokens.authorize(&invocation.team).await {
        Ok(ctx) => ctx,
        Err(TokenError::NotInstalled(_)) => {
            return BotReply::ephemeral("lockbot is not installed in this workspace")
        }
        Err(e) => {
            warn!("Authorization failed for team {}: {}", invocation.team, e);
            return BotReply::ephemeral("Something went wrong, please try again");
        }
    };

    let command = match BotCommand::parse(&invocation.command, &invocation.text) {
        Ok(command) => command,
        Err(usage) => return BotReply::ephemeral(usage),
    };

    let user = invocation.user.as_str();
    match command {
        BotCommand::List => match state.locks.list(&ctx.team, &invocation.channel).await {
            Ok(locks) => BotReply::list(&locks),
            Err(e) => BotReply::lock_error(&e, "", user),
        },
        BotCommand::Lock { name, ttl, note } => {
            let result = match LockKey::new(&ctx.team, &invocation.channel, &name) {
                Ok(key) => state.locks.acquire(&key, user, ttl, note.as_deref()).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(lock) => BotReply::acquired(&lock),
                Err(e) => BotReply::lock_error(&e, &name, user),
            }
        }
        BotCommand::Unlock { name, force } => {
            if force && !(ctx.admin || state.slack.allow_chat_force) {
                return BotReply::ephemeral("Forced unlock is disabled in this workspace");
            }
            let result = match LockKey::new(&ctx.team, &invocation.channel, &name) {
                Ok(key) => state.locks.release(&key, user, force).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(lock) => BotReply::released(&lock, user),
                Err(e) => BotReply::lock_error(&e, &name, user),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_command_from_form() {
        let body = b"token=x&team_id=T1&channel_id=C1&user_id=U1&command=%2Flock&text=staging+2h";
        let invocation = SlashCommand::from_form(body).unwrap();
        assert_eq!(invocation.team, "T1");
        assert_eq!(invocation.command, "/lock");
        assert_eq!(invocation.text, "staging 2h");

        assert!(SlashCommand::from_form(b"team_id=T1").is_err());
    }

    #[test]
    fn test_event_payloads() {
        let event: SlackEvent =
            serde_json::from_str(r#"{"type":"url_verification","challenge":"abc","token":"t"}"#)
                .unwrap();
        assert!(matches!(event, SlackEvent::UrlVerification { challenge } if challenge == "abc"));

        let event: SlackEvent = serde_json::from_str(
            r#"{"type":"event_callback","team_id":"T1","event":{"type":"app_uninstalled"}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            SlackEvent::EventCallback {
                event: InnerEvent::AppUninstalled,
                ..
            }
        ));

        let event: SlackEvent = serde_json::from_str(
            r#"{"type":"event_callback","team_id":"T1","event":{"type":"message","text":"hi"}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            SlackEvent::EventCallback {
                event: InnerEvent::Other,
                ..
            }
        ));

        let event: SlackEvent = serde_json::from_str(r#"{"type":"app_rate_limited"}"#).unwrap();
        assert!(matches!(event, SlackEvent::Unsupported));
    }
}
