//! REST lock API.
//!
//! Every route is scoped to `/api/teams/{team}/channels/{channel}` and
//! requires `Authorization: Bearer <team access token>`.

use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use lockbot_core::{Lock, LockKey, TeamContext};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ApiError, Result};
use crate::handlers::AppState;

/// Wire shape of a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockBody {
    pub name: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl From<&Lock> for LockBody {
    fn from(lock: &Lock) -> Self {
        Self {
            name: lock.name.clone(),
            holder: lock.holder.clone(),
            acquired_at: lock.acquired_at,
            expires_at: lock.expires_at,
            note: lock.note.clone(),
        }
    }
}

/// POST body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireBody {
    pub name: String,
    pub holder: String,
    pub ttl_seconds: Option<u64>,
    pub note: Option<String>,
}

/// DELETE query.
#[derive(Debug, Deserialize)]
pub struct ReleaseQuery {
    pub holder: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug)]
pub enum ApiRequest {
    List {
        channel: String,
    },
    Acquire {
        channel: String,
        body: AcquireBody,
    },
    Get {
        channel: String,
        name: String,
    },
    Release {
        channel: String,
        name: String,
        holder: Option<String>,
        force: bool,
    },
}

#[derive(Debug)]
pub enum ApiResponse {
    Locks(Vec<Lock>),
    Created(Lock),
    Lock(Lock),
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Locks(locks) => {
                Json(locks.iter().map(LockBody::from).collect::<Vec<_>>()).into_response()
            }
            ApiResponse::Created(lock) => {
                (StatusCode::CREATED, Json(LockBody::from(&lock))).into_response()
            }
            ApiResponse::Lock(lock) => Json(LockBody::from(&lock)).into_response(),
        }
    }
}

/// Run one API request for an authorized team.
pub async fn dispatch(state: &AppState, ctx: &TeamContext, request: ApiRequest) -> Result<ApiResponse> {
    let team = ctx.team.as_str();
    match request {
        ApiRequest::List { channel } => Ok(ApiResponse::Locks(
            state.locks.list(team, &channel).await?,
        )),
        ApiRequest::Acquire { channel, body } => {
            let key = LockKey::new(team, &channel, &body.name)?;
            let lock = state
                .locks
                .acquire(
                    &key,
                    &body.holder,
                    body.ttl_seconds.map(Duration::from_secs),
                    body.note.as_deref(),
                )
                .await?;
            Ok(ApiResponse::Created(lock))
        }
        ApiRequest::Get { channel, name } => {
            let key = LockKey::new(team, &channel, &name)?;
            Ok(ApiResponse::Lock(state.locks.get(&key).await?))
        }
        ApiRequest::Release {
            channel,
            name,
            holder,
            force,
        } => {
            let key = LockKey::new(team, &channel, &name)?;
            let force = force && ctx.admin;
            let requester = match holder {
                Some(holder) => holder,
                None if force => "api".to_string(),
                None => return Err(ApiError::BadRequest("holder is required".into())),
            };
            Ok(ApiResponse::Lock(
                state.locks.release(&key, &requester, force).await?,
            ))
        }
    }
}

/// Extract Bearer token from Authorization header.
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

async fn authenticate(state: &AppState, headers: &HeaderMap, team: &str) -> Result<TeamContext> {
    let token = extract_bearer_token(headers).ok_or(ApiError::Unauthorized)?;
    let ctx = state.tokens.authorize_bearer(team, token).await?;
    debug!("Authenticated API request for team {}", ctx.team);
    Ok(ctx)
}

/// GET /api/teams/{team}/channels/{channel}/locks
pub async fn list_locks(
    State(state): State<AppState>,
    Path((team, channel)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<ApiResponse> {
    let ctx = authenticate(&state, &headers, &team).await?;
    dispatch(&state, &ctx, ApiRequest::List { channel }).await
}

/// POST /api/teams/{team}/channels/{channel}/locks
pub async fn acquire_lock(
    State(state): State<AppState>,
    Path((team, channel)): Path<(String, String)>,
    headers: HeaderMap,
    payload: std::result::Result<Json<AcquireBody>, JsonRejection>,
) -> Result<ApiResponse> {
    let ctx = authenticate(&state, &headers, &team).await?;
    let Json(body) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    dispatch(&state, &ctx, ApiRequest::Acquire { channel, body }).await
}

/// GET /api/teams/{team}/channels/{channel}/locks/{lock}
pub async fn get_lock(
    State(state): State<AppState>,
    Path((team, channel, name)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<ApiResponse> {
    let ctx = authenticate(&state, &headers, &team).await?;
    dispatch(&state, &ctx, ApiRequest::Get { channel, name }).await
}

/// DELETE /api/teams/{team}/channels/{channel}/locks/{lock}?holder=X&force=bool
pub async fn release_lock(
    State(state): State<AppState>,
    Path((team, channel, name)): Path<(String, String, String)>,
    Query(query): Query<ReleaseQuery>,
    headers: HeaderMap,
) -> Result<ApiResponse> {
    let ctx = authenticate(&state, &headers, &team).await?;
    dispatch(
        &state,
        &ctx,
        ApiRequest::Release {
            channel,
            name,
            holder: query.holder,
            force: query.force,
        },
    )
    .await
}
