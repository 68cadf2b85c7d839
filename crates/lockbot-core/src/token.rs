//! State tokens for the install redirect and per-team access tokens.
//!
//! A state token is `base64url(claims) "." base64url(hmac)`. Verification is
//! stateless apart from a nonce cache that rejects a second use while the
//! token is still within its validity window.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::SubsecRound;
use hmac::{Hmac, Mac};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use crate::adapter::StoreAdapter;
use crate::clock::Clock;
use crate::config::TokenSettings;
use crate::error::{LockError, StateTokenError, TokenError};
use crate::model::{validate_identifier, Installation};
use crate::store::{Condition, Table};

type HmacSha256 = Hmac<Sha256>;

/// Where the installer should land after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectContext {
    /// Team the install was started for, when known up front.
    pub team: Option<String>,
    pub redirect: String,
}

impl RedirectContext {
    /// Fails when the token was bound to a team other than `team`.
    pub fn check_team(&self, team: &str) -> Result<(), StateTokenError> {
        match self.team.as_deref() {
            Some(expected) if expected != team => Err(StateTokenError::TeamMismatch {
                expected: expected.to_string(),
                actual: team.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateClaims {
    nonce: String,
    iat: i64,
    exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    team: Option<String>,
    redirect: String,
}

/// Proof that a team has a stored installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamContext {
    pub team: String,
    pub scopes: Vec<String>,
    /// Whether the caller may force-release locks held by others.
    pub admin: bool,
}

#[derive(Clone)]
pub struct TokenManager {
    store: StoreAdapter,
    clock: Arc<dyn Clock>,
    signing_secret: Arc<[u8]>,
    state_token_ttl: Duration,
    nonces: Cache<String, ()>,
}

impl TokenManager {
    pub fn new(store: StoreAdapter, clock: Arc<dyn Clock>, settings: TokenSettings) -> Self {
        // No size cap: a used nonce stays until its token has expired.
        let nonces = Cache::builder()
            .time_to_live(settings.state_token_ttl)
            .build();

        Self {
            store,
            clock,
            signing_secret: settings.signing_secret.into(),
            state_token_ttl: settings.state_token_ttl,
            nonces,
        }
    }

    // =========================================================================
    // State tokens
    // =========================================================================

    /// Issue a signed state token for the install redirect.
    pub fn issue_state_token(
        &self,
        team: Option<&str>,
        redirect: &str,
    ) -> Result<String, TokenError> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(self.state_token_ttl)
            .map_err(|e| TokenError::Validation(format!("state token ttl: {e}")))?;
        let claims = StateClaims {
            nonce: uuid::Uuid::new_v4().to_string(),
            iat: now.timestamp_millis(),
            exp: (now + ttl).timestamp_millis(),
            team: team.map(str::to_string),
            redirect: redirect.to_string(),
        };

        let payload = serde_json::to_vec(&claims)
            .map_err(|e| TokenError::Validation(format!("state token claims: {e}")))?;
        let payload = URL_SAFE_NO_PAD.encode(payload);
        let signature = URL_SAFE_NO_PAD.encode(self.mac(payload.as_bytes())?.finalize().into_bytes());

        debug!("Issued state token (team: {:?})", claims.team);
        Ok(format!("{payload}.{signature}"))
    }

    /// Check a state token and consume its nonce.
    pub async fn verify_state_token(&self, token: &str) -> Result<RedirectContext, TokenError> {
        let (payload, signature) = token.split_once('.').ok_or(StateTokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| StateTokenError::Malformed)?;

        self.mac(payload.as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| StateTokenError::InvalidSignature)?;

        let claims: StateClaims = URL_SAFE_NO_PAD
            .decode(payload)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
            .ok_or(StateTokenError::Malformed)?;

        if self.clock.now().timestamp_millis() > claims.exp {
            debug!("State token expired");
            return Err(StateTokenError::Expired.into());
        }

        let entry = self.nonces.entry(claims.nonce).or_insert(()).await;
        if !entry.is_fresh() {
            warn!("State token replayed");
            return Err(StateTokenError::Replayed.into());
        }

        Ok(RedirectContext {
            team: claims.team,
            redirect: claims.redirect,
        })
    }

    fn mac(&self, payload: &[u8]) -> Result<HmacSha256, TokenError> {
        let mut mac = HmacSha256::new_from_slice(&self.signing_secret)
            .map_err(|e| TokenError::Validation(format!("signing secret: {e}")))?;
        mac.update(payload);
        Ok(mac)
    }

    // =========================================================================
    // Access tokens
    // =========================================================================

    /// Store a team's access token. A re-install keeps the original
    /// `installed_at` and records the rotation time.
    #[instrument(skip(self, token), level = "debug")]
    pub async fn store_access_token(
        &self,
        team: &str,
        token: &str,
        scopes: &[String],
        bot_user_id: Option<&str>,
    ) -> Result<Installation, TokenError> {
        let team = validate_team(team)?;
        if token.trim().is_empty() {
            return Err(TokenError::Validation("access token must not be empty".into()));
        }

        let now = self.clock.now().trunc_subsecs(3);
        let previous = self.find_installation(&team).await?;
        let installation = Installation {
            team: team.clone(),
            access_token: token.to_string(),
            scopes: scopes.to_vec(),
            bot_user_id: bot_user_id.map(str::to_string),
            installed_at: previous.as_ref().map_or(now, |p| p.installed_at),
            rotated_at: previous.as_ref().map(|_| now),
        };

        self.store
            .conditional_put(
                Table::Installations,
                &team,
                installation.to_item(),
                &Condition::Always,
            )
            .await?;

        if previous.is_some() {
            info!("Rotated access token for team {} ({})", team, fingerprint(token));
        } else {
            info!("Installed team {} ({})", team, fingerprint(token));
        }
        Ok(installation)
    }

    /// The stored installation of `team`.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_access_token(&self, team: &str) -> Result<Installation, TokenError> {
        let team = validate_team(team)?;
        self.find_installation(&team)
            .await?
            .ok_or(TokenError::NotInstalled(team))
    }

    /// Remove a team's installation. Returns whether one existed.
    #[instrument(skip(self), level = "debug")]
    pub async fn revoke_access_token(&self, team: &str) -> Result<bool, TokenError> {
        let team = validate_team(team)?;
        let removed = self
            .store
            .conditional_delete(Table::Installations, &team, &Condition::Always)
            .await?;
        if removed.is_some() {
            info!("Revoked installation of team {}", team);
        }
        Ok(removed.is_some())
    }

    /// Authorization for chat requests: the team must be installed.
    pub async fn authorize(&self, team: &str) -> Result<TeamContext, TokenError> {
        let installation = self.get_access_token(team).await?;
        Ok(TeamContext {
            team: installation.team,
            scopes: installation.scopes,
            admin: false,
        })
    }

    /// Authorization for API requests: the team must be installed and
    /// `presented` must equal its access token. Holders of the team token
    /// are admins.
    pub async fn authorize_bearer(
        &self,
        team: &str,
        presented: &str,
    ) -> Result<TeamContext, TokenError> {
        let installation = self.get_access_token(team).await?;
        if !digests_match(&hash_token(presented), &hash_token(&installation.access_token)) {
            warn!("Rejected bearer token for team {}", installation.team);
            return Err(TokenError::InvalidToken);
        }
        Ok(TeamContext {
            team: installation.team,
            scopes: installation.scopes,
            admin: true,
        })
    }

    async fn find_installation(&self, team: &str) -> Result<Option<Installation>, TokenError> {
        match self.store.get(Table::Installations, team).await? {
            Some(item) => Ok(Some(Installation::from_item(&item)?)),
            None => Ok(None),
        }
    }
}

/// SHA-256 of a token, so comparisons never run over the raw secret.
fn hash_token(token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

/// Compares every byte regardless of where the first difference is.
fn digests_match(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Short hex prefix of the token hash, safe to log.
fn fingerprint(token: &str) -> String {
    hex::encode(&hash_token(token)[..4])
}

fn validate_team(team: &str) -> Result<String, TokenError> {
    validate_identifier("team", team).map_err(|e| match e {
        LockError::Validation(msg) => TokenError::Validation(msg),
        other => TokenError::Validation(other.to_string()),
    })
}
