use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LockError, StoreError};
use crate::store::Item;

/// Persisted attribute names.
pub mod attr {
    pub const TEAM: &str = "team";
    pub const CHANNEL: &str = "channel";
    pub const NAME: &str = "name";
    pub const HOLDER: &str = "holder";
    pub const ACQUIRED_AT: &str = "acquiredAt";
    pub const EXPIRES_AT: &str = "expiresAt";
    pub const NOTE: &str = "note";
    /// Per-acquire marker; never surfaced on `Lock`.
    pub const WRITE_ID: &str = "writeId";
    pub const ACCESS_TOKEN: &str = "accessToken";
    pub const SCOPES: &str = "scopes";
    pub const BOT_USER_ID: &str = "botUserId";
    pub const INSTALLED_AT: &str = "installedAt";
    pub const ROTATED_AT: &str = "rotatedAt";
}

const MAX_IDENTIFIER_LEN: usize = 128;
const MAX_NOTE_LEN: usize = 512;

/// Fully qualified lock identity: `(team, channel, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    team: String,
    channel: String,
    name: String,
}

impl LockKey {
    /// Validate and build a key.
    pub fn new(team: &str, channel: &str, name: &str) -> Result<Self, LockError> {
        let team = validate_identifier("team", team)?;
        let channel = validate_identifier("channel", channel)?;
        let name = validate_identifier("lock name", name)?;
        if name.chars().any(char::is_whitespace) {
            return Err(LockError::Validation(
                "lock name must not contain whitespace".into(),
            ));
        }
        Ok(Self {
            team,
            channel,
            name,
        })
    }

    pub fn team(&self) -> &str {
        &self.team
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store key `team#channel#name` with each component percent-encoded.
    pub fn storage_key(&self) -> String {
        format!(
            "{}{}",
            channel_prefix(&self.team, &self.channel),
            urlencoding::encode(&self.name)
        )
    }
}

impl std::fmt::Display for LockKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.team, self.channel, self.name)
    }
}

/// Key prefix shared by every lock of a `(team, channel)`.
pub fn channel_prefix(team: &str, channel: &str) -> String {
    format!(
        "{}#{}#",
        urlencoding::encode(team),
        urlencoding::encode(channel)
    )
}

/// Trim and check an identifier (team, channel, lock name or holder).
pub fn validate_identifier(what: &str, value: &str) -> Result<String, LockError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LockError::Validation(format!("{what} must not be empty")));
    }
    if trimmed.chars().count() > MAX_IDENTIFIER_LEN {
        return Err(LockError::Validation(format!(
            "{what} must be at most {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(LockError::Validation(format!(
            "{what} must not contain control characters"
        )));
    }
    Ok(trimmed.to_string())
}

pub(crate) fn validate_note(note: Option<&str>) -> Result<Option<String>, LockError> {
    let Some(note) = note.map(str::trim).filter(|n| !n.is_empty()) else {
        return Ok(None);
    };
    if note.chars().count() > MAX_NOTE_LEN {
        return Err(LockError::Validation(format!(
            "note must be at most {MAX_NOTE_LEN} characters"
        )));
    }
    Ok(Some(note.to_string()))
}

pub(crate) fn validate_ttl(ttl: Duration, max: Duration) -> Result<chrono::Duration, LockError> {
    if ttl < Duration::from_secs(1) {
        return Err(LockError::Validation("ttl must be at least one second".into()));
    }
    if ttl > max {
        return Err(LockError::Validation(format!(
            "ttl must not exceed {} seconds",
            max.as_secs()
        )));
    }
    chrono::Duration::from_std(ttl).map_err(|e| LockError::Validation(format!("ttl: {e}")))
}

/// An acquired lock. Every state change replaces the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub team: String,
    pub channel: String,
    pub name: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub note: Option<String>,
}

impl Lock {
    /// `true` once `expires_at` lies strictly in the past, compared at the
    /// millisecond precision records are stored with.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .is_some_and(|exp| exp.timestamp_millis() < now.timestamp_millis())
    }

    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(attr::TEAM.into(), Value::from(self.team.clone()));
        item.insert(attr::CHANNEL.into(), Value::from(self.channel.clone()));
        item.insert(attr::NAME.into(), Value::from(self.name.clone()));
        item.insert(attr::HOLDER.into(), Value::from(self.holder.clone()));
        item.insert(
            attr::ACQUIRED_AT.into(),
            Value::from(self.acquired_at.timestamp_millis()),
        );
        if let Some(expires_at) = self.expires_at {
            item.insert(
                attr::EXPIRES_AT.into(),
                Value::from(expires_at.timestamp_millis()),
            );
        }
        if let Some(note) = &self.note {
            item.insert(attr::NOTE.into(), Value::from(note.clone()));
        }
        item
    }

    pub fn from_item(item: &Item) -> Result<Self, StoreError> {
        Ok(Self {
            team: required_str(item, attr::TEAM)?,
            channel: required_str(item, attr::CHANNEL)?,
            name: required_str(item, attr::NAME)?,
            holder: required_str(item, attr::HOLDER)?,
            acquired_at: required_millis(item, attr::ACQUIRED_AT)?,
            expires_at: optional_millis(item, attr::EXPIRES_AT)?,
            note: optional_str(item, attr::NOTE),
        })
    }
}

/// A team's installation: the OAuth access token and its metadata.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Installation {
    pub team: String,
    pub access_token: String,
    pub scopes: Vec<String>,
    pub bot_user_id: Option<String>,
    pub installed_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Installation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installation")
            .field("team", &self.team)
            .field("access_token", &"<redacted>")
            .field("scopes", &self.scopes)
            .field("bot_user_id", &self.bot_user_id)
            .field("installed_at", &self.installed_at)
            .field("rotated_at", &self.rotated_at)
            .finish()
    }
}

impl Installation {
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(attr::TEAM.into(), Value::from(self.team.clone()));
        item.insert(
            attr::ACCESS_TOKEN.into(),
            Value::from(self.access_token.clone()),
        );
        item.insert(
            attr::SCOPES.into(),
            Value::Array(self.scopes.iter().cloned().map(Value::from).collect()),
        );
        if let Some(bot_user_id) = &self.bot_user_id {
            item.insert(attr::BOT_USER_ID.into(), Value::from(bot_user_id.clone()));
        }
        item.insert(
            attr::INSTALLED_AT.into(),
            Value::from(self.installed_at.timestamp_millis()),
        );
        if let Some(rotated_at) = self.rotated_at {
            item.insert(
                attr::ROTATED_AT.into(),
                Value::from(rotated_at.timestamp_millis()),
            );
        }
        item
    }

    pub fn from_item(item: &Item) -> Result<Self, StoreError> {
        let scopes = match item.get(attr::SCOPES) {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        Ok(Self {
            team: required_str(item, attr::TEAM)?,
            access_token: required_str(item, attr::ACCESS_TOKEN)?,
            scopes,
            bot_user_id: optional_str(item, attr::BOT_USER_ID),
            installed_at: required_millis(item, attr::INSTALLED_AT)?,
            rotated_at: optional_millis(item, attr::ROTATED_AT)?,
        })
    }
}

fn required_str(item: &Item, name: &str) -> Result<String, StoreError> {
    item.get(name)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Serialization(format!("missing string attribute {name}")))
}

fn optional_str(item: &Item, name: &str) -> Option<String> {
    item.get(name).and_then(Value::as_str).map(str::to_string)
}

fn required_millis(item: &Item, name: &str) -> Result<DateTime<Utc>, StoreError> {
    optional_millis(item, name)?
        .ok_or_else(|| StoreError::Serialization(format!("missing timestamp attribute {name}")))
}

fn optional_millis(item: &Item, name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    match item.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let millis = value.as_i64().ok_or_else(|| {
                StoreError::Serialization(format!("attribute {name} is not an integer"))
            })?;
            Utc.timestamp_millis_opt(millis)
                .single()
                .map(Some)
                .ok_or_else(|| StoreError::Serialization(format!("attribute {name} out of range")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lock() -> Lock {
        let acquired_at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        Lock {
            team: "teamA".into(),
            channel: "#deploys".into(),
            name: "prod".into(),
            holder: "alice".into(),
            acquired_at,
            expires_at: Some(acquired_at + chrono::Duration::seconds(60)),
            note: Some("hotfix".into()),
        }
    }

    #[test]
    fn test_storage_key_escapes_separator() {
        let key = LockKey::new("teamA", "#deploys", "prod").unwrap();
        assert_eq!(key.storage_key(), "teamA#%23deploys#prod");

        // "a#b" + "c" and "a" + "b#c" must not collide
        let left = LockKey::new("a#b", "c", "x").unwrap();
        let right = LockKey::new("a", "b#c", "x").unwrap();
        assert_ne!(left.storage_key(), right.storage_key());
    }

    #[test]
    fn test_storage_key_starts_with_channel_prefix() {
        let key = LockKey::new("teamA", "#deploys", "staging-db").unwrap();
        assert!(key.storage_key().starts_with(&channel_prefix("teamA", "#deploys")));
        assert!(!key.storage_key().starts_with(&channel_prefix("teamA", "#deploy")));
    }

    #[test]
    fn test_lock_key_validation() {
        assert!(matches!(
            LockKey::new("", "c", "n"),
            Err(LockError::Validation(_))
        ));
        assert!(matches!(
            LockKey::new("t", "   ", "n"),
            Err(LockError::Validation(_))
        ));
        assert!(matches!(
            LockKey::new("t", "c", "two words"),
            Err(LockError::Validation(_))
        ));
        assert!(matches!(
            LockKey::new("t", "c", &"x".repeat(129)),
            Err(LockError::Validation(_))
        ));
        assert!(matches!(
            LockKey::new("t", "c\u{7}", "n"),
            Err(LockError::Validation(_))
        ));

        let key = LockKey::new(" t ", "c", " n").unwrap();
        assert_eq!(key.team(), "t");
        assert_eq!(key.name(), "n");
    }

    #[test]
    fn test_validate_ttl_bounds() {
        let max = Duration::from_secs(3600);
        assert!(validate_ttl(Duration::from_millis(500), max).is_err());
        assert!(validate_ttl(Duration::from_secs(3601), max).is_err());
        assert_eq!(
            validate_ttl(Duration::from_secs(90), max).unwrap(),
            chrono::Duration::seconds(90)
        );
    }

    #[test]
    fn test_validate_note_blank_is_none() {
        assert_eq!(validate_note(Some("   ")).unwrap(), None);
        assert_eq!(validate_note(Some(" hi ")).unwrap(), Some("hi".into()));
        assert!(validate_note(Some(&"n".repeat(513))).is_err());
    }

    #[test]
    fn test_lock_item_layout() {
        let lock = sample_lock();
        let item = lock.to_item();
        assert_eq!(item[attr::ACQUIRED_AT], Value::from(1_700_000_000_123i64));
        assert_eq!(item[attr::EXPIRES_AT], Value::from(1_700_000_060_123i64));
        assert_eq!(Lock::from_item(&item).unwrap(), lock);

        let mut no_ttl = lock.clone();
        no_ttl.expires_at = None;
        no_ttl.note = None;
        let item = no_ttl.to_item();
        assert!(!item.contains_key(attr::EXPIRES_AT));
        assert!(!item.contains_key(attr::NOTE));
        assert_eq!(Lock::from_item(&item).unwrap(), no_ttl);
    }

    #[test]
    fn test_lock_from_malformed_item() {
        let mut item = sample_lock().to_item();
        item.insert(attr::ACQUIRED_AT.into(), Value::from("yesterday"));
        assert!(matches!(
            Lock::from_item(&item),
            Err(StoreError::Serialization(_))
        ));

        item.remove(attr::HOLDER);
        assert!(matches!(
            Lock::from_item(&item),
            Err(StoreError::Serialization(_))
        ));
    }

    #[test]
    fn test_is_expired_is_strict() {
        let lock = sample_lock();
        let exp = lock.expires_at.unwrap();
        assert!(!lock.is_expired(exp));
        assert!(lock.is_expired(exp + chrono::Duration::milliseconds(1)));

        let mut forever = lock;
        forever.expires_at = None;
        assert!(!forever.is_expired(exp + chrono::Duration::days(365)));
    }

    #[test]
    fn test_installation_debug_redacts_token() {
        let installation = Installation {
            team: "T1".into(),
            access_token: "xoxb-secret".into(),
            scopes: vec!["commands".into()],
            bot_user_id: None,
            installed_at: Utc::now(),
            rotated_at: None,
        };
        let rendered = format!("{installation:?}");
        assert!(!rendered.contains("xoxb-secret"));
        assert_eq!(
            Installation::from_item(&installation.to_item()).unwrap().team,
            "T1"
        );
    }
}
