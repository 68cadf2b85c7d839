//! Slash command parsing and reply formatting.
//!
//! Supported commands:
//! - `/lock <name> [ttl] [note...]` with ttl like `90s`, `30m`, `2h`, `1d`
//! - `/unlock <name> [force]`
//! - `/locks`

use std::time::Duration;

use lockbot_core::{Lock, LockError};
use serde::Serialize;

const LOCK_USAGE: &str = "Usage: `/lock <name> [ttl] [note]`, e.g. `/lock staging 2h deploying v2`";
const UNLOCK_USAGE: &str = "Usage: `/unlock <name> [force]`";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Lock {
        name: String,
        ttl: Option<Duration>,
        note: Option<String>,
    },
    Unlock {
        name: String,
        force: bool,
    },
    List,
}

impl BotCommand {
    /// Parse a slash command. `Err` carries the usage text to send back.
    pub fn parse(command: &str, text: &str) -> Result<Self, String> {
        let mut words = text.split_whitespace();
        match command.trim() {
            "/lock" => {
                let name = words.next().ok_or(LOCK_USAGE)?.to_string();
                let rest: Vec<&str> = words.collect();
                let (ttl, note_words) = match rest.split_first() {
                    Some((first, tail)) => match parse_ttl(first) {
                        Some(ttl) => (Some(ttl), tail),
                        None => (None, rest.as_slice()),
                    },
                    None => (None, rest.as_slice()),
                };
                let note = (!note_words.is_empty()).then(|| note_words.join(" "));
                Ok(BotCommand::Lock { name, ttl, note })
            }
            "/unlock" => {
                let name = words.next().ok_or(UNLOCK_USAGE)?.to_string();
                let force = match words.next() {
                    None => false,
                    Some(word) if word.eq_ignore_ascii_case("force") => true,
                    Some(_) => return Err(UNLOCK_USAGE.to_string()),
                };
                if words.next().is_some() {
                    return Err(UNLOCK_USAGE.to_string());
                }
                Ok(BotCommand::Unlock { name, force })
            }
            "/locks" => Ok(BotCommand::List),
            other => Err(format!("Unknown command `{other}`")),
        }
    }
}

/// `90s`, `30m`, `2h`, `1d`.
pub fn parse_ttl(value: &str) -> Option<Duration> {
    let unit = value.chars().last()?;
    let amount: u64 = value[..value.len() - unit.len_utf8()].parse().ok()?;
    let seconds = match unit {
        's' => amount,
        'm' => amount.checked_mul(60)?,
        'h' => amount.checked_mul(60 * 60)?,
        'd' => amount.checked_mul(24 * 60 * 60)?,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    InChannel,
    Ephemeral,
}

/// Slack message payload returned from a slash command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BotReply {
    pub response_type: ResponseType,
    pub text: String,
}

impl BotReply {
    pub fn in_channel(text: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::InChannel,
            text: text.into(),
        }
    }

    pub fn ephemeral(text: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::Ephemeral,
            text: text.into(),
        }
    }

    pub fn acquired(lock: &Lock) -> Self {
        let mut text = format!("<@{}> locked `{}`", lock.holder, lock.name);
        if let Some(expires_at) = lock.expires_at {
            text.push_str(&format!(" until {}", format_time(expires_at)));
        }
        if let Some(note) = &lock.note {
            text.push_str(&format!(": {note}"));
        }
        Self::in_channel(text)
    }

    pub fn released(lock: &Lock, by: &str) -> Self {
        if lock.holder == by {
            Self::in_channel(format!("<@{}> unlocked `{}`", by, lock.name))
        } else {
            Self::in_channel(format!(
                "<@{}> force-unlocked `{}` (was held by <@{}>)",
                by, lock.name, lock.holder
            ))
        }
    }

    pub fn list(locks: &[Lock]) -> Self {
        if locks.is_empty() {
            return Self::ephemeral("No active locks in this channel");
        }
        let lines: Vec<String> = locks
            .iter()
            .map(|lock| {
                let mut line = format!("• `{}` <@{}>", lock.name, lock.holder);
                if let Some(expires_at) = lock.expires_at {
                    line.push_str(&format!(" until {}", format_time(expires_at)));
                }
                if let Some(note) = &lock.note {
                    line.push_str(&format!(": {note}"));
                }
                line
            })
            .collect();
        Self::ephemeral(lines.join("\n"))
    }

    /// Reply for a failed lock operation on `name` requested by `user`.
    pub fn lock_error(err: &LockError, name: &str, user: &str) -> Self {
        let text = match err {
            LockError::Conflict(current) if current.holder == user => {
                format!("You already hold `{name}`")
            }
            LockError::Conflict(current) => format!(
                "`{}` is locked by <@{}> since {}",
                name,
                current.holder,
                format_time(current.acquired_at)
            ),
            LockError::NotFound => format!("`{name}` is not locked"),
            LockError::Forbidden { holder } => format!(
                "`{name}` is locked by <@{holder}>. Use `/unlock {name} force` to take it anyway"
            ),
            LockError::Validation(msg) => format!("Invalid request: {msg}"),
            LockError::StoreUnavailable(_) | LockError::Store(_) => {
                "Something went wrong, please try again".to_string()
            }
        };
        Self::ephemeral(text)
    }
}

fn format_time(time: chrono::DateTime<chrono::Utc>) -> String {
    time.format("%Y-%m-%d %H:%M UTC").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn lock(holder: &str) -> Lock {
        Lock {
            team: "T1".into(),
            channel: "C1".into(),
            name: "staging".into(),
            holder: holder.into(),
            acquired_at: chrono::Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
            expires_at: None,
            note: None,
        }
    }

    #[test]
    fn test_parse_lock() {
        assert_eq!(
            BotCommand::parse("/lock", "staging 2h deploying v2"),
            Ok(BotCommand::Lock {
                name: "staging".into(),
                ttl: Some(Duration::from_secs(7200)),
                note: Some("deploying v2".into()),
            })
        );
        assert_eq!(
            BotCommand::parse("/lock", "  staging  "),
            Ok(BotCommand::Lock {
                name: "staging".into(),
                ttl: None,
                note: None,
            })
        );
        assert_eq!(
            BotCommand::parse("/lock", "staging hotfix in progress"),
            Ok(BotCommand::Lock {
                name: "staging".into(),
                ttl: None,
                note: Some("hotfix in progress".into()),
            })
        );
        assert!(BotCommand::parse("/lock", "").is_err());
    }

    #[test]
    fn test_parse_unlock_and_list() {
        assert_eq!(
            BotCommand::parse("/unlock", "staging"),
            Ok(BotCommand::Unlock {
                name: "staging".into(),
                force: false,
            })
        );
        assert_eq!(
            BotCommand::parse("/unlock", "staging FORCE"),
            Ok(BotCommand::Unlock {
                name: "staging".into(),
                force: true,
            })
        );
        assert!(BotCommand::parse("/unlock", "staging please").is_err());
        assert!(BotCommand::parse("/unlock", "").is_err());
        assert_eq!(BotCommand::parse("/locks", "whatever"), Ok(BotCommand::List));
        assert!(BotCommand::parse("/deploy", "").is_err());
    }

    #[test]
    fn test_parse_ttl() {
        assert_eq!(parse_ttl("90s"), Some(Duration::from_secs(90)));
        assert_eq!(parse_ttl("30m"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_ttl("1d"), Some(Duration::from_secs(86400)));
        assert_eq!(parse_ttl("2w"), None);
        assert_eq!(parse_ttl("h"), None);
        assert_eq!(parse_ttl("-1h"), None);
        assert_eq!(parse_ttl("é"), None);
        assert_eq!(parse_ttl(&format!("{}d", u64::MAX)), None);
    }

    #[test]
    fn test_replies() {
        let reply = BotReply::acquired(&lock("U1"));
        assert_eq!(reply.response_type, ResponseType::InChannel);
        assert_eq!(reply.text, "<@U1> locked `staging`");

        let reply = BotReply::released(&lock("U1"), "U2");
        assert!(reply.text.contains("force-unlocked"));

        let reply = BotReply::lock_error(&LockError::Conflict(Box::new(lock("U1"))), "staging", "U2");
        assert_eq!(reply.response_type, ResponseType::Ephemeral);
        assert_eq!(reply.text, "`staging` is locked by <@U1> since 2024-03-01 09:30 UTC");

        let reply = BotReply::lock_error(&LockError::Conflict(Box::new(lock("U1"))), "staging", "U1");
        assert_eq!(reply.text, "You already hold `staging`");

        assert_eq!(
            serde_json::to_value(BotReply::list(&[])).unwrap(),
            serde_json::json!({
                "response_type": "ephemeral",
                "text": "No active locks in this channel"
            })
        );
    }
}
