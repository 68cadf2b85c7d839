//! Raw key-value backend abstraction.
//!
//! A backend stores [`Item`]s in two logical tables and must apply every
//! conditional operation atomically for a single key. [`Condition::evaluate`]
//! is the reference semantics each backend has to reproduce.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::BackendError;
use crate::model::attr;

pub use memory::MemoryBackend;

/// A persisted record: attribute name to JSON value.
pub type Item = serde_json::Map<String, Value>;

/// Logical tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Lock records keyed by `team#channel#name`.
    Locks,
    /// Installation records keyed by team.
    Installations,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Locks => "locks",
            Table::Installations => "installations",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicate on the current record that a conditional write requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Unconditional.
    Always,
    /// No record, or the record's `expiresAt` is before `now`.
    AbsentOrExpired { now: DateTime<Utc> },
    /// A live record whose `holder` equals `holder`.
    HeldBy { holder: String, now: DateTime<Utc> },
    /// Any live record.
    Live { now: DateTime<Utc> },
    /// A record whose `expiresAt` is before `now`.
    Expired { now: DateTime<Utc> },
}

impl Condition {
    /// Whether the condition holds for `current` (`None` = no record).
    pub fn evaluate(&self, current: Option<&Item>) -> bool {
        match self {
            Condition::Always => true,
            Condition::AbsentOrExpired { now } => match current {
                None => true,
                Some(item) => is_expired(item, *now),
            },
            Condition::HeldBy { holder, now } => current.is_some_and(|item| {
                item.get(attr::HOLDER).and_then(Value::as_str) == Some(holder.as_str())
                    && !is_expired(item, *now)
            }),
            Condition::Live { now } => current.is_some_and(|item| !is_expired(item, *now)),
            Condition::Expired { now } => current.is_some_and(|item| is_expired(item, *now)),
        }
    }
}

fn is_expired(item: &Item, now: DateTime<Utc>) -> bool {
    item.get(attr::EXPIRES_AT)
        .and_then(Value::as_i64)
        .is_some_and(|exp| exp < now.timestamp_millis())
}

/// Key-value backend with single-key conditional writes.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Returns the backend identifier (e.g., "memory", "dynamodb").
    fn backend_name(&self) -> &'static str;

    /// Read a record.
    async fn get(&self, table: Table, key: &str) -> Result<Option<Item>, BackendError>;

    /// Write `item` under `key` if `condition` holds for the current record.
    async fn put(
        &self,
        table: Table,
        key: &str,
        item: Item,
        condition: &Condition,
    ) -> Result<(), BackendError>;

    /// Delete the record under `key` if `condition` holds, returning it.
    ///
    /// Deleting a missing key under [`Condition::Always`] returns `Ok(None)`.
    async fn delete(
        &self,
        table: Table,
        key: &str,
        condition: &Condition,
    ) -> Result<Option<Item>, BackendError>;

    /// All records whose key starts with `prefix`, in any order.
    async fn query(&self, table: Table, prefix: &str) -> Result<Vec<Item>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(holder: &str, expires_at: Option<i64>) -> Item {
        let mut item = Item::new();
        item.insert(attr::HOLDER.into(), Value::from(holder));
        if let Some(exp) = expires_at {
            item.insert(attr::EXPIRES_AT.into(), Value::from(exp));
        }
        item
    }

    fn at(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_absent_or_expired() {
        let cond = Condition::AbsentOrExpired { now: at(1_000) };
        assert!(cond.evaluate(None));
        assert!(cond.evaluate(Some(&item("a", Some(999)))));
        assert!(!cond.evaluate(Some(&item("a", Some(1_000)))));
        assert!(!cond.evaluate(Some(&item("a", None))));
    }

    #[test]
    fn test_held_by_requires_live_record() {
        let cond = Condition::HeldBy {
            holder: "alice".into(),
            now: at(1_000),
        };
        assert!(!cond.evaluate(None));
        assert!(cond.evaluate(Some(&item("alice", None))));
        assert!(cond.evaluate(Some(&item("alice", Some(5_000)))));
        assert!(!cond.evaluate(Some(&item("alice", Some(10)))));
        assert!(!cond.evaluate(Some(&item("bob", None))));
    }

    #[test]
    fn test_live_and_expired_are_complementary_for_existing_records() {
        let now = at(1_000);
        for record in [item("a", None), item("a", Some(1)), item("a", Some(9_999))] {
            let live = Condition::Live { now }.evaluate(Some(&record));
            let expired = Condition::Expired { now }.evaluate(Some(&record));
            assert_ne!(live, expired);
        }
        assert!(!Condition::Live { now }.evaluate(None));
        assert!(!Condition::Expired { now }.evaluate(None));
        assert!(Condition::Always.evaluate(None));
    }
}
