use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, instrument};

use super::{Condition, Item, KvBackend, Table};
use crate::error::BackendError;

/// In-process backend for local runs and tests.
///
/// Each conditional operation evaluates its predicate and mutates the record
/// while holding the shard lock for that key, which gives the same single-key
/// check-and-set guarantee a remote store provides.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    items: DashMap<(Table, String), Item>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records stored in `table`, expired ones included.
    pub fn len(&self, table: Table) -> usize {
        self.items.iter().filter(|entry| entry.key().0 == table).count()
    }

    pub fn is_empty(&self, table: Table) -> bool {
        self.len(table) == 0
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, table: Table, key: &str) -> Result<Option<Item>, BackendError> {
        Ok(self
            .items
            .get(&(table, key.to_string()))
            .map(|entry| entry.value().clone()))
    }

    #[instrument(skip(self, item), level = "debug")]
    async fn put(
        &self,
        table: Table,
        key: &str,
        item: Item,
        condition: &Condition,
    ) -> Result<(), BackendError> {
        match self.items.entry((table, key.to_string())) {
            Entry::Occupied(mut entry) => {
                if !condition.evaluate(Some(entry.get())) {
                    debug!("Conditional put on {}/{} rejected", table, key);
                    return Err(BackendError::ConditionFailed);
                }
                entry.insert(item);
            }
            Entry::Vacant(entry) => {
                if !condition.evaluate(None) {
                    debug!("Conditional put on {}/{} rejected (absent)", table, key);
                    return Err(BackendError::ConditionFailed);
                }
                entry.insert(item);
            }
        }
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete(
        &self,
        table: Table,
        key: &str,
        condition: &Condition,
    ) -> Result<Option<Item>, BackendError> {
        match self.items.entry((table, key.to_string())) {
            Entry::Occupied(entry) => {
                if !condition.evaluate(Some(entry.get())) {
                    debug!("Conditional delete on {}/{} rejected", table, key);
                    return Err(BackendError::ConditionFailed);
                }
                Ok(Some(entry.remove()))
            }
            Entry::Vacant(_) => {
                if condition.evaluate(None) {
                    Ok(None)
                } else {
                    Err(BackendError::ConditionFailed)
                }
            }
        }
    }

    async fn query(&self, table: Table, prefix: &str) -> Result<Vec<Item>, BackendError> {
        Ok(self
            .items
            .iter()
            .filter(|entry| entry.key().0 == table && entry.key().1.starts_with(prefix))
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::attr;
    use chrono::Utc;
    use serde_json::Value;

    fn holder_item(holder: &str) -> Item {
        let mut item = Item::new();
        item.insert(attr::HOLDER.into(), Value::from(holder));
        item
    }

    #[tokio::test]
    async fn test_put_respects_condition() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        let cond = Condition::AbsentOrExpired { now };

        backend
            .put(Table::Locks, "k", holder_item("a"), &cond)
            .await
            .unwrap();
        let second = backend.put(Table::Locks, "k", holder_item("b"), &cond).await;
        assert_eq!(second, Err(BackendError::ConditionFailed));

        let stored = backend.get(Table::Locks, "k").await.unwrap().unwrap();
        assert_eq!(stored[attr::HOLDER], Value::from("a"));
    }

    #[tokio::test]
    async fn test_delete_returns_old_record() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend
            .put(Table::Locks, "k", holder_item("a"), &Condition::Always)
            .await
            .unwrap();

        let wrong = Condition::HeldBy {
            holder: "b".into(),
            now,
        };
        assert_eq!(
            backend.delete(Table::Locks, "k", &wrong).await,
            Err(BackendError::ConditionFailed)
        );

        let right = Condition::HeldBy {
            holder: "a".into(),
            now,
        };
        let old = backend.delete(Table::Locks, "k", &right).await.unwrap();
        assert_eq!(old.unwrap()[attr::HOLDER], Value::from("a"));
        assert!(backend.get(Table::Locks, "k").await.unwrap().is_none());

        // Missing key: unconditional delete is a no-op, conditional fails
        assert_eq!(
            backend.delete(Table::Locks, "k", &Condition::Always).await,
            Ok(None)
        );
        assert_eq!(
            backend.delete(Table::Locks, "k", &right).await,
            Err(BackendError::ConditionFailed)
        );
    }

    #[tokio::test]
    async fn test_tables_are_isolated() {
        let backend = MemoryBackend::new();
        backend
            .put(Table::Locks, "T1", holder_item("a"), &Condition::Always)
            .await
            .unwrap();
        assert!(backend.get(Table::Installations, "T1").await.unwrap().is_none());
        assert_eq!(backend.len(Table::Locks), 1);
        assert!(backend.is_empty(Table::Installations));
    }

    #[tokio::test]
    async fn test_query_by_prefix() {
        let backend = MemoryBackend::new();
        for key in ["t#c#a", "t#c#b", "t#cc#a", "u#c#a"] {
            backend
                .put(Table::Locks, key, holder_item(key), &Condition::Always)
                .await
                .unwrap();
        }
        let found = backend.query(Table::Locks, "t#c#").await.unwrap();
        assert_eq!(found.len(), 2);
    }
}
