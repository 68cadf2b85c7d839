//! Store adapter: retries, read-on-conflict and error translation on top of a
//! raw [`KvBackend`].

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::config::RetryPolicy;
use crate::error::{BackendError, StoreError};
use crate::store::{Condition, Item, KvBackend, Table};

#[derive(Clone)]
pub struct StoreAdapter {
    backend: Arc<dyn KvBackend>,
    retry: RetryPolicy,
}

impl StoreAdapter {
    pub fn new(backend: Arc<dyn KvBackend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, table: Table, key: &str) -> Result<Option<Item>, StoreError> {
        self.with_retry("get", || self.backend.get(table, key))
            .await
            .map_err(|e| self.translate(e))
    }

    /// Put `item` if `condition` holds. On a failed predicate, returns
    /// [`StoreError::Conflict`] with the record that is there now.
    #[instrument(skip(self, item), level = "debug")]
    pub async fn conditional_put(
        &self,
        table: Table,
        key: &str,
        item: Item,
        condition: &Condition,
    ) -> Result<(), StoreError> {
        let result = self
            .with_retry("put", || self.backend.put(table, key, item.clone(), condition))
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(BackendError::ConditionFailed) => Err(self.conflict(table, key).await),
            Err(e) => Err(self.translate(e)),
        }
    }

    /// Delete if `condition` holds and return the removed record.
    #[instrument(skip(self), level = "debug")]
    pub async fn conditional_delete(
        &self,
        table: Table,
        key: &str,
        condition: &Condition,
    ) -> Result<Option<Item>, StoreError> {
        let result = self
            .with_retry("delete", || self.backend.delete(table, key, condition))
            .await;
        match result {
            Ok(old) => Ok(old),
            Err(BackendError::ConditionFailed) => Err(self.conflict(table, key).await),
            Err(e) => Err(self.translate(e)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn query(&self, table: Table, prefix: &str) -> Result<Vec<Item>, StoreError> {
        self.with_retry("query", || self.backend.query(table, prefix))
            .await
            .map_err(|e| self.translate(e))
    }

    /// Single read after a failed predicate.
    async fn conflict(&self, table: Table, key: &str) -> StoreError {
        match self.get(table, key).await {
            Ok(current) => {
                debug!(
                    "Conditional write on {}/{} lost (record present: {})",
                    table,
                    key,
                    current.is_some()
                );
                StoreError::Conflict(current)
            }
            Err(e) => e,
        }
    }

    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Err(BackendError::Throttled(msg)) if attempt < max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "Store {} throttled (attempt {}/{}), retrying in {:?}: {}",
                        op, attempt, max_attempts, delay, msg
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn translate(&self, err: BackendError) -> StoreError {
        match err {
            BackendError::Throttled(message) => StoreError::Unavailable {
                attempts: self.retry.max_attempts.max(1),
                message,
            },
            BackendError::ConditionFailed => StoreError::Conflict(None),
            BackendError::Other(message) => StoreError::Backend(message),
        }
    }
}
