//! Lock state machine on top of conditional store writes.
//!
//! The manager keeps no in-process locks or caches. Every acquire and release
//! is a single conditional write; the store decides the winner of a race and
//! losers learn the current state from the adapter's read-on-conflict.

use std::sync::Arc;
use std::time::Duration;

use chrono::SubsecRound;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::adapter::StoreAdapter;
use crate::clock::Clock;
use crate::config::LockSettings;
use crate::error::{LockError, StoreError};
use crate::model::{
    attr, channel_prefix, validate_identifier, validate_note, validate_ttl, Lock, LockKey,
};
use crate::store::{Condition, Item, Table};

/// Acquire, release, inspect and list locks.
#[derive(Clone)]
pub struct LockManager {
    store: StoreAdapter,
    clock: Arc<dyn Clock>,
    settings: LockSettings,
}

impl LockManager {
    pub fn new(store: StoreAdapter, clock: Arc<dyn Clock>, settings: LockSettings) -> Self {
        Self {
            store,
            clock,
            settings,
        }
    }

    /// Take the lock for `holder` if nobody holds a live lock on `key`.
    ///
    /// # Returns
    /// * `Ok(lock)` - the newly written record
    /// * `Err(LockError::Conflict(current))` - someone else holds it; `current` is
    ///   their record, untouched
    #[instrument(skip(self, key), fields(key = %key), level = "debug")]
    pub async fn acquire(
        &self,
        key: &LockKey,
        holder: &str,
        ttl: Option<Duration>,
        note: Option<&str>,
    ) -> Result<Lock, LockError> {
        let holder = validate_identifier("holder", holder)?;
        let ttl = ttl
            .map(|ttl| validate_ttl(ttl, self.settings.max_ttl))
            .transpose()?;
        let note = validate_note(note)?;
        let storage_key = key.storage_key();
        // Tells a write of ours that landed without an ack apart from any
        // other record, including one by the same holder.
        let write_id = Uuid::new_v4().to_string();

        // A vanished conflicting record gets one more write; nothing beyond that.
        for attempt in 1..=2 {
            // Stored timestamps have millisecond precision.
            let now = self.clock.now().trunc_subsecs(3);
            let lock = Lock {
                team: key.team().to_string(),
                channel: key.channel().to_string(),
                name: key.name().to_string(),
                holder: holder.clone(),
                acquired_at: now,
                expires_at: ttl.map(|ttl| now + ttl),
                note: note.clone(),
            };

            let mut item = lock.to_item();
            item.insert(attr::WRITE_ID.into(), Value::from(write_id.clone()));

            let result = self
                .store
                .conditional_put(
                    Table::Locks,
                    &storage_key,
                    item,
                    &Condition::AbsentOrExpired { now },
                )
                .await;

            let current = match result {
                Ok(()) => {
                    info!("Lock {} acquired by {}", key, holder);
                    return Ok(lock);
                }
                Err(StoreError::Conflict(current)) => current,
                Err(e) => return Err(e.into()),
            };

            let own_write = current
                .as_ref()
                .and_then(|item| item.get(attr::WRITE_ID))
                .and_then(Value::as_str)
                == Some(write_id.as_str());

            match self.live_lock(current.as_ref())? {
                // A retried write that landed before the throttle was reported.
                Some(existing) if own_write => {
                    info!("Lock {} acquired by {}", key, holder);
                    return Ok(existing);
                }
                Some(existing) => {
                    debug!(
                        "Lock {} held by {} since {} (requested by {})",
                        key, existing.holder, existing.acquired_at, holder
                    );
                    return Err(LockError::Conflict(Box::new(existing)));
                }
                None => {
                    warn!(
                        "Lock {} changed while acquiring for {} (attempt {})",
                        key, holder, attempt
                    );
                }
            }
        }

        Err(LockError::Store(format!(
            "lock {key} kept changing during acquire; try again"
        )))
    }

    /// Release the lock on `key`.
    ///
    /// Without `force` only the holder may release. `force` is a capability
    /// decided by the caller and deletes whatever live lock is there.
    ///
    /// # Returns
    /// * `Ok(lock)` - the record that was removed
    /// * `Err(LockError::NotFound)` - no live lock on `key`
    /// * `Err(LockError::Forbidden { holder })` - held by someone other than
    ///   `requester`
    #[instrument(skip(self, key), fields(key = %key), level = "debug")]
    pub async fn release(
        &self,
        key: &LockKey,
        requester: &str,
        force: bool,
    ) -> Result<Lock, LockError> {
        let requester = validate_identifier("requester", requester)?;
        let now = self.clock.now();
        let condition = if force {
            Condition::Live { now }
        } else {
            Condition::HeldBy {
                holder: requester.clone(),
                now,
            }
        };

        match self
            .store
            .conditional_delete(Table::Locks, &key.storage_key(), &condition)
            .await
        {
            Ok(Some(old)) => {
                let lock = Lock::from_item(&old)?;
                if force && lock.holder != requester {
                    info!(
                        "Lock {} held by {} force-released by {}",
                        key, lock.holder, requester
                    );
                } else {
                    info!("Lock {} released by {}", key, requester);
                }
                Ok(lock)
            }
            // Only reachable for backends that treat a missing key as a match.
            Ok(None) => Err(LockError::NotFound),
            Err(StoreError::Conflict(current)) => match self.live_lock(current.as_ref())? {
                Some(existing) if !force && existing.holder != requester => {
                    debug!(
                        "Lock {} held by {}; release by {} refused",
                        key, existing.holder, requester
                    );
                    Err(LockError::Forbidden {
                        holder: existing.holder,
                    })
                }
                // The record was replaced between the predicate check and the
                // read; report it rather than deleting a lock we never saw.
                Some(existing) => Err(LockError::Conflict(Box::new(existing))),
                None => Err(LockError::NotFound),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// The live lock on `key`. Expired records read as not found.
    #[instrument(skip(self, key), fields(key = %key), level = "debug")]
    pub async fn get(&self, key: &LockKey) -> Result<Lock, LockError> {
        let item = self.store.get(Table::Locks, &key.storage_key()).await?;
        self.live_lock(item.as_ref())?.ok_or(LockError::NotFound)
    }

    /// Live locks of a channel, sorted by name.
    #[instrument(skip(self), level = "debug")]
    pub async fn list(&self, team: &str, channel: &str) -> Result<Vec<Lock>, LockError> {
        let team = validate_identifier("team", team)?;
        let channel = validate_identifier("channel", channel)?;
        let now = self.clock.now();

        let items = self
            .store
            .query(Table::Locks, &channel_prefix(&team, &channel))
            .await?;

        let mut locks = Vec::with_capacity(items.len());
        for item in &items {
            let lock = Lock::from_item(item)?;
            if !lock.is_expired(now) {
                locks.push(lock);
            }
        }
        locks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(locks)
    }

    /// Delete expired records of a channel. Returns how many were removed.
    ///
    /// Each delete is conditional on the record still being expired, so a lock
    /// acquired in the meantime survives.
    #[instrument(skip(self), level = "debug")]
    pub async fn purge_expired(&self, team: &str, channel: &str) -> Result<usize, LockError> {
        let team = validate_identifier("team", team)?;
        let channel = validate_identifier("channel", channel)?;
        let now = self.clock.now();

        let items = self
            .store
            .query(Table::Locks, &channel_prefix(&team, &channel))
            .await?;

        let mut removed = 0;
        for item in &items {
            let lock = Lock::from_item(item)?;
            if !lock.is_expired(now) {
                continue;
            }
            let key = LockKey::new(&lock.team, &lock.channel, &lock.name)?;
            match self
                .store
                .conditional_delete(Table::Locks, &key.storage_key(), &Condition::Expired { now })
                .await
            {
                Ok(_) => removed += 1,
                Err(StoreError::Conflict(_)) => {
                    debug!("Lock {} no longer expired; kept", key);
                }
                Err(e) => return Err(e.into()),
            }
        }

        if removed > 0 {
            info!("Purged {} expired locks in {}/{}", removed, team, channel);
        }
        Ok(removed)
    }

    /// Every team/channel pair that currently has lock records. Used by the
    /// purge task to find work.
    pub async fn channels(&self) -> Result<Vec<(String, String)>, LockError> {
        let items = self.store.query(Table::Locks, "").await?;
        let mut channels = Vec::new();
        for item in &items {
            let lock = Lock::from_item(item)?;
            let pair = (lock.team, lock.channel);
            if !channels.contains(&pair) {
                channels.push(pair);
            }
        }
        channels.sort();
        Ok(channels)
    }

    fn live_lock(&self, item: Option<&Item>) -> Result<Option<Lock>, LockError> {
        let Some(item) = item else {
            return Ok(None);
        };
        let lock = Lock::from_item(item)?;
        if lock.is_expired(self.clock.now()) {
            Ok(None)
        } else {
            Ok(Some(lock))
        }
    }
}
