use std::time::Duration;

use lockbot_core::LockManager;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Start the background task that deletes expired lock records.
pub fn start_expired_lock_purge(locks: LockManager, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval_timer = tokio::time::interval(interval);
        // The first tick completes immediately.
        interval_timer.tick().await;

        loop {
            interval_timer.tick().await;
            run_purge(&locks).await;
        }
    })
}

/// One sweep over every channel. Returns the number of removed records.
pub async fn run_purge(locks: &LockManager) -> usize {
    debug!("Running expired lock purge");

    let channels = match locks.channels().await {
        Ok(channels) => channels,
        Err(e) => {
            error!(error = %e, "Failed to list channels for purge");
            return 0;
        }
    };

    let mut removed = 0;
    for (team, channel) in channels {
        match locks.purge_expired(&team, &channel).await {
            Ok(count) => removed += count,
            Err(e) => error!(error = %e, team = %team, channel = %channel, "Failed to purge expired locks"),
        }
    }

    if removed > 0 {
        info!(locks_purged = removed, "Expired locks purged");
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockbot_core::store::MemoryBackend;
    use lockbot_core::{FakeClock, LockKey, LockSettings, RetryPolicy, StoreAdapter};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_purge_sweeps_all_channels() {
        let clock = FakeClock::new();
        let locks = LockManager::new(
            StoreAdapter::new(Arc::new(MemoryBackend::new()), RetryPolicy::default()),
            Arc::new(clock.clone()),
            LockSettings::default(),
        );

        for (team, channel, name, ttl) in [
            ("T1", "C1", "a", Some(1)),
            ("T1", "C2", "b", Some(1)),
            ("T2", "C1", "c", None),
        ] {
            let key = LockKey::new(team, channel, name).unwrap();
            locks
                .acquire(&key, "alice", ttl.map(Duration::from_secs), None)
                .await
                .unwrap();
        }

        assert_eq!(run_purge(&locks).await, 0);
        clock.advance(Duration::from_secs(2));
        assert_eq!(run_purge(&locks).await, 2);
        assert_eq!(locks.channels().await.unwrap(), vec![("T2".to_string(), "C1".to_string())]);
    }
}
