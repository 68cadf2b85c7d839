use std::time::Duration;

/// Retry behaviour for transient store faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Upper bound accepted for a lock TTL.
    pub max_ttl: Duration,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            max_ttl: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

#[derive(Clone)]
pub struct TokenSettings {
    /// Secret used to sign state tokens.
    pub signing_secret: Vec<u8>,
    pub state_token_ttl: Duration,
}

impl TokenSettings {
    pub fn new(signing_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            signing_secret: signing_secret.into(),
            state_token_ttl: Duration::from_secs(300),
        }
    }
}

impl std::fmt::Debug for TokenSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSettings")
            .field("signing_secret", &"<redacted>")
            .field("state_token_ttl", &self.state_token_ttl)
            .finish()
    }
}

/// Process-wide settings, built once at startup and handed to the managers.
#[derive(Debug, Clone)]
pub struct Settings {
    pub retry: RetryPolicy,
    pub locks: LockSettings,
    pub tokens: TokenSettings,
}

impl Settings {
    pub fn new(signing_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            retry: RetryPolicy::default(),
            locks: LockSettings::default(),
            tokens: TokenSettings::new(signing_secret),
        }
    }
}
