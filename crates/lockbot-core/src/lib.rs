//! Core of lockbot: advisory locks scoped to a (team, channel) pair.
//!
//! - `LockManager`: acquire, release, list and purge locks
//! - `StoreAdapter`: conditional writes over a [`store::KvBackend`] with retries
//! - `TokenManager`: install state tokens and per-team access tokens
//!
//! Everything that reads the time goes through [`Clock`] so expiry can be
//! driven from tests.

mod adapter;
mod clock;
mod config;
mod error;
mod lock;
mod model;
pub mod store;
mod token;

pub use adapter::StoreAdapter;
pub use clock::{Clock, FakeClock, SystemClock};
pub use config::{LockSettings, RetryPolicy, Settings, TokenSettings};
pub use error::{BackendError, LockError, StateTokenError, StoreError, TokenError};
pub use lock::LockManager;
pub use model::{attr, channel_prefix, validate_identifier, Installation, Lock, LockKey};
pub use token::{RedirectContext, TeamContext, TokenManager};
