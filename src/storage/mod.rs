//! Nonce storage.
//!
//! The verify flow depends only on the [`NonceStore`] contract:
//! - `issue` records a fresh nonce with an absolute expiry;
//! - `consume` removes the record in the same atomic step as the lookup, then
//!   reports `Unknown` (absent) or `Expired` (present but stale). A nonce can be
//!   consumed successfully at most once, and every attempt deletes it.
//!
//! Two backends: an in-process map (dev, tests) and Redis (native TTL, Lua
//! GET+DEL).

pub mod memory;
pub mod redis;

pub use memory::InMemoryNonceStore;
pub use self::redis::RedisNonceStore;

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// A nonce handed out to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedNonce {
    pub nonce: String,
    pub expires_at: DateTime<Utc>,
}

/// Why a nonce could not be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NonceError {
    #[error("Unknown nonce")]
    Unknown,

    #[error("Expired nonce")]
    Expired,
}

/// Backend failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumeError {
    #[error(transparent)]
    Nonce(#[from] NonceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Issues single-use, time-bounded nonces.
#[async_trait::async_trait]
pub trait NonceStore: Send + Sync {
    /// Generate and record a nonce valid for `ttl`.
    async fn issue(&self, ttl: Duration) -> Result<IssuedNonce, StoreError>;

    /// Validate and invalidate `nonce`.
    async fn consume(&self, nonce: &str) -> Result<(), ConsumeError>;
}

/// Absolute expiry `ttl` after `now`, saturating.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
