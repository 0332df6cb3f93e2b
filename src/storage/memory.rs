//! In-process nonce store.
//!
//! Process-local and lost on restart: fine for development and tests, not for
//! a multi-instance deployment (use the Redis backend there).

use super::{expiry_after, ConsumeError, IssuedNonce, NonceError, NonceStore, StoreError};
use crate::auth::session::generate_nonce;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct InMemoryNonceStore {
    records: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl InMemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a caller-chosen nonce value valid for `ttl`.
    pub fn insert(&self, nonce: impl Into<String>, ttl: Duration) -> IssuedNonce {
        let nonce = nonce.into();
        let expires_at = expiry_after(Utc::now(), ttl);
        self.records().insert(nonce.clone(), expires_at);
        IssuedNonce { nonce, expires_at }
    }

    /// Consume `nonce` as of `now`.
    ///
    /// The record is removed under the lock before expiry is checked, so two
    /// racing consumers see exactly one success.
    pub fn consume_at(&self, nonce: &str, now: DateTime<Utc>) -> Result<(), NonceError> {
        let expires_at = self.records().remove(nonce).ok_or(NonceError::Unknown)?;
        if now > expires_at {
            return Err(NonceError::Expired);
        }
        Ok(())
    }

    /// Drop records that expired before `now`. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records();
        let before = records.len();
        records.retain(|_, expires_at| *expires_at >= now);
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn issue(&self, ttl: Duration) -> Result<IssuedNonce, StoreError> {
        Ok(self.insert(generate_nonce(), ttl))
    }

    async fn consume(&self, nonce: &str) -> Result<(), ConsumeError> {
        Ok(self.consume_at(nonce, Utc::now())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use std::sync::Arc;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn test_issue_then_consume_once() {
        let store = InMemoryNonceStore::new();
        let issued = store.issue(TTL).await.unwrap();

        assert!(issued.expires_at > Utc::now());
        assert!(store.consume(&issued.nonce).await.is_ok());

        for _ in 0..3 {
            let err = store.consume(&issued.nonce).await.unwrap_err();
            assert!(matches!(err, ConsumeError::Nonce(NonceError::Unknown)));
        }
    }

    #[tokio::test]
    async fn test_issued_nonces_are_distinct() {
        let store = InMemoryNonceStore::new();
        let a = store.issue(TTL).await.unwrap();
        let b = store.issue(TTL).await.unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_unknown_nonce() {
        let store = InMemoryNonceStore::new();
        assert_eq!(store.consume_at("n-missing", Utc::now()), Err(NonceError::Unknown));
    }

    #[test]
    fn test_expired_nonce_is_deleted() {
        let store = InMemoryNonceStore::new();
        let issued = store.insert("n-abc123", TTL);

        let later = issued.expires_at + TimeDelta::milliseconds(1);
        assert_eq!(store.consume_at("n-abc123", later), Err(NonceError::Expired));
        // Second attempt sees no record at all
        assert_eq!(store.consume_at("n-abc123", later), Err(NonceError::Unknown));
        assert!(store.is_empty());
    }

    #[test]
    fn test_consume_at_exact_expiry_succeeds() {
        let store = InMemoryNonceStore::new();
        let issued = store.insert("n-edge", TTL);
        assert_eq!(store.consume_at("n-edge", issued.expires_at), Ok(()));
    }

    #[test]
    fn test_purge_expired() {
        let store = InMemoryNonceStore::new();
        store.insert("n-short", Duration::from_secs(1));
        store.insert("n-long", TTL);

        let purged = store.purge_expired(Utc::now() + TimeDelta::seconds(10));
        assert_eq!(purged, 1);
        assert_eq!(store.len(), 1);
        assert!(store.consume_at("n-long", Utc::now()).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_single_winner() {
        let store = Arc::new(InMemoryNonceStore::new());
        let issued = store.issue(TTL).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let nonce = issued.nonce.clone();
            handles.push(tokio::spawn(async move { store.consume(&nonce).await }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => successes += 1,
                Err(ConsumeError::Nonce(NonceError::Unknown)) => {}
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
    }
}
