//! Background purge of expired nonces from the in-memory store.
//!
//! Redis expires nonce keys on its own; the in-memory store only drops an
//! expired entry when someone tries to consume it, so abandoned challenges
//! would otherwise accumulate.

use crate::storage::InMemoryNonceStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Run the purge loop.
///
/// Every `interval`, removes nonces whose expiry has passed.
pub async fn run_purge_loop(store: Arc<InMemoryNonceStore>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        purge_once(&store, Utc::now());
    }
}

/// Spawn [`run_purge_loop`] unless `interval` is zero.
pub fn spawn_purge_task(store: Arc<InMemoryNonceStore>, interval: Duration) -> Option<JoinHandle<()>> {
    if interval.is_zero() {
        tracing::info!("Nonce purge disabled");
        return None;
    }
    Some(tokio::spawn(run_purge_loop(store, interval)))
}

fn purge_once(store: &InMemoryNonceStore, now: DateTime<Utc>) -> usize {
    let purged = store.purge_expired(now);
    if purged > 0 {
        tracing::info!(
            purged,
            remaining = store.len(),
            "Purged expired nonces"
        );
    }
    purged
}
