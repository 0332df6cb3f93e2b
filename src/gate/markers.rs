//! Client-persisted session and pending markers.
//!
//! Key patterns (`prefix` from config):
//! - `{prefix}_auth_{address}`: session marker, server token or signature
//! - `{prefix}_pending_{address}`: `"1"` while a sign request is outstanding
//!
//! The pending marker is a diagnostics hint only; nothing trusts it.

use alloy_primitives::Address;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

/// Durable string key-value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.entries().insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries().remove(key);
    }
}

/// JSON object on disk, rewritten on every change.
///
/// Writes go to `<file>.tmp` and are renamed into place. Write failures are
/// logged and the in-memory copy stays authoritative for this process.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    /// Open `path`, starting empty if it does not exist.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e),
        };
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    fn update(&self, change: impl FnOnce(&mut BTreeMap<String, String>)) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        change(&mut entries);
        if let Err(e) = self.flush(&entries) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to persist gate storage");
        }
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> io::Result<()> {
        let json = serde_json::to_vec_pretty(entries)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.update(|entries| {
            entries.insert(key.to_string(), value.to_string());
        });
    }

    fn remove(&self, key: &str) {
        self.update(|entries| {
            entries.remove(key);
        });
    }
}

/// Typed access to the per-address markers.
#[derive(Clone)]
pub struct SessionMarkers {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
}

impl SessionMarkers {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    pub fn session_key(&self, address: &Address) -> String {
        format!("{}_auth_{}", self.prefix, address)
    }

    pub fn pending_key(&self, address: &Address) -> String {
        format!("{}_pending_{}", self.prefix, address)
    }

    /// Stored credential for `address`, if it ever completed sign-in.
    pub fn session(&self, address: &Address) -> Option<String> {
        self.store.get(&self.session_key(address))
    }

    pub fn is_signed(&self, address: &Address) -> bool {
        self.session(address).is_some()
    }

    pub fn record_session(&self, address: &Address, credential: &str) {
        self.store.set(&self.session_key(address), credential);
    }

    pub fn is_pending(&self, address: &Address) -> bool {
        self.store.get(&self.pending_key(address)).is_some()
    }

    pub fn mark_pending(&self, address: &Address) {
        self.store.set(&self.pending_key(address), "1");
    }

    pub fn clear_pending(&self, address: &Address) {
        self.store.remove(&self.pending_key(address));
    }
}
