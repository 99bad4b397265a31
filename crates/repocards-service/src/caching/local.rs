use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::clock::ClockRef;
use crate::store::StoreRef;

use super::{CacheEntry, CacheMeta, LockToken};

/// Reads and writes the single [`CacheEntry`] kept under a key of the shared store.
///
/// Every operation fails soft: errors are logged and turned into "no entry" or "not written".
#[derive(Debug, Clone)]
pub struct LocalCache {
    store: StoreRef,
    clock: ClockRef,
    key: String,
}

impl LocalCache {
    pub fn new(store: StoreRef, clock: ClockRef, key: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            key: key.into(),
        }
    }

    /// Returns the stored entry, or `None` if it is missing, unreadable or invalid.
    ///
    /// This does not check freshness, see [`FreshnessPolicy`](super::FreshnessPolicy).
    pub fn read<T: DeserializeOwned>(&self) -> Option<CacheEntry<T>> {
        let raw = self.read_raw()?;
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::debug!(key = %self.key, error = %err, "Ignoring invalid cache entry");
                None
            }
        }
    }

    /// Returns the timestamp of the stored entry regardless of its metadata or payload.
    pub fn read_timestamp(&self) -> Option<u64> {
        let raw = self.read_raw()?;
        // The timestamp is the only field shared with lock tokens, and unknown fields are ignored.
        serde_json::from_str::<LockToken>(&raw)
            .ok()
            .map(|stamp| stamp.timestamp)
    }

    fn read_raw(&self) -> Option<String> {
        match self.store.get(&self.key) {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "Cache read failed");
                None
            }
        }
    }

    /// Persists `results` for exactly `keys`, stamped with the current time.
    ///
    /// Keys missing from `results` are stored as failed (`null`), results for keys not in `keys`
    /// are dropped. Returns whether the entry was written.
    pub fn write<T: Serialize>(
        &self,
        keys: &[String],
        endpoint: &str,
        mut results: BTreeMap<String, Option<T>>,
    ) -> bool {
        let mut data = BTreeMap::new();
        for key in keys {
            if !data.contains_key(key) {
                data.insert(key.clone(), results.remove(key).flatten());
            }
        }
        let entry = CacheEntry {
            timestamp: self.clock.now_ms(),
            data,
            meta: CacheMeta {
                keys: keys.to_vec(),
                endpoint: endpoint.to_owned(),
            },
        };

        let written = match serde_json::to_string(&entry) {
            Ok(json) => match self.store.set(&self.key, &json) {
                Ok(()) => true,
                Err(err) => {
                    tracing::warn!(key = %self.key, error = %err, "Cache write failed");
                    false
                }
            },
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "Cache serialization failed");
                false
            }
        };

        metric!(counter("caches.write") += 1, "success" => if written { "true" } else { "false" });
        written
    }

    /// Removes the stored entry.
    pub fn clear(&self) {
        if let Err(err) = self.store.remove(&self.key) {
            tracing::warn!(key = %self.key, error = %err, "Cache clear failed");
        }
    }
}
