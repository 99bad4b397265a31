use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::age_ms;

/// Describes the exact parameters that produced a [`CacheEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMeta {
    /// The requested keys, in the order they were configured.
    pub keys: Vec<String>,
    /// The endpoint the keys were fetched from.
    pub endpoint: String,
}

/// The persisted result of the last fetch.
///
/// All three fields are required; a payload missing any of them is structurally invalid and
/// fails to deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// Milliseconds since the UNIX epoch when the entry was written.
    pub timestamp: u64,
    /// Result per key. `None` marks a key whose fetch failed.
    pub data: BTreeMap<String, Option<T>>,
    pub meta: CacheMeta,
}

impl<T> CacheEntry<T> {
    /// Returns the cached result for `key`, if it was fetched successfully.
    pub fn get(&self, key: &str) -> Option<&T> {
        self.data.get(key).and_then(Option::as_ref)
    }
}

/// The cross-context lock marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    /// Milliseconds since the UNIX epoch when the lock was acquired.
    pub timestamp: u64,
}

/// Decides whether a stored [`CacheEntry`] may be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub ttl: Duration,
}

impl FreshnessPolicy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// Returns `true` if `entry` was produced for exactly `expected_keys` (in the same order) and
    /// `expected_endpoint`, and is younger than the TTL at `now`.
    ///
    /// Reordering the keys invalidates the entry. So does adding a key, the entry is not
    /// partially reused.
    pub fn is_usable<T>(
        &self,
        entry: Option<&CacheEntry<T>>,
        expected_keys: &[String],
        expected_endpoint: &str,
        now: u64,
    ) -> bool {
        let Some(entry) = entry else {
            return false;
        };
        if entry.meta.keys.as_slice() != expected_keys {
            return false;
        }
        if entry.meta.endpoint != expected_endpoint {
            return false;
        }
        u128::from(age_ms(entry.timestamp, now)) < self.ttl.as_millis()
    }

    /// Returns `true` if something stamped at `timestamp` is at least TTL old at `now`.
    pub fn is_expired(&self, timestamp: u64, now: u64) -> bool {
        u128::from(age_ms(timestamp, now)) >= self.ttl.as_millis()
    }
}
