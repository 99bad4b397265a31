use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{KeyValueStore, StoreError};

/// A [`KeyValueStore`] living in process memory.
///
/// An optional quota (in bytes, counting keys and values) mimics the limited space browsers give
/// to local storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<BTreeMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that refuses writes once `quota` bytes are in use.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            values: Default::default(),
            quota: Some(quota),
        }
    }

    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A panic while holding the lock cannot leave the map half-updated, so poisoning is
        // safe to ignore.
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.values().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut values = self.values();
        if let Some(quota) = self.quota {
            let used: usize = values
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = key.len() + value.len();
            let available = quota.saturating_sub(used);
            if needed > available {
                return Err(StoreError::QuotaExceeded { needed, available });
            }
        }
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::new();
        assert_eq!(store.get("a").unwrap(), None);

        store.set("a", "1").unwrap();
        store.set("a", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("2"));

        store.remove("a").unwrap();
        store.remove("a").unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn test_quota() {
        let store = MemoryStore::with_quota(10);
        store.set("key", "1234567").unwrap();
        // overwriting the same key only counts the new value
        store.set("key", "abcdefg").unwrap();

        let err = store.set("other", "x").unwrap_err();
        assert!(matches!(
            err,
            StoreError::QuotaExceeded {
                needed: 6,
                available: 0
            }
        ));
        assert_eq!(store.get("other").unwrap(), None);
    }
}
