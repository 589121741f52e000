//! Process-local tier.
//!
//! Entries are JSON `[expires, payload, checksum]` strings stored in the
//! injected [`PropertyMap`] under `<prefix><key>`. The tier holds no state of
//! its own beyond an on/off switch decided once at construction, so any
//! number of façades can share the same slots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use simplecache_core::{CacheEntry, CacheResult, StorageError};

use super::traits::PropertyMap;

/// Sentinel written and read back by the capability self-test.
const SELF_TEST_KEY: &str = "init.test";
const SELF_TEST_VALUE: &str = "ok";

/// The self-test failure is reported once per process.
static SELF_TEST_FAILURE_LOGGED: AtomicBool = AtomicBool::new(false);

/// Process-local tier backed by a host property map.
#[derive(Debug, Clone)]
pub struct LocalStore {
    map: Arc<dyn PropertyMap>,
    prefix: String,
    log_prefix: String,
    enabled: bool,
}

impl LocalStore {
    /// Create the tier and run the capability self-test.
    ///
    /// When `enabled` is false, or the self-test fails, entry reads report
    /// absent and entry writes are no-ops for the lifetime of this store.
    /// Bookkeeping slots ([`get_slot`](Self::get_slot) and friends) keep
    /// working as long as the map itself answers.
    pub fn new(
        map: Arc<dyn PropertyMap>,
        prefix: impl Into<String>,
        log_prefix: impl Into<String>,
        enabled: bool,
    ) -> Self {
        let mut store = Self {
            map,
            prefix: prefix.into(),
            log_prefix: log_prefix.into(),
            enabled: false,
        };
        store.enabled = enabled && store.self_test();
        store
    }

    fn self_test(&self) -> bool {
        let key = self.slot_key(SELF_TEST_KEY);
        let outcome = self
            .map
            .set(&key, SELF_TEST_VALUE)
            .and_then(|_| self.map.get(&key));

        match outcome {
            Ok(Some(value)) if value == SELF_TEST_VALUE => {
                if let Err(e) = self.map.clear(&key) {
                    tracing::debug!(cache = %self.log_prefix, error = %e, "Failed to clear self-test slot");
                }
                true
            }
            Ok(other) => {
                self.log_self_test_failure(&format!("read back {other:?}"));
                false
            }
            Err(e) => {
                self.log_self_test_failure(&e.to_string());
                false
            }
        }
    }

    fn log_self_test_failure(&self, reason: &str) {
        if !SELF_TEST_FAILURE_LOGGED.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                cache = %self.log_prefix,
                reason,
                "Process-local property test failed, disabling local tier"
            );
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn slot_key(&self, suffix: &str) -> String {
        format!("{}{}", self.prefix, suffix)
    }

    /// Look up a valid entry.
    ///
    /// A slot that fails to decode is cleared and reported as a miss.
    pub fn get(&self, key: &str, checksum: i64, now: i64) -> Option<Value> {
        if !self.enabled {
            return None;
        }

        let slot = self.slot_key(key);
        let raw = match self.map.get(&slot) {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return None,
            Err(e) => {
                tracing::error!(cache = %self.log_prefix, key, error = %e, "Failed to read local slot");
                return None;
            }
        };

        match CacheEntry::decode_slot(key, &raw) {
            Ok(entry) if entry.is_valid(now, checksum) => Some(entry.payload),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(cache = %self.log_prefix, key, error = %e, "Corrupted local slot, clearing");
                if let Err(e) = self.map.clear(&slot) {
                    tracing::debug!(cache = %self.log_prefix, key, error = %e, "Failed to clear corrupted slot");
                }
                None
            }
        }
    }

    /// Store an entry. No-op when the tier is disabled.
    pub fn set(&self, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let raw = entry.encode_slot(key)?;
        self.map.set(&self.slot_key(key), &raw)?;
        Ok(())
    }

    /// Remove an entry. Removing a missing entry is not an error.
    pub fn delete(&self, key: &str) -> CacheResult<()> {
        if !self.enabled {
            return Ok(());
        }
        self.map.clear(&self.slot_key(key))?;
        Ok(())
    }

    /// Read a bookkeeping slot, regardless of whether entries are enabled.
    pub fn get_slot(&self, suffix: &str) -> Result<Option<String>, StorageError> {
        self.map.get(&self.slot_key(suffix))
    }

    pub fn set_slot(&self, suffix: &str, value: &str) -> Result<(), StorageError> {
        self.map.set(&self.slot_key(suffix), value)
    }

    pub fn set_slot_if_absent(&self, suffix: &str, value: &str) -> Result<bool, StorageError> {
        self.map.set_if_absent(&self.slot_key(suffix), value)
    }

    pub fn clear_slot(&self, suffix: &str) -> Result<(), StorageError> {
        self.map.clear(&self.slot_key(suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::properties::InMemoryPropertyMap;
    use serde_json::json;

    /// Map whose reads never return what was written.
    #[derive(Debug, Default)]
    struct ForgetfulMap;

    impl PropertyMap for ForgetfulMap {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Ok(())
        }

        fn clear(&self, _key: &str) -> Result<(), StorageError> {
            Ok(())
        }
    }

    /// Map that refuses every call.
    #[derive(Debug, Default)]
    struct UnavailableMap;

    impl PropertyMap for UnavailableMap {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable {
                reason: "no window".into(),
            })
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable {
                reason: "no window".into(),
            })
        }

        fn clear(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable {
                reason: "no window".into(),
            })
        }
    }

    fn store_on(map: Arc<InMemoryPropertyMap>) -> LocalStore {
        LocalStore::new(map, "test.", "Test", true)
    }

    #[test]
    fn test_set_then_get() {
        let store = store_on(Arc::new(InMemoryPropertyMap::new()));
        let entry = CacheEntry::new(200, json!({"title": "Show A"}), 0);
        store.set("q1", &entry).unwrap();
        assert_eq!(store.get("q1", 0, 100), Some(json!({"title": "Show A"})));
        assert_eq!(store.get("q1", 0, 200), None);
    }

    #[test]
    fn test_slots_are_prefixed() {
        let map = Arc::new(InMemoryPropertyMap::new());
        let store = store_on(Arc::clone(&map));
        store.set("q1", &CacheEntry::new(1, json!(1), 0)).unwrap();
        assert!(map.get("test.q1").unwrap().is_some());
        assert!(map.get("q1").unwrap().is_none());
    }

    #[test]
    fn test_self_test_clears_sentinel() {
        let map = Arc::new(InMemoryPropertyMap::new());
        let store = store_on(Arc::clone(&map));
        assert!(store.is_enabled());
        assert!(map.is_empty());
    }

    #[test]
    fn test_forgetful_map_disables_tier() {
        let store = LocalStore::new(Arc::new(ForgetfulMap), "test.", "Test", true);
        assert!(!store.is_enabled());
        store.set("k", &CacheEntry::new(i64::MAX, json!(1), 0)).unwrap();
        assert_eq!(store.get("k", 0, 0), None);
    }

    #[test]
    fn test_unavailable_map_disables_tier() {
        let store = LocalStore::new(Arc::new(UnavailableMap), "test.", "Test", true);
        assert!(!store.is_enabled());
        assert!(store.set("k", &CacheEntry::new(1, json!(1), 0)).is_ok());
        assert!(store.delete("k").is_ok());
    }

    #[test]
    fn test_disabled_by_config() {
        let map = Arc::new(InMemoryPropertyMap::new());
        let store = LocalStore::new(map.clone(), "test.", "Test", false);
        assert!(!store.is_enabled());
        store.set("k", &CacheEntry::new(i64::MAX, json!(1), 0)).unwrap();
        assert!(map.is_empty());
        store.set_slot("internal.x", "1").unwrap();
        assert_eq!(store.get_slot("internal.x").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_corrupted_slot_is_cleared() {
        let map = Arc::new(InMemoryPropertyMap::new());
        let store = store_on(Arc::clone(&map));
        map.set("test.bad", "{not json").unwrap();
        assert_eq!(store.get("bad", 0, 0), None);
        assert!(map.get("test.bad").unwrap().is_none());
    }

    #[test]
    fn test_wrong_shape_slot_is_cleared() {
        let map = Arc::new(InMemoryPropertyMap::new());
        let store = store_on(Arc::clone(&map));
        map.set("test.short", "[1,2]").unwrap();
        assert_eq!(store.get("short", 0, 0), None);
        assert!(map.get("test.short").unwrap().is_none());
    }

    #[test]
    fn test_checksum_gate() {
        let store = store_on(Arc::new(InMemoryPropertyMap::new()));
        store.set("k", &CacheEntry::new(100, json!("v"), 65)).unwrap();
        assert_eq!(store.get("k", 66, 0), None);
        assert_eq!(store.get("k", 65, 0), Some(json!("v")));
        assert_eq!(store.get("k", 0, 0), Some(json!("v")));
    }

    #[test]
    fn test_delete_missing_is_ok() {
        let store = store_on(Arc::new(InMemoryPropertyMap::new()));
        assert!(store.delete("never").is_ok());
    }
}
