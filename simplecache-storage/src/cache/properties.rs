//! In-memory property map shared by the whole process.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use simplecache_core::StorageError;

use super::traits::PropertyMap;

/// The map every façade uses unless the host injects its own.
static PROCESS_PROPERTIES: Lazy<Arc<InMemoryPropertyMap>> =
    Lazy::new(|| Arc::new(InMemoryPropertyMap::new()));

/// Handle to the process-wide property map.
pub fn process_properties() -> Arc<dyn PropertyMap> {
    PROCESS_PROPERTIES.clone()
}

/// `RwLock<HashMap>` implementation of [`PropertyMap`].
///
/// `set_if_absent` is atomic: the check and the write happen under the same
/// write lock.
#[derive(Debug, Default)]
pub struct InMemoryPropertyMap {
    slots: RwLock<HashMap<String, String>>,
}

impl InMemoryPropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.read().map(|slots| slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PropertyMap for InMemoryPropertyMap {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let slots = self.slots.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(slots.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.write().map_err(|_| StorageError::LockPoisoned)?;
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn clear(&self, key: &str) -> Result<(), StorageError> {
        let mut slots = self.slots.write().map_err(|_| StorageError::LockPoisoned)?;
        slots.remove(key);
        Ok(())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        let mut slots = self.slots.write().map_err(|_| StorageError::LockPoisoned)?;
        if slots.contains_key(key) {
            return Ok(false);
        }
        slots.insert(key.to_string(), value.to_string());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_clear() {
        let map = InMemoryPropertyMap::new();
        map.set("a", "1").unwrap();
        assert_eq!(map.get("a").unwrap().as_deref(), Some("1"));
        map.set("a", "2").unwrap();
        assert_eq!(map.get("a").unwrap().as_deref(), Some("2"));
        map.clear("a").unwrap();
        assert!(map.get("a").unwrap().is_none());
        map.clear("never-set").unwrap();
    }

    #[test]
    fn test_process_properties_is_shared() {
        let a = process_properties();
        let b = process_properties();
        a.set("test.properties.shared", "yes").unwrap();
        assert_eq!(
            b.get("test.properties.shared").unwrap().as_deref(),
            Some("yes")
        );
        a.clear("test.properties.shared").unwrap();
    }

    #[test]
    fn test_set_if_absent_single_winner() {
        let map = Arc::new(InMemoryPropertyMap::new());
        let winners: usize = (0..8)
            .map(|i| {
                let map = Arc::clone(&map);
                std::thread::spawn(move || map.set_if_absent("busy", &i.to_string()).unwrap())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
    }
}
