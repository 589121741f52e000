//! Process-local map trait and cache statistics.
//!
//! The process-local tier does not own its memory. It borrows a host-provided
//! string map whose lifetime is the process, so every façade instance in the
//! process sees the same slots.

use simplecache_core::StorageError;
use std::fmt::Debug;

/// Process-scoped string map injected by the embedding host.
///
/// Implementations must give at least last-write-wins semantics under
/// concurrent access from threads of the same process.
pub trait PropertyMap: Send + Sync + Debug {
    /// Read a slot. `Ok(None)` when the slot is empty.
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a slot, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Empty a slot. Clearing an empty slot is not an error.
    fn clear(&self, key: &str) -> Result<(), StorageError>;

    /// Write a slot only if it is empty. Returns `true` if the write happened.
    ///
    /// The default is a plain read-then-write; maps that can do better
    /// should override it with an atomic version.
    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        if self.get(key)?.is_some() {
            return Ok(false);
        }
        self.set(key, value)?;
        Ok(true)
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads answered by the process-local tier.
    pub local_hits: u64,
    /// Reads answered by the persistent tier.
    pub persistent_hits: u64,
    /// Reads answered by neither tier.
    pub misses: u64,
    /// `set` calls that stored the entry in at least one tier.
    pub sets: u64,
    /// `delete` calls.
    pub deletes: u64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.local_hits + self.persistent_hits
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}
