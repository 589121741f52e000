//! Error types for cache operations

use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Storage busy after {attempts} attempts: {reason}")]
    Busy { attempts: u32, reason: String },

    #[error("Storage unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Query failed: {reason}")]
    QueryFailed { reason: String },

    #[error("Corrupted entry for key {key}: {reason}")]
    CorruptEntry { key: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("Operation aborted")]
    Aborted,

    #[error("Storage closed")]
    Closed,
}

impl StorageError {
    /// True for contention errors that are worth retrying.
    pub fn is_busy(&self) -> bool {
        matches!(self, StorageError::Busy { .. })
    }
}

/// Payload serialization errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerializationError {
    #[error("Failed to encode payload for key {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Failed to decode payload for key {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("Unstructured payloads are not supported (key {key})")]
    Unstructured { key: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
