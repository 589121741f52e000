//! SimpleCache Core - Entry Types and Pure Helpers
//!
//! Data types and side-effect free functions shared by the two cache tiers.
//! Nothing in this crate touches the filesystem or the process-local map.

pub mod checksum;
pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod timestamp;

pub use checksum::checksum;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CacheConfig;
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult, ConfigError, SerializationError, StorageError};
pub use timestamp::{expires_after, from_comparable, to_comparable};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
