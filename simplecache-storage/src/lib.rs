//! SimpleCache Storage - Tiers, Façade and Maintenance
//!
//! Two-tier key/value cache for structured (JSON) payloads. A process-local
//! tier answers repeated reads without I/O; a persistent SQLite tier survives
//! restarts and is shared by every process pointed at the same file. Entries
//! expire, can be pinned to a version tag, and are swept periodically.
//!
//! Pure types and helpers live in `simplecache-core`.

pub mod abort;
pub mod cache;
pub mod fetch;

pub use abort::AbortSignal;
pub use cache::{
    memoize, process_properties, spawn_sweeper, sweep_task, BusyTasks, CacheStats, GetOptions,
    InMemoryPropertyMap, LocalStore, Memoized, PropertyMap, SetOptions, SimpleCache,
    SimpleCacheBuilder, SqliteOptions, SqliteStore, SweepMetrics, SweepOutcome, TaskGuard,
};
pub use fetch::{CachedFetcher, HttpFetcher, HttpResponse, DEFAULT_URL_EXPIRATION};

pub use simplecache_core::{
    CacheConfig, CacheEntry, CacheError, CacheResult, Clock, ConfigError, ManualClock,
    SerializationError, StorageError, SystemClock,
};
