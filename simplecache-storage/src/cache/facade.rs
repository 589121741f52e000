//! Two-tier cache façade.
//!
//! Reads go to the process-local tier first, then to the persistent tier; a
//! persistent hit is copied back into the local tier. Writes go to both tiers
//! independently. Every cache-layer failure is logged and absorbed, so callers
//! only ever see a value or a miss. The one exception is a payload that cannot
//! be serialized, which `set` returns as an error.
//!
//! # Example
//!
//! ```ignore
//! let cache = SimpleCache::open(CacheConfig::new().with_db_dir(profile_dir))?;
//!
//! cache.set_with(
//!     "q1",
//!     &json!({"title": "Show A"}),
//!     &SetOptions::new().with_expiration(Duration::from_secs(2 * 3600)),
//! )?;
//! assert_eq!(cache.get("q1"), Some(json!({"title": "Show A"})));
//!
//! cache.close();
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use simplecache_core::{
    checksum, expires_after, to_comparable, CacheConfig, CacheEntry, CacheError, CacheResult,
    Clock, SerializationError, StorageError, SystemClock,
};

use super::local::LocalStore;
use super::properties::process_properties;
use super::sqlite_backend::{SqliteOptions, SqliteStore};
use super::tasks::BusyTasks;
use super::traits::{CacheStats, PropertyMap};
use crate::abort::AbortSignal;

/// Per-read options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetOptions {
    /// Version tag the entry must have been written with. Empty accepts any.
    pub checksum: String,
    /// Only structured (JSON) payloads are supported; `false` is refused.
    pub structured: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            checksum: String::new(),
            structured: true,
        }
    }
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checksum(mut self, tag: impl Into<String>) -> Self {
        self.checksum = tag.into();
        self
    }

    pub fn unstructured(mut self) -> Self {
        self.structured = false;
        self
    }
}

/// Per-write options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetOptions {
    pub checksum: String,
    /// Lifetime of the entry. `None` uses the configured default.
    pub expiration: Option<Duration>,
    pub structured: bool,
}

impl Default for SetOptions {
    fn default() -> Self {
        Self {
            checksum: String::new(),
            expiration: None,
            structured: true,
        }
    }
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checksum(mut self, tag: impl Into<String>) -> Self {
        self.checksum = tag.into();
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    pub fn unstructured(mut self) -> Self {
        self.structured = false;
        self
    }
}

#[derive(Debug, Default)]
struct StatCounters {
    local_hits: AtomicU64,
    persistent_hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            local_hits: self.local_hits.load(Ordering::Relaxed),
            persistent_hits: self.persistent_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug)]
pub(super) struct CacheInner {
    pub(super) config: CacheConfig,
    pub(super) local: LocalStore,
    pub(super) persistent: Option<SqliteStore>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) abort: AbortSignal,
    pub(super) tasks: BusyTasks,
    /// Set by `close`; new writes are skipped from then on.
    pub(super) exit: AtomicBool,
    closed: AtomicBool,
    stats: StatCounters,
}

impl CacheInner {
    fn log_prefix(&self) -> &str {
        &self.config.log_prefix
    }

    fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.exit.store(true, Ordering::SeqCst);

        let deadline = Instant::now() + self.config.close_timeout;
        while !self.tasks.is_empty() {
            if self.abort.is_requested() {
                tracing::warn!(cache = %self.log_prefix(), pending = ?self.tasks.names(), "Abort requested while closing");
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(cache = %self.log_prefix(), pending = ?self.tasks.names(), "Timed out waiting for cache tasks");
                break;
            }
            tracing::debug!(cache = %self.log_prefix(), pending = ?self.tasks.names(), "Waiting for cache tasks to finish");
            self.abort.wait(self.config.close_poll_interval);
        }

        if let Some(store) = &self.persistent {
            store.close();
        }
        tracing::info!(cache = %self.log_prefix(), "Closed");
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`SimpleCache`] with injectable collaborators.
#[derive(Debug)]
pub struct SimpleCacheBuilder {
    config: CacheConfig,
    clock: Option<Arc<dyn Clock>>,
    properties: Option<Arc<dyn PropertyMap>>,
    abort: Option<AbortSignal>,
    cleanup_on_open: bool,
}

impl SimpleCacheBuilder {
    /// Clock used for expirations and sweep scheduling.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Property map backing the local tier. Defaults to the process-wide map.
    pub fn properties(mut self, properties: Arc<dyn PropertyMap>) -> Self {
        self.properties = Some(properties);
        self
    }

    /// Host abort signal shared with retries, sweeps and `close`.
    pub fn abort(mut self, abort: AbortSignal) -> Self {
        self.abort = Some(abort);
        self
    }

    /// Whether construction schedules a background `check_cleanup`.
    pub fn cleanup_on_open(mut self, enabled: bool) -> Self {
        self.cleanup_on_open = enabled;
        self
    }

    pub fn build(self) -> CacheResult<SimpleCache> {
        self.config.validate()?;

        let config = self.config;
        let abort = self.abort.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let properties = self.properties.unwrap_or_else(process_properties);

        let local = LocalStore::new(
            properties,
            config.key_prefix.clone(),
            config.log_prefix.clone(),
            config.enable_local_tier,
        );

        let persistent = config.db_path().map(|path| {
            SqliteStore::new(
                path,
                SqliteOptions {
                    max_retries: config.max_retries,
                    retry_delay: config.retry_delay,
                    busy_timeout: config.busy_timeout,
                },
                abort.clone(),
                config.log_prefix.clone(),
            )
        });

        tracing::info!(
            cache = %config.log_prefix,
            local_tier = local.is_enabled(),
            persistent_tier = persistent.is_some(),
            "Initialized"
        );

        let cache = SimpleCache {
            inner: Arc::new(CacheInner {
                config,
                local,
                persistent,
                clock,
                abort,
                tasks: BusyTasks::new(),
                exit: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                stats: StatCounters::default(),
            }),
        };

        if self.cleanup_on_open {
            cache.spawn_deferred_cleanup();
        }
        Ok(cache)
    }
}

/// Two-tier cache handle.
///
/// Clones share the same tiers, task registry and exit flag. The last clone
/// to drop closes the cache if nobody called [`close`](Self::close).
#[derive(Debug, Clone)]
pub struct SimpleCache {
    pub(super) inner: Arc<CacheInner>,
}

impl SimpleCache {
    /// Open a cache with the system clock, the process-wide property map and
    /// a deferred cleanup check.
    pub fn open(config: CacheConfig) -> CacheResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: CacheConfig) -> SimpleCacheBuilder {
        SimpleCacheBuilder {
            config,
            clock: None,
            properties: None,
            abort: None,
            cleanup_on_open: true,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn abort_signal(&self) -> &AbortSignal {
        &self.inner.abort
    }

    /// Whether the process-local tier passed its self-test and is in use.
    pub fn local_tier_enabled(&self) -> bool {
        self.inner.local.is_enabled()
    }

    pub fn has_persistent_tier(&self) -> bool {
        self.inner.persistent.is_some()
    }

    /// Whether [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.exit.load(Ordering::SeqCst)
    }

    /// Names of the operations currently in flight.
    pub fn pending_tasks(&self) -> Vec<String> {
        self.inner.tasks.names()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    /// Integer form of a version tag, salted with the configured global
    /// checksum.
    pub fn checksum(&self, tag: &str) -> i64 {
        checksum(tag, self.inner.config.global_checksum.as_deref())
    }

    pub(super) fn now(&self) -> i64 {
        to_comparable(self.inner.clock.now())
    }

    fn log_prefix(&self) -> &str {
        self.inner.log_prefix()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_with(key, &GetOptions::default())
    }

    /// Read `key`, trying the local tier first.
    pub fn get_with(&self, key: &str, options: &GetOptions) -> Option<Value> {
        if !options.structured {
            tracing::error!(cache = %self.log_prefix(), key, "Unstructured payloads are not supported");
            return None;
        }
        if self.is_closed() {
            tracing::debug!(cache = %self.log_prefix(), key, "Cache closed, reporting miss");
            return None;
        }

        let checksum = self.checksum(&options.checksum);
        let now = self.now();

        if let Some(payload) = self.inner.local.get(key, checksum, now) {
            StatCounters::bump(&self.inner.stats.local_hits);
            tracing::trace!(cache = %self.log_prefix(), key, tier = "local", "Cache hit");
            return Some(payload);
        }

        match self.get_persistent(key, checksum, now) {
            Some(payload) => {
                StatCounters::bump(&self.inner.stats.persistent_hits);
                tracing::trace!(cache = %self.log_prefix(), key, tier = "persistent", "Cache hit");
                Some(payload)
            }
            None => {
                StatCounters::bump(&self.inner.stats.misses);
                tracing::trace!(cache = %self.log_prefix(), key, "Cache miss");
                None
            }
        }
    }

    fn get_persistent(&self, key: &str, checksum: i64, now: i64) -> Option<Value> {
        let store = self.inner.persistent.as_ref()?;
        match store.get(key, checksum, now) {
            Ok(Some(entry)) => {
                if let Err(e) = self.inner.local.set(key, &entry) {
                    tracing::debug!(cache = %self.log_prefix(), key, error = %e, "Failed to promote entry to local tier");
                }
                Some(entry.payload)
            }
            Ok(None) => None,
            Err(CacheError::Storage(StorageError::CorruptEntry { reason, .. })) => {
                tracing::warn!(cache = %self.log_prefix(), key, reason = %reason, "Corrupted persistent entry, deleting");
                self.delete(key);
                None
            }
            Err(e) => {
                tracing::error!(cache = %self.log_prefix(), key, error = %e, "Persistent cache read failed");
                None
            }
        }
    }

    /// Read `key` and convert the payload into `T`.
    ///
    /// A payload of the wrong shape is reported as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.get(key)?;
        match serde_json::from_value(payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(cache = %self.log_prefix(), key, error = %e, "Cached payload has unexpected shape");
                None
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> CacheResult<()> {
        self.set_with(key, value, &SetOptions::default())
    }

    /// Store `value` under `key` in both tiers.
    ///
    /// Returns an error only when `value` cannot be serialized or the write
    /// asks for unstructured mode. Tier failures are logged and swallowed.
    /// After [`close`](Self::close) this is a no-op.
    pub fn set_with<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &SetOptions,
    ) -> CacheResult<()> {
        if !options.structured {
            tracing::error!(cache = %self.log_prefix(), key, "Unstructured payloads are not supported");
            return Err(SerializationError::Unstructured {
                key: key.to_string(),
            }
            .into());
        }

        let payload = serde_json::to_value(value).map_err(|e| SerializationError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        CacheEntry::encode_payload(key, &payload)?;

        // Registered before the exit check so `close` either sees this task
        // or this call sees the exit flag.
        let _task = self.inner.tasks.register(format!("set.{key}"));
        if self.is_closed() {
            tracing::debug!(cache = %self.log_prefix(), key, "Cache closed, skipping write");
            return Ok(());
        }

        let expiration = options
            .expiration
            .unwrap_or(self.inner.config.default_expiration);
        let expires = expires_after(self.inner.clock.now(), expiration);
        let entry = CacheEntry::new(expires, payload, self.checksum(&options.checksum));

        let mut stored = false;
        match self.inner.local.set(key, &entry) {
            Ok(()) => stored |= self.inner.local.is_enabled(),
            Err(e) => {
                tracing::error!(cache = %self.log_prefix(), key, error = %e, "Local cache write failed")
            }
        }
        if let Some(store) = &self.inner.persistent {
            match store.set(key, &entry) {
                Ok(()) => stored = true,
                Err(e) => {
                    tracing::error!(cache = %self.log_prefix(), key, error = %e, "Persistent cache write failed")
                }
            }
        }

        if stored {
            StatCounters::bump(&self.inner.stats.sets);
            tracing::debug!(cache = %self.log_prefix(), key, expires, "Stored entry");
        }
        Ok(())
    }

    /// Remove `key` from both tiers. Missing keys are fine.
    pub fn delete(&self, key: &str) {
        let _task = self.inner.tasks.register(format!("delete.{key}"));
        if self.is_closed() {
            tracing::debug!(cache = %self.log_prefix(), key, "Cache closed, skipping delete");
            return;
        }

        if let Err(e) = self.inner.local.delete(key) {
            tracing::error!(cache = %self.log_prefix(), key, error = %e, "Local cache delete failed");
        }
        if let Some(store) = &self.inner.persistent {
            if let Err(e) = store.delete(key) {
                tracing::error!(cache = %self.log_prefix(), key, error = %e, "Persistent cache delete failed");
            }
        }

        StatCounters::bump(&self.inner.stats.deletes);
        tracing::debug!(cache = %self.log_prefix(), key, "Deleted entry");
    }

    /// Stop accepting work, wait for in-flight tasks and release the
    /// persistent connection.
    ///
    /// The wait polls every `close_poll_interval` and ends early on abort or
    /// after `close_timeout`. Calling it again does nothing.
    pub fn close(&self) {
        self.inner.shutdown();
    }

    /// Run `check_cleanup` on a background thread.
    fn spawn_deferred_cleanup(&self) {
        let guard = self.inner.tasks.register("cleanup.deferred");
        let cache = self.clone();
        let spawned = std::thread::Builder::new()
            .name("simplecache-cleanup".to_string())
            .spawn(move || {
                let outcome = cache.check_cleanup();
                tracing::debug!(cache = %cache.log_prefix(), ?outcome, "Deferred cleanup check finished");
                drop(guard);
            });
        if let Err(e) = spawned {
            tracing::warn!(cache = %self.log_prefix(), error = %e, "Failed to spawn deferred cleanup");
        }
    }
}
