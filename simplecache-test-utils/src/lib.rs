//! SimpleCache Test Utilities
//!
//! Shared test infrastructure for the SimpleCache workspace:
//! - Proptest generators for keys, payloads and version tags
//! - Mock collaborators (scripted HTTP fetcher, failing property map)
//! - Fixtures for caches on temporary directories
//! - Assertions for cache-specific outcomes

pub use simplecache_core::{
    CacheConfig, CacheEntry, CacheError, CacheResult, ConfigError, ManualClock,
    SerializationError, StorageError,
};
pub use simplecache_storage::{
    AbortSignal, HttpFetcher, HttpResponse, InMemoryPropertyMap, PropertyMap, SimpleCache,
};

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

// ============================================================================
// MOCK COLLABORATORS
// ============================================================================

/// HTTP fetcher answering from a script of canned responses.
///
/// Each URL has a queue; every fetch pops the next response, and the last
/// one repeats once the queue is down to a single entry. Unknown URLs fail
/// with [`CacheError::Fetch`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedFetcher {
    script: Arc<Mutex<HashMap<String, VecDeque<HttpResponse>>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `response` for `url`.
    pub fn respond(self, url: impl Into<String>, response: HttpResponse) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.entry(url.into()).or_default().push_back(response);
        }
        self
    }

    /// URLs fetched so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.requests().len()
    }
}

#[async_trait]
impl HttpFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> CacheResult<HttpResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(url.to_string());
        }

        let mut script = self.script.lock().map_err(|_| CacheError::Fetch {
            url: url.to_string(),
            reason: "script lock poisoned".to_string(),
        })?;
        let queue = script.get_mut(url).ok_or_else(|| CacheError::Fetch {
            url: url.to_string(),
            reason: "no scripted response".to_string(),
        })?;

        let response = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        response.ok_or_else(|| CacheError::Fetch {
            url: url.to_string(),
            reason: "script exhausted".to_string(),
        })
    }
}

/// Property map that fails every call, for hosts without a usable
/// process-local mechanism.
#[derive(Debug, Clone, Default)]
pub struct BrokenPropertyMap;

impl PropertyMap for BrokenPropertyMap {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable {
            reason: "property map unavailable".to_string(),
        })
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable {
            reason: "property map unavailable".to_string(),
        })
    }

    fn clear(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable {
            reason: "property map unavailable".to_string(),
        })
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for cache keys and payloads.

    use proptest::prelude::*;
    use serde_json::{Map, Value};

    /// Cache keys shaped like real ones: dotted names, URLs, spaces.
    pub fn arb_key() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z][a-z0-9_]{0,15}(\\.[a-z0-9_]{1,12}){0,3}",
            "[a-z]{3,8}\\.open_url, url = https://[a-z]{3,10}\\.org/[a-z0-9/]{0,20}",
            "[A-Za-z0-9 ._-]{1,40}",
        ]
    }

    /// Version tags, including the empty "accept anything" tag.
    pub fn arb_checksum_tag() -> impl Strategy<Value = String> {
        prop_oneof![Just(String::new()), "[a-z0-9.-]{1,12}"]
    }

    /// Scalar JSON values. Numbers are integers so that they compare equal
    /// after a text round trip.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            ".{0,24}".prop_map(Value::String),
        ]
    }

    /// Nested JSON payloads of modest size.
    pub fn arb_payload() -> impl Strategy<Value = Value> {
        arb_scalar().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,8}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
            ]
        })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Caches on temporary directories with a controllable clock.

    use super::*;
    use std::path::PathBuf;
    use std::thread::JoinHandle;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Config with short retry delays, pointing at `dir`.
    pub fn fast_config(dir: &std::path::Path) -> CacheConfig {
        CacheConfig::new()
            .with_db_dir(dir)
            .with_retries(5, Duration::from_millis(10))
            .with_busy_timeout(Duration::from_millis(10))
    }

    /// A cache on its own temp directory, property map and manual clock.
    ///
    /// The directory is deleted when the fixture drops.
    pub struct TestCache {
        pub cache: SimpleCache,
        pub clock: ManualClock,
        pub properties: Arc<InMemoryPropertyMap>,
        pub config: CacheConfig,
        dir: TempDir,
    }

    impl TestCache {
        pub fn new() -> Self {
            Self::with_config(fast_config)
        }

        /// Build the fixture from a config derived from the temp directory.
        pub fn with_config(make: impl FnOnce(&std::path::Path) -> CacheConfig) -> Self {
            let dir = TempDir::new().expect("TempDir creation should succeed");
            let config = make(dir.path());
            let clock = ManualClock::starting_now();
            let properties = Arc::new(InMemoryPropertyMap::new());
            let cache = build(&config, &clock, properties.clone());
            Self {
                cache,
                clock,
                properties,
                config,
                dir,
            }
        }

        /// Another façade over the same file, property map and clock, as a
        /// second caller in the same process would have.
        pub fn sibling(&self) -> SimpleCache {
            build(&self.config, &self.clock, self.properties.clone())
        }

        /// A façade over the same file but with a fresh property map, as a
        /// separate process would have.
        pub fn other_process(&self) -> SimpleCache {
            build(
                &self.config,
                &self.clock,
                Arc::new(InMemoryPropertyMap::new()),
            )
        }

        pub fn dir(&self) -> &std::path::Path {
            self.dir.path()
        }

        pub fn db_path(&self) -> PathBuf {
            self.config
                .db_path()
                .expect("fixture config has a db directory")
        }

        /// Overwrite the database file with bytes that are not SQLite.
        pub fn corrupt_db_file(&self) {
            std::fs::write(
                self.db_path(),
                b"garbage garbage garbage garbage garbage garbage garbage garbage garbage",
            )
            .expect("overwrite db file");
        }

        /// Cut the database file down to its first `len` bytes.
        pub fn truncate_db_file(&self, len: u64) {
            let file = std::fs::OpenOptions::new()
                .write(true)
                .open(self.db_path())
                .expect("open db file");
            file.set_len(len).expect("truncate db file");
        }

        /// Replace the stored payload of `key` with text that is not JSON.
        pub fn corrupt_row(&self, key: &str) {
            let conn = rusqlite::Connection::open(self.db_path()).expect("open db file");
            conn.execute(
                "UPDATE simplecache SET data = '{not json' WHERE id = ?1",
                [key],
            )
            .expect("corrupt row");
        }

        /// Number of rows in the persistent table.
        pub fn row_count(&self) -> i64 {
            let conn = rusqlite::Connection::open(self.db_path()).expect("open db file");
            conn.query_row("SELECT COUNT(*) FROM simplecache", [], |row| row.get(0))
                .expect("count rows")
        }
    }

    impl Default for TestCache {
        fn default() -> Self {
            Self::new()
        }
    }

    fn build(
        config: &CacheConfig,
        clock: &ManualClock,
        properties: Arc<InMemoryPropertyMap>,
    ) -> SimpleCache {
        SimpleCache::builder(config.clone())
            .clock(Arc::new(clock.clone()))
            .properties(properties)
            .cleanup_on_open(false)
            .build()
            .expect("test cache should open")
    }

    /// Hold an exclusive SQLite lock on `path` from another connection.
    ///
    /// Returns once the lock is held; the lock is released after `hold`.
    pub fn hold_exclusive_lock(path: PathBuf, hold: Duration) -> JoinHandle<()> {
        let (locked_tx, locked_rx) = std::sync::mpsc::channel();
        let handle = std::thread::spawn(move || {
            let conn = rusqlite::Connection::open(&path).expect("open db for locking");
            conn.execute_batch("BEGIN EXCLUSIVE")
                .expect("take exclusive lock");
            let _ = locked_tx.send(());
            std::thread::sleep(hold);
            conn.execute_batch("COMMIT").expect("release exclusive lock");
        });
        locked_rx
            .recv()
            .expect("lock holder should signal before sleeping");
        handle
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache results.

    use super::*;
    use serde_json::Value;

    #[track_caller]
    pub fn assert_hit(cache: &SimpleCache, key: &str, expected: &Value) {
        match cache.get(key) {
            Some(actual) => assert_eq!(&actual, expected, "Wrong payload for key {key:?}"),
            None => panic!("Expected hit for key {key:?}, got miss"),
        }
    }

    #[track_caller]
    pub fn assert_miss(cache: &SimpleCache, key: &str) {
        if let Some(actual) = cache.get(key) {
            panic!("Expected miss for key {key:?}, got {actual}");
        }
    }

    #[track_caller]
    pub fn assert_serialization_error<T: std::fmt::Debug>(result: &CacheResult<T>) {
        match result {
            Err(CacheError::Serialization(_)) => {}
            other => panic!("Expected Serialization error, got: {:?}", other),
        }
    }
}
