//! SQLite-backed persistent tier.
//!
//! One file, one table:
//!
//! ```text
//! simplecache(id TEXT UNIQUE, expires INTEGER, data TEXT, checksum INTEGER)
//! ```
//!
//! # Contention
//!
//! Several processes may open the same file. Every statement runs inside a
//! bounded retry loop: a "database is locked" / "busy" failure is retried
//! after a fixed delay up to `max_retries` times, then abandoned with
//! [`StorageError::Busy`]. Writes are `INSERT OR REPLACE`, so a retried
//! write is idempotent. SQLite's own busy handler is capped at the retry
//! delay, so the abort signal is checked at least that often.
//!
//! # Self-healing
//!
//! The connection is opened lazily and probed with a trivial `SELECT`. A
//! missing, truncated or foreign file fails the probe and is deleted and
//! recreated. A statement that later reports corruption or an I/O failure
//! drops the connection so the next call goes through the probe again.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use simplecache_core::{CacheEntry, CacheResult, StorageError};

use crate::abort::AbortSignal;

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS simplecache(
    id TEXT UNIQUE, expires INTEGER, data TEXT, checksum INTEGER)";
const PROBE_SQL: &str = "SELECT id FROM simplecache LIMIT 1";
const SELECT_SQL: &str = "SELECT expires, data, checksum FROM simplecache WHERE id = ?1";
const UPSERT_SQL: &str =
    "INSERT OR REPLACE INTO simplecache(id, expires, data, checksum) VALUES (?1, ?2, ?3, ?4)";
const DELETE_SQL: &str = "DELETE FROM simplecache WHERE id = ?1";
const DELETE_EXPIRED_SQL: &str = "DELETE FROM simplecache WHERE id = ?1 AND expires <= ?2";
const LIST_SQL: &str = "SELECT id, expires FROM simplecache";
const COUNT_SQL: &str = "SELECT COUNT(*) FROM simplecache";

/// Retry and timeout knobs for [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub busy_timeout: Duration,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            max_retries: simplecache_core::config::DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(simplecache_core::config::DEFAULT_RETRY_DELAY_MS),
            busy_timeout: Duration::from_millis(simplecache_core::config::DEFAULT_BUSY_TIMEOUT_MS),
        }
    }
}

/// Persistent tier.
///
/// `SqliteStore` is `Send + Sync`; threads of one process share the single
/// connection through a mutex, other processes coordinate through SQLite's
/// own file locking plus the retry loop.
#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
    options: SqliteOptions,
    abort: AbortSignal,
    log_prefix: String,
    conn: Mutex<Option<Connection>>,
    closed: AtomicBool,
}

/// Outcome of a single attempt, before retry classification.
enum Attempt<T> {
    Done(T),
    Busy(String),
}

impl SqliteStore {
    /// Create a store for the file at `path`. Nothing is opened until the
    /// first operation.
    pub fn new(
        path: impl Into<PathBuf>,
        options: SqliteOptions,
        abort: AbortSignal,
        log_prefix: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            options,
            abort,
            log_prefix: log_prefix.into(),
            conn: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up `key`.
    ///
    /// Returns `Ok(None)` for a missing row, an expired row, or a checksum
    /// mismatch. None of those touch the row. A row whose payload does not
    /// decode yields [`StorageError::CorruptEntry`]; removing it is up to the
    /// caller.
    pub fn get(&self, key: &str, checksum: i64, now: i64) -> CacheResult<Option<CacheEntry>> {
        let row: Option<(i64, String, i64)> = self.execute("get", |conn| {
            conn.query_row(SELECT_SQL, params![key], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .optional()
        })?;

        let Some((expires, data, stored_checksum)) = row else {
            return Ok(None);
        };
        if expires <= now || !(checksum == 0 || checksum == stored_checksum) {
            return Ok(None);
        }

        let payload = CacheEntry::decode_payload(key, &data).map_err(|e| {
            StorageError::CorruptEntry {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;
        Ok(Some(CacheEntry::new(expires, payload, stored_checksum)))
    }

    /// Insert or replace the row for `key`.
    pub fn set(&self, key: &str, entry: &CacheEntry) -> CacheResult<()> {
        let data = CacheEntry::encode_payload(key, &entry.payload)?;
        self.execute("set", |conn| {
            conn.execute(UPSERT_SQL, params![key, entry.expires, data, entry.checksum])
        })?;
        Ok(())
    }

    /// Remove the row for `key`. Returns whether a row existed.
    pub fn delete(&self, key: &str) -> CacheResult<bool> {
        let affected = self.execute("delete", |conn| conn.execute(DELETE_SQL, params![key]))?;
        Ok(affected > 0)
    }

    /// Remove the row for `key` only if it has expired by `now`.
    ///
    /// A row rewritten with a later expiry since the caller looked at it is
    /// left alone. Returns whether a row was removed.
    pub fn delete_expired(&self, key: &str, now: i64) -> CacheResult<bool> {
        let affected = self.execute("delete_expired", |conn| {
            conn.execute(DELETE_EXPIRED_SQL, params![key, now])
        })?;
        Ok(affected > 0)
    }

    /// Every `(id, expires)` pair in the table.
    pub fn list_expiries(&self) -> CacheResult<Vec<(String, i64)>> {
        let rows = self.execute("list", |conn| {
            let mut stmt = conn.prepare(LIST_SQL)?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<Vec<(String, i64)>, _>>()
        })?;
        Ok(rows)
    }

    /// Number of rows, live or expired.
    pub fn count(&self) -> CacheResult<u64> {
        let count: i64 =
            self.execute("count", |conn| conn.query_row(COUNT_SQL, [], |row| row.get(0)))?;
        Ok(count.max(0) as u64)
    }

    /// Rewrite the file to reclaim space left by deleted rows.
    pub fn vacuum(&self) -> CacheResult<()> {
        self.execute("vacuum", |conn| conn.execute_batch("VACUUM"))?;
        Ok(())
    }

    /// Drop the connection for good. Later operations fail with
    /// [`StorageError::Closed`] and never reopen the file.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        match self.conn.lock() {
            Ok(mut guard) => {
                if let Some(conn) = guard.take() {
                    if let Err((_, e)) = conn.close() {
                        tracing::warn!(cache = %self.log_prefix, error = %e, "Error closing persistent cache");
                    }
                }
            }
            Err(_) => {
                tracing::error!(cache = %self.log_prefix, "Persistent cache connection lock poisoned");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run `op` with retry-on-busy.
    fn execute<T>(
        &self,
        op_name: &str,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StorageError> {
        let mut attempts = 0u32;
        loop {
            if self.abort.is_requested() {
                return Err(StorageError::Aborted);
            }
            if self.is_closed() {
                return Err(StorageError::Closed);
            }
            attempts += 1;

            match self.attempt(&mut op)? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Busy(reason) => {
                    if attempts >= self.options.max_retries {
                        tracing::warn!(
                            cache = %self.log_prefix,
                            op = op_name,
                            attempts,
                            "Persistent cache still locked, max retries exceeded"
                        );
                        return Err(StorageError::Busy { attempts, reason });
                    }
                    tracing::debug!(cache = %self.log_prefix, op = op_name, attempts, "Retrying locked persistent cache");
                    if self.abort.wait(self.options.retry_delay) {
                        return Err(StorageError::Aborted);
                    }
                }
            }
        }
    }

    /// One attempt: open if needed, run, classify the error.
    fn attempt<T>(
        &self,
        op: &mut impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> Result<Attempt<T>, StorageError> {
        let mut guard = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        if guard.is_none() {
            match self.open_healing() {
                Ok(conn) => *guard = Some(conn),
                Err(e) if is_busy(&e) => return Ok(Attempt::Busy(e.to_string())),
                Err(e) => {
                    return Err(StorageError::Unavailable {
                        reason: e.to_string(),
                    })
                }
            }
        }
        let conn = guard.as_ref().ok_or_else(|| StorageError::Unavailable {
            reason: "connection not open".to_string(),
        })?;

        match op(conn) {
            Ok(value) => Ok(Attempt::Done(value)),
            Err(e) if is_busy(&e) => Ok(Attempt::Busy(e.to_string())),
            Err(e) if needs_reopen(&e) => {
                tracing::warn!(cache = %self.log_prefix, error = %e, "Persistent cache corrupted, will recreate on next use");
                guard.take();
                Err(StorageError::Unavailable {
                    reason: e.to_string(),
                })
            }
            Err(e) => Err(StorageError::QueryFailed {
                reason: e.to_string(),
            }),
        }
    }

    /// Open and probe the file, recreating it if the probe fails for any
    /// reason other than contention.
    fn open_healing(&self) -> rusqlite::Result<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    tracing::error!(
                        cache = %self.log_prefix,
                        dir = %parent.display(),
                        error = %e,
                        "Failed to create persistent cache directory"
                    );
                }
            }
        }

        match self.open_and_probe() {
            Ok(conn) => Ok(conn),
            Err(e) if is_busy(&e) => Err(e),
            Err(e) => {
                tracing::warn!(
                    cache = %self.log_prefix,
                    path = %self.path.display(),
                    error = %e,
                    "Persistent cache failed integrity probe, recreating"
                );
                self.remove_files();
                let conn = self.connect()?;
                conn.execute_batch(CREATE_TABLE_SQL)?;
                tracing::info!(cache = %self.log_prefix, path = %self.path.display(), "Persistent cache table created");
                Ok(conn)
            }
        }
    }

    fn open_and_probe(&self) -> rusqlite::Result<Connection> {
        let conn = self.connect()?;
        conn.query_row(PROBE_SQL, [], |_| Ok(())).optional()?;
        Ok(conn)
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.options.busy_timeout.min(self.options.retry_delay))?;
        Ok(conn)
    }

    /// Delete the database file and any journal left next to it.
    fn remove_files(&self) {
        let mut targets = vec![self.path.clone()];
        for suffix in ["-journal", "-wal", "-shm"] {
            let mut name = self.path.as_os_str().to_owned();
            name.push(suffix);
            targets.push(PathBuf::from(name));
        }

        for target in targets.iter().filter(|p| p.exists()) {
            match std::fs::remove_file(target) {
                Ok(()) => tracing::info!(cache = %self.log_prefix, path = %target.display(), "Deleted persistent cache file"),
                Err(e) => tracing::error!(
                    cache = %self.log_prefix,
                    path = %target.display(),
                    error = %e,
                    "Failed to delete persistent cache file"
                ),
            }
        }
    }
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Errors after which the open connection is no longer trusted.
fn needs_reopen(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase | ErrorCode::SystemIoFailure)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use simplecache_core::CacheError;
    use tempfile::TempDir;

    fn create_test_store() -> (SqliteStore, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let store = SqliteStore::new(
            temp_dir.path().join("simplecache.db"),
            SqliteOptions {
                max_retries: 3,
                retry_delay: Duration::from_millis(5),
                busy_timeout: Duration::from_millis(5),
            },
            AbortSignal::new(),
            "Test",
        );
        (store, temp_dir)
    }

    #[test]
    fn test_put_and_get() {
        let (store, _temp_dir) = create_test_store();
        let entry = CacheEntry::new(200, json!({"title": "Show A"}), 0);
        store.set("q1", &entry).expect("set should succeed");

        let cached = store.get("q1", 0, 100).expect("get should succeed");
        assert_eq!(cached, Some(entry));
    }

    #[test]
    fn test_get_nonexistent() {
        let (store, _temp_dir) = create_test_store();
        assert!(store.get("missing", 0, 0).expect("get should succeed").is_none());
    }

    #[test]
    fn test_expired_row_is_absent_but_kept() {
        let (store, _temp_dir) = create_test_store();
        store
            .set("old", &CacheEntry::new(50, json!(1), 0))
            .expect("set should succeed");
        assert!(store.get("old", 0, 100).expect("get").is_none());
        assert_eq!(store.count().expect("count"), 1);
    }

    #[test]
    fn test_checksum_mismatch_keeps_row() {
        let (store, _temp_dir) = create_test_store();
        store
            .set("k", &CacheEntry::new(200, json!("v"), 65))
            .expect("set should succeed");
        assert!(store.get("k", 66, 0).expect("get").is_none());
        assert_eq!(store.count().expect("count"), 1);
        assert!(store.get("k", 65, 0).expect("get").is_some());
    }

    #[test]
    fn test_overwrite() {
        let (store, _temp_dir) = create_test_store();
        store.set("k", &CacheEntry::new(200, json!("v1"), 0)).unwrap();
        store.set("k", &CacheEntry::new(200, json!("v2"), 0)).unwrap();
        let cached = store.get("k", 0, 0).unwrap().expect("row should exist");
        assert_eq!(cached.payload, json!("v2"));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_delete() {
        let (store, _temp_dir) = create_test_store();
        store.set("k", &CacheEntry::new(200, json!("v"), 0)).unwrap();
        assert!(store.delete("k").unwrap());
        assert!(!store.delete("k").unwrap());
        assert!(store.get("k", 0, 0).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_row_is_reported() {
        let (store, temp_dir) = create_test_store();
        store.set("k", &CacheEntry::new(200, json!("v"), 0)).unwrap();
        {
            let conn = Connection::open(temp_dir.path().join("simplecache.db")).unwrap();
            conn.execute("UPDATE simplecache SET data = '{broken' WHERE id = 'k'", [])
                .unwrap();
        }
        let err = store.get("k", 0, 0).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Storage(StorageError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn test_garbage_file_is_recreated() {
        let (store, temp_dir) = create_test_store();
        std::fs::write(
            temp_dir.path().join("simplecache.db"),
            b"this is definitely not a sqlite database, just some bytes padded out",
        )
        .unwrap();

        store.set("k", &CacheEntry::new(200, json!("v"), 0)).expect("set after heal");
        assert!(store.get("k", 0, 0).unwrap().is_some());
    }

    #[test]
    fn test_missing_directory_is_created() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteStore::new(
            temp_dir.path().join("profile/addon/simplecache.db"),
            SqliteOptions::default(),
            AbortSignal::new(),
            "Test",
        );
        store.set("k", &CacheEntry::new(200, json!("v"), 0)).unwrap();
        assert!(temp_dir.path().join("profile/addon/simplecache.db").exists());
    }

    #[test]
    fn test_delete_expired_keeps_refreshed_row() {
        let (store, _temp_dir) = create_test_store();
        store.set("k", &CacheEntry::new(50, json!("old"), 0)).unwrap();
        store.set("gone", &CacheEntry::new(50, json!("old"), 0)).unwrap();

        let listed = store.list_expiries().unwrap();
        assert!(listed.iter().all(|(_, expires)| *expires == 50));

        // Rewritten by another writer after the listing.
        store.set("k", &CacheEntry::new(500, json!("fresh"), 0)).unwrap();

        assert!(!store.delete_expired("k", 100).unwrap());
        assert!(store.delete_expired("gone", 100).unwrap());
        let kept = store.get("k", 0, 100).unwrap().expect("refreshed row survives");
        assert_eq!(kept.payload, json!("fresh"));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_closed_store_never_reopens() {
        let (store, temp_dir) = create_test_store();
        let db_path = temp_dir.path().join("simplecache.db");
        store.set("k", &CacheEntry::new(200, json!("v"), 0)).unwrap();
        store.close();
        std::fs::remove_file(&db_path).unwrap();

        let err = store
            .set("late", &CacheEntry::new(200, json!("v"), 0))
            .unwrap_err();
        assert!(matches!(err, CacheError::Storage(StorageError::Closed)));
        assert!(store.get("k", 0, 0).is_err());
        assert!(!db_path.exists());
    }

    #[test]
    fn test_long_busy_timeout_still_sees_abort() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("simplecache.db");
        let abort = AbortSignal::new();
        let store = SqliteStore::new(
            &db_path,
            SqliteOptions {
                max_retries: 1_000,
                retry_delay: Duration::from_millis(20),
                busy_timeout: Duration::from_secs(30),
            },
            abort.clone(),
            "Test",
        );
        store.set("k", &CacheEntry::new(200, json!("v"), 0)).unwrap();

        let holder = Connection::open(&db_path).unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE").unwrap();
        let aborter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            abort.request();
        });

        let start = std::time::Instant::now();
        let err = store
            .set("k2", &CacheEntry::new(200, json!("v"), 0))
            .unwrap_err();
        assert!(matches!(err, CacheError::Storage(StorageError::Aborted)));
        assert!(start.elapsed() < Duration::from_secs(1));

        aborter.join().unwrap();
        holder.execute_batch("COMMIT").unwrap();
    }

    #[test]
    fn test_list_and_vacuum() {
        let (store, _temp_dir) = create_test_store();
        for i in 0..5 {
            store
                .set(&format!("k{i}"), &CacheEntry::new(i, json!(i), 0))
                .unwrap();
        }
        let mut rows = store.list_expiries().unwrap();
        rows.sort();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0], ("k0".to_string(), 0));
        store.vacuum().expect("vacuum should succeed");
    }

    #[test]
    fn test_locked_database_gives_up_after_retries() {
        let (store, temp_dir) = create_test_store();
        store.set("k", &CacheEntry::new(200, json!("v"), 0)).unwrap();

        let holder = Connection::open(temp_dir.path().join("simplecache.db")).unwrap();
        holder.execute_batch("BEGIN EXCLUSIVE").unwrap();

        let err = store
            .set("k2", &CacheEntry::new(200, json!("v"), 0))
            .unwrap_err();
        assert!(matches!(
            err,
            CacheError::Storage(StorageError::Busy { attempts: 3, .. })
        ));

        holder.execute_batch("COMMIT").unwrap();
        store
            .set("k2", &CacheEntry::new(200, json!("v"), 0))
            .expect("set should succeed once the lock is released");
    }

    #[test]
    fn test_abort_stops_retrying() {
        let (store, _temp_dir) = create_test_store();
        store.abort.request();
        let err = store.set("k", &CacheEntry::new(1, json!(1), 0)).unwrap_err();
        assert!(matches!(err, CacheError::Storage(StorageError::Aborted)));
    }
}
