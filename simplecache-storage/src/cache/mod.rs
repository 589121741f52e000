//! Cache tiers and the façade over them.
//!
//! - [`local`]: process-local tier on top of an injected [`PropertyMap`].
//! - [`sqlite_backend`]: persistent tier in a single SQLite file.
//! - [`facade`]: [`SimpleCache`], the two tiers behind one read/write API.
//! - [`sweep`]: expiry sweeps and the optional periodic sweeper.
//! - [`memoize`]: cache-wrapped operations.

pub mod facade;
pub mod local;
pub mod memoize;
pub mod properties;
pub mod sqlite_backend;
pub mod sweep;
pub mod tasks;
pub mod traits;

pub use facade::{GetOptions, SetOptions, SimpleCache, SimpleCacheBuilder};
pub use local::LocalStore;
pub use memoize::{memoize, Memoized, DEFAULT_MEMO_EXPIRATION};
pub use properties::{process_properties, InMemoryPropertyMap};
pub use sqlite_backend::{SqliteOptions, SqliteStore};
pub use sweep::{spawn_sweeper, sweep_task, SweepMetrics, SweepOutcome};
pub use tasks::{BusyTasks, TaskGuard};
pub use traits::{CacheStats, PropertyMap};
