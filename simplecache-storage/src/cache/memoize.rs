//! Memoization combinator.
//!
//! Wraps an operation so its results are cached under a key built from its
//! arguments:
//!
//! ```ignore
//! let shows = memoize(
//!     cache.clone(),
//!     "srgssr.show_list",
//!     |bu: &str| bu.to_string(),
//!     |bu: &str| fetch_show_list(bu),
//! );
//! let list = shows.call("SRF");          // runs fetch_show_list, caches it
//! let again = shows.call("srf");         // served from cache
//! let fresh = shows.call_with("SRF", true);
//! ```

use std::marker::PhantomData;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::facade::{SetOptions, SimpleCache};

/// Default lifetime of memoized results.
pub const DEFAULT_MEMO_EXPIRATION: Duration = Duration::from_secs(14 * 24 * 3600);

/// A cached operation. Build one with [`memoize`].
pub struct Memoized<A: ?Sized, T, K, F> {
    cache: SimpleCache,
    name: String,
    key_fn: K,
    op: F,
    expiration: Duration,
    _marker: PhantomData<fn(&A) -> T>,
}

/// Wrap `op` so results are cached under `"{name}.{key_fn(args)}"`,
/// lower-cased.
pub fn memoize<A, T, K, F>(
    cache: SimpleCache,
    name: impl Into<String>,
    key_fn: K,
    op: F,
) -> Memoized<A, T, K, F>
where
    A: ?Sized,
    T: Serialize + DeserializeOwned,
    K: Fn(&A) -> String,
    F: Fn(&A) -> T,
{
    Memoized {
        cache,
        name: name.into(),
        key_fn,
        op,
        expiration: DEFAULT_MEMO_EXPIRATION,
        _marker: PhantomData,
    }
}

impl<A, T, K, F> Memoized<A, T, K, F>
where
    A: ?Sized,
    T: Serialize + DeserializeOwned,
    K: Fn(&A) -> String,
    F: Fn(&A) -> T,
{
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Cache key for `args`.
    pub fn key_for(&self, args: &A) -> String {
        format!("{}.{}", self.name, (self.key_fn)(args)).to_lowercase()
    }

    pub fn call(&self, args: &A) -> T {
        self.call_with(args, false)
    }

    /// Return the cached result for `args`, or run the operation and cache
    /// what it returns. `ignore_cache` skips the lookup but still stores the
    /// fresh result.
    pub fn call_with(&self, args: &A, ignore_cache: bool) -> T {
        let key = self.key_for(args);

        if !ignore_cache {
            if let Some(cached) = self.cache.get_as::<T>(&key) {
                return cached;
            }
        }

        let result = (self.op)(args);
        let options = SetOptions::new().with_expiration(self.expiration);
        if let Err(e) = self.cache.set_with(&key, &result, &options) {
            tracing::warn!(cache = %self.cache.config().log_prefix, key = %key, error = %e, "Failed to cache memoized result");
        }
        result
    }
}
