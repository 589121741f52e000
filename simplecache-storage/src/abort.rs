//! Cooperative cancellation shared by every bounded wait in the cache.
//!
//! The embedding host flips the flag when it wants the add-on gone. Retry
//! backoff, `close` polling and sweeps all check it between iterations, so a
//! shutdown interrupts the cache within one poll slice.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest single sleep inside [`AbortSignal::wait`].
const POLL_SLICE: Duration = Duration::from_millis(10);

/// Shared "abort requested" flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    requested: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this signal to stop.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sleep for up to `timeout`, waking early on abort.
    ///
    /// Returns `true` if abort was requested before or during the wait.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_requested() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(POLL_SLICE.min(deadline - now));
        }
    }
}
