//! Conversion between wall-clock time and the integer form stored in both
//! tiers.
//!
//! Values are whole seconds since the Unix epoch in UTC, so they order the
//! same way as the instants they encode and stay comparable across process
//! restarts and timezone changes.

use chrono::{DateTime, TimeDelta, Utc};
use std::time::Duration;

/// Encode an instant as comparable integer seconds.
pub fn to_comparable(t: DateTime<Utc>) -> i64 {
    t.timestamp()
}

/// Decode a stored timestamp. Returns `None` for out-of-range values.
pub fn from_comparable(value: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(value, 0)
}

/// Encode `now + ttl`.
///
/// A TTL that overflows the representable date range falls back to the
/// encoding of `now`, matching how the stores treat unrepresentable dates.
pub fn expires_after(now: DateTime<Utc>, ttl: Duration) -> i64 {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .map(to_comparable)
        .unwrap_or_else(|| to_comparable(now))
}
