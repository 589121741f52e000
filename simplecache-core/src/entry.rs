//! The cache entry shared by both tiers.

use crate::error::SerializationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One cached record: expiry, opaque payload and caller checksum.
///
/// `expires` and `checksum` use the encodings from [`crate::timestamp`] and
/// [`crate::checksum`]. The payload is never interpreted by the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub expires: i64,
    pub payload: Value,
    pub checksum: i64,
}

impl CacheEntry {
    pub fn new(expires: i64, payload: Value, checksum: i64) -> Self {
        Self {
            expires,
            payload,
            checksum,
        }
    }

    /// Whether the entry is still alive at `now` (exclusive).
    pub fn is_live(&self, now: i64) -> bool {
        self.expires > now
    }

    /// A requested checksum of 0 matches anything.
    pub fn matches_checksum(&self, requested: i64) -> bool {
        requested == 0 || requested == self.checksum
    }

    /// Both the expiry and checksum gates pass.
    pub fn is_valid(&self, now: i64, requested_checksum: i64) -> bool {
        self.is_live(now) && self.matches_checksum(requested_checksum)
    }

    /// Encode as the process-local slot format: a JSON array
    /// `[expires, payload, checksum]`.
    pub fn encode_slot(&self, key: &str) -> Result<String, SerializationError> {
        serde_json::to_string(&(self.expires, &self.payload, self.checksum)).map_err(|e| {
            SerializationError::Encode {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Decode a process-local slot.
    ///
    /// The slot must be a JSON array of at least three elements whose first
    /// and third elements are integers. Extra trailing elements are ignored.
    pub fn decode_slot(key: &str, raw: &str) -> Result<Self, SerializationError> {
        let decode_err = |reason: String| SerializationError::Decode {
            key: key.to_string(),
            reason,
        };

        let value: Value = serde_json::from_str(raw).map_err(|e| decode_err(e.to_string()))?;
        let mut items = match value {
            Value::Array(items) if items.len() >= 3 => items,
            _ => return Err(decode_err("expected [expires, payload, checksum]".into())),
        };

        let expires = items[0]
            .as_i64()
            .ok_or_else(|| decode_err("expires is not an integer".into()))?;
        let checksum = items[2]
            .as_i64()
            .ok_or_else(|| decode_err("checksum is not an integer".into()))?;
        let payload = items.swap_remove(1);

        Ok(Self::new(expires, payload, checksum))
    }

    /// Encode the payload column of the persistent table.
    pub fn encode_payload(key: &str, payload: &Value) -> Result<String, SerializationError> {
        serde_json::to_string(payload).map_err(|e| SerializationError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    /// Decode the payload column of the persistent table.
    pub fn decode_payload(key: &str, raw: &str) -> Result<Value, SerializationError> {
        serde_json::from_str(raw).map_err(|e| SerializationError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}
