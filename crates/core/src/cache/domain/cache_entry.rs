use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// One cached value with its insertion time and optional time-to-live.
///
/// This is also the on-disk record: each `<key>.cache` file holds one
/// `CacheEntry` serialized as JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: serde_json::Value,
    /// Insertion time in milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Time-to-live in milliseconds. `None` or zero never expires.
    #[serde(default)]
    pub ttl: Option<u64>,
}

impl CacheEntry {
    pub fn new(value: serde_json::Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            timestamp: now_millis(),
            ttl: ttl.map(ttl_millis),
        }
    }

    /// Absolute expiry in epoch milliseconds, if the entry can expire.
    pub fn expires_at(&self) -> Option<u64> {
        match self.ttl {
            Some(ttl) if ttl > 0 => Some(self.timestamp.saturating_add(ttl)),
            _ => None,
        }
    }

    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at().is_some_and(|at| now_ms > at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }
}

/// Whole milliseconds, rounded up so a nonzero TTL never becomes zero.
fn ttl_millis(ttl: Duration) -> u64 {
    let millis = ttl.as_millis();
    let rounded = if ttl > Duration::from_millis(millis as u64) {
        millis + 1
    } else {
        millis
    };
    u64::try_from(rounded).unwrap_or(u64::MAX)
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
