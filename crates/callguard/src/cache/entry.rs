//! Stored cache entries

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One cached value with its bookkeeping
///
/// Timestamps are Unix milliseconds so entries survive a snapshot round
/// trip unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: u64,
    pub expires_at: u64,
    /// Serialized size of `value`
    pub size_bytes: usize,
    pub access_count: u64,
    pub last_access_at: u64,
    #[serde(default)]
    pub metadata: Option<Value>,
    /// Tie-breaker for entries created or touched in the same millisecond
    #[serde(skip)]
    pub(crate) insert_seq: u64,
    #[serde(skip)]
    pub(crate) access_seq: u64,
}

impl<V> CacheEntry<V> {
    /// An entry expires strictly after `expires_at`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at < now_ms
    }

    /// Time left before expiry, in milliseconds
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at.saturating_sub(now_ms)
    }

    pub(crate) fn touch(&mut self, now_ms: u64, seq: u64) {
        self.access_count += 1;
        self.last_access_at = now_ms;
        self.access_seq = seq;
    }
}
