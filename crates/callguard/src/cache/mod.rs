//! Response caching
//!
//! [`ResponseCache`] stores serializable values under fingerprint keys
//! produced by [`generate_key`] (or the [`cache_key!`](crate::cache_key)
//! macro), bounded by TTL and a total byte budget. Persistence goes through
//! the [`SnapshotStore`] trait.

mod config;
mod core;
mod entry;
mod key;
mod persistence;
mod stats;

pub use self::config::{CacheConfig, CacheConfigBuilder, EvictionStrategy};
pub use self::core::{CacheValue, ResponseCache, SharedSnapshotStore};
pub use self::entry::CacheEntry;
pub use self::key::{generate_key, key_part};
pub use self::persistence::{
    CacheSnapshot, JsonFileStore, MemorySnapshotStore, SnapshotStore, SNAPSHOT_VERSION,
};
pub use self::stats::CacheStats;
