//! Byte-bounded TTL cache with pluggable eviction

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::config::{CacheConfig, EvictionStrategy};
use super::entry::CacheEntry;
use super::persistence::{CacheSnapshot, JsonFileStore, SnapshotStore, SNAPSHOT_VERSION};
use super::stats::CacheStats;
use crate::clock::{Clock, SystemClock};
use crate::error::{CallguardError, CallguardResult};
use crate::observer::{self, EvictionReason, ResilienceEvent, SharedObserver};
use crate::scheduler::{PeriodicTask, TickFlow};

/// Values the cache can hold: cloneable and serializable for sizing and
/// snapshots
pub trait CacheValue: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Shared handle to a snapshot store
pub type SharedSnapshotStore<V> = Arc<dyn SnapshotStore<V>>;

#[derive(Debug)]
struct Storage<V> {
    entries: HashMap<String, CacheEntry<V>>,
    total_size: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    next_seq: u64,
}

impl<V> Storage<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            total_size: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            next_seq: 0,
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.total_size = self.total_size.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            total_size_bytes: self.total_size,
            entry_count: self.entries.len(),
        }
    }

    /// Pick the entry the strategy would drop next
    fn victim(&self, strategy: EvictionStrategy) -> Option<String> {
        let entries = self.entries.values();
        let victim = match strategy {
            EvictionStrategy::Lru => entries.min_by_key(|e| (e.last_access_at, e.access_seq)),
            EvictionStrategy::Lfu => {
                entries.min_by_key(|e| (e.access_count, e.created_at, e.insert_seq))
            }
            EvictionStrategy::Fifo => entries.min_by_key(|e| (e.created_at, e.insert_seq)),
        };
        victim.map(|e| e.key.clone())
    }

    /// Insert `entry`, evicting until it fits or the cache is empty.
    ///
    /// Returns evicted `(key, size)` pairs.
    fn insert(
        &mut self,
        mut entry: CacheEntry<V>,
        max_size: usize,
        strategy: EvictionStrategy,
    ) -> Vec<(String, usize)> {
        self.remove(&entry.key);

        let mut evicted = Vec::new();
        while self.total_size + entry.size_bytes > max_size && !self.entries.is_empty() {
            let Some(key) = self.victim(strategy) else {
                break;
            };
            if let Some(old) = self.remove(&key) {
                self.evictions += 1;
                evicted.push((key, old.size_bytes));
            }
        }

        let seq = self.next_seq();
        entry.insert_seq = seq;
        entry.access_seq = seq;
        self.total_size += entry.size_bytes;
        self.entries.insert(entry.key.clone(), entry);
        evicted
    }
}

struct CacheInner<V, C: Clock> {
    config: CacheConfig,
    storage: RwLock<Storage<V>>,
    clock: C,
    observer: RwLock<SharedObserver>,
    store: Option<SharedSnapshotStore<V>>,
}

impl<V: CacheValue, C: Clock> CacheInner<V, C> {
    fn emit(&self, event: ResilienceEvent) {
        self.observer.read().on_event(&event);
    }

    fn emit_evictions(&self, evicted: Vec<(String, usize)>, reason: EvictionReason) {
        for (key, size_bytes) in evicted {
            debug!(key = %key, size_bytes, ?reason, "cache entry evicted");
            self.emit(ResilienceEvent::CacheEviction { key, reason, size_bytes });
        }
    }

    fn snapshot(&self) -> CacheSnapshot<V> {
        let storage = self.storage.read();
        let mut entries: Vec<CacheEntry<V>> = storage.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.insert_seq);
        CacheSnapshot {
            version: SNAPSHOT_VERSION,
            timestamp: self.clock.millis_since_epoch(),
            entries,
            stats: storage.stats(),
        }
    }

    async fn persist(&self) -> CallguardResult<()> {
        let Some(store) = self.store.as_ref() else {
            return Ok(());
        };
        let snapshot = self.snapshot();
        store.save(&snapshot).await?;
        debug!(entries = snapshot.entries.len(), "cache snapshot saved");
        Ok(())
    }

    /// Persist, logging instead of returning failures
    async fn persist_logged(&self) {
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist cache snapshot");
        }
    }

    async fn restore(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };

        let snapshot = match store.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return,
            Err(CallguardError::UnsupportedSnapshotVersion { found, expected }) => {
                warn!(%found, expected, "ignoring cache snapshot with unsupported version");
                return;
            }
            Err(e) => {
                warn!(error = %e, "failed to load cache snapshot");
                return;
            }
        };

        let now_ms = self.clock.millis_since_epoch();
        let mut live: Vec<CacheEntry<V>> =
            snapshot.entries.into_iter().filter(|e| !e.is_expired(now_ms)).collect();
        live.sort_by_key(|e| e.created_at);

        let restored = live.len();
        let mut evicted = Vec::new();
        {
            let mut storage = self.storage.write();
            storage.hits = snapshot.stats.hits;
            storage.misses = snapshot.stats.misses;
            storage.evictions = snapshot.stats.evictions;
            for entry in live {
                evicted.extend(storage.insert(entry, self.config.max_size_bytes, self.config.strategy));
            }
        }

        self.emit_evictions(evicted, EvictionReason::Capacity);
        info!(restored, "cache restored from snapshot");
    }
}

/// Byte-bounded TTL cache keyed by request fingerprint
///
/// Entry size is the length of the value's JSON encoding. When an insert
/// would exceed the byte budget, entries are evicted per the configured
/// [`EvictionStrategy`] until it fits or the cache is empty; the new entry
/// is always stored.
///
/// # Example
/// ```
/// use std::time::Duration;
///
/// use callguard::{CacheConfig, ResponseCache};
///
/// let cache: ResponseCache<String> = ResponseCache::new(CacheConfig::default()).unwrap();
/// cache.set("greeting", "hello".to_string(), Some(Duration::from_secs(30)), None).unwrap();
/// assert_eq!(cache.get("greeting"), Some("hello".to_string()));
/// ```
pub struct ResponseCache<V, C: Clock = SystemClock> {
    inner: Arc<CacheInner<V, C>>,
    persist_task: Mutex<Option<PeriodicTask>>,
}

impl<V, C: Clock> fmt::Debug for ResponseCache<V, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let storage = self.inner.storage.read();
        f.debug_struct("ResponseCache")
            .field("config", &self.inner.config)
            .field("entries", &storage.entries.len())
            .field("total_size", &storage.total_size)
            .field("persistent", &self.inner.store.is_some())
            .finish()
    }
}

impl<V: CacheValue> ResponseCache<V, SystemClock> {
    /// Memory-only cache on the system clock
    pub fn new(config: CacheConfig) -> CallguardResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Cache backed by `store`: restores the stored snapshot, then saves a
    /// new one every `persist_interval` and on shutdown
    pub async fn open(
        config: CacheConfig,
        store: SharedSnapshotStore<V>,
        observer: SharedObserver,
    ) -> CallguardResult<Self> {
        Self::open_with_clock(config, store, observer, SystemClock).await
    }

    /// Build from configuration alone: a [`JsonFileStore`] at `disk_path`
    /// when `persist_to_disk` is set, memory-only otherwise
    pub async fn from_config(config: CacheConfig, observer: SharedObserver) -> CallguardResult<Self> {
        if config.persist_to_disk {
            let store: SharedSnapshotStore<V> = Arc::new(JsonFileStore::new(&config.disk_path));
            Self::open(config, store, observer).await
        } else {
            Ok(Self::new(config)?.with_observer(observer))
        }
    }
}

impl<V: CacheValue, C: Clock> ResponseCache<V, C> {
    /// Memory-only cache with a custom clock (useful for testing)
    pub fn with_clock(config: CacheConfig, clock: C) -> CallguardResult<Self> {
        Ok(Self { inner: Arc::new(Self::build_inner(config, clock, None)?), persist_task: Mutex::new(None) })
    }

    /// Persistent cache with a custom clock
    pub async fn open_with_clock(
        config: CacheConfig,
        store: SharedSnapshotStore<V>,
        observer: SharedObserver,
        clock: C,
    ) -> CallguardResult<Self> {
        let inner = Self::build_inner(config, clock, Some(store))?;
        *inner.observer.write() = observer;
        inner.restore().await;

        let inner = Arc::new(inner);
        let task = Self::spawn_persist(Arc::downgrade(&inner), inner.config.persist_interval);
        Ok(Self { inner, persist_task: Mutex::new(Some(task)) })
    }

    fn build_inner(
        config: CacheConfig,
        clock: C,
        store: Option<SharedSnapshotStore<V>>,
    ) -> CallguardResult<CacheInner<V, C>> {
        config.validate()?;
        Ok(CacheInner {
            config,
            storage: RwLock::new(Storage::new()),
            clock,
            observer: RwLock::new(observer::noop()),
            store,
        })
    }

    fn spawn_persist(inner: Weak<CacheInner<V, C>>, period: Duration) -> PeriodicTask {
        PeriodicTask::spawn("cache-snapshot", period, move || {
            let inner = inner.upgrade();
            async move {
                match inner {
                    Some(inner) => {
                        inner.persist_logged().await;
                        TickFlow::Continue
                    }
                    None => TickFlow::Stop,
                }
            }
        })
    }

    /// Report hits, misses and evictions to `observer`
    pub fn with_observer(self, observer: SharedObserver) -> Self {
        *self.inner.observer.write() = observer;
        self
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Look up a live entry.
    ///
    /// An expired entry is removed and reported as a miss. A hit bumps the
    /// entry's access count and recency.
    pub fn get(&self, key: &str) -> Option<V> {
        let now_ms = self.inner.clock.millis_since_epoch();
        let mut expired = None;

        let value = {
            let mut storage = self.inner.storage.write();
            let seq = storage.next_seq();

            let lookup = match storage.entries.get_mut(key) {
                Some(entry) if entry.is_expired(now_ms) => Err(true),
                Some(entry) => {
                    entry.touch(now_ms, seq);
                    Ok(entry.value.clone())
                }
                None => Err(false),
            };

            match lookup {
                Ok(value) => {
                    storage.hits += 1;
                    Some(value)
                }
                Err(was_expired) => {
                    if was_expired {
                        expired = storage.remove(key).map(|e| (e.key, e.size_bytes));
                    }
                    storage.misses += 1;
                    None
                }
            }
        };

        if value.is_some() {
            self.inner.emit(ResilienceEvent::CacheHit { key: key.to_string() });
        } else {
            self.inner.emit_evictions(expired.into_iter().collect(), EvictionReason::Expired);
            self.inner.emit(ResilienceEvent::CacheMiss { key: key.to_string() });
        }
        value
    }

    /// Store `value` under `key`, replacing any existing entry.
    ///
    /// `ttl` defaults to the configured TTL. Fails only if the value cannot
    /// be serialized for sizing.
    pub fn set(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
        metadata: Option<Value>,
    ) -> CallguardResult<()> {
        let key = key.into();
        let size_bytes = serde_json::to_vec(&value)?.len();
        let now_ms = self.inner.clock.millis_since_epoch();
        let ttl = ttl.unwrap_or(self.inner.config.default_ttl);
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);

        let entry = CacheEntry {
            key,
            value,
            created_at: now_ms,
            expires_at: now_ms.saturating_add(ttl_ms),
            size_bytes,
            access_count: 0,
            last_access_at: now_ms,
            metadata,
            insert_seq: 0,
            access_seq: 0,
        };

        if size_bytes > self.inner.config.max_size_bytes {
            warn!(key = %entry.key, size_bytes, "cache entry is larger than the whole budget");
        }

        let evicted = self.inner.storage.write().insert(
            entry,
            self.inner.config.max_size_bytes,
            self.inner.config.strategy,
        );
        self.inner.emit_evictions(evicted, EvictionReason::Capacity);
        Ok(())
    }

    /// Return the cached value or compute, store and return a new one
    pub fn get_or_insert_with<F>(&self, key: &str, f: F) -> CallguardResult<V>
    where
        F: FnOnce() -> V,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = f();
        self.set(key, value.clone(), None, None)?;
        Ok(value)
    }

    /// Remove an entry, returning whether it existed
    pub fn delete(&self, key: &str) -> bool {
        self.inner.storage.write().remove(key).is_some()
    }

    /// True when a live entry exists. Touches neither recency nor stats.
    pub fn has(&self, key: &str) -> bool {
        let now_ms = self.inner.clock.millis_since_epoch();
        self.inner.storage.read().entries.get(key).is_some_and(|e| !e.is_expired(now_ms))
    }

    /// Remove every entry. Hit, miss and eviction counters are kept.
    pub fn clear(&self) {
        let mut storage = self.inner.storage.write();
        storage.entries.clear();
        storage.total_size = 0;
        drop(storage);
        debug!("cache cleared");
    }

    /// Remove all expired entries, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now_ms = self.inner.clock.millis_since_epoch();
        let removed: Vec<(String, usize)> = {
            let mut storage = self.inner.storage.write();
            let keys: Vec<String> = storage
                .entries
                .values()
                .filter(|e| e.is_expired(now_ms))
                .map(|e| e.key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| storage.remove(&key).map(|e| (e.key, e.size_bytes)))
                .collect()
        };

        let count = removed.len();
        self.inner.emit_evictions(removed, EvictionReason::Expired);
        count
    }

    /// Current statistics
    pub fn get_stats(&self) -> CacheStats {
        self.inner.storage.read().stats()
    }

    /// Copies of all stored entries in insertion order
    pub fn get_entries(&self) -> Vec<CacheEntry<V>> {
        self.snapshot().entries
    }

    pub fn len(&self) -> usize {
        self.inner.storage.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of contents and stats
    pub fn snapshot(&self) -> CacheSnapshot<V> {
        self.inner.snapshot()
    }

    /// Write a snapshot now. A memory-only cache does nothing.
    pub async fn persist(&self) -> CallguardResult<()> {
        self.inner.persist().await
    }

    /// Stop the snapshot writer and save a final snapshot.
    ///
    /// Persistence failures are logged, never returned.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let task = self.persist_task.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }

        self.inner.persist_logged().await;
        info!("cache shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::cache::MemorySnapshotStore;
    use crate::clock::MockClock;
    use crate::testing::RecordingObserver;

    /// Every `String` of length 8 serializes to 10 bytes
    fn value(c: char) -> String {
        std::iter::repeat(c).take(8).collect()
    }

    fn cache(strategy: EvictionStrategy, max_bytes: usize) -> (ResponseCache<String, MockClock>, MockClock) {
        let clock = MockClock::new();
        let config = CacheConfig::builder()
            .max_size_bytes(max_bytes)
            .strategy(strategy)
            .ttl(Duration::from_secs(60))
            .build()
            .unwrap();
        (ResponseCache::with_clock(config, clock.clone()).unwrap(), clock)
    }

    #[test]
    fn test_replacing_key_does_not_double_count() {
        let (cache, _) = cache(EvictionStrategy::Lru, 1_000);
        cache.set("a", value('x'), None, None).unwrap();
        cache.set("a", value('y'), None, None).unwrap();

        let stats = cache.get_stats();
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_size_bytes, 10);
        assert_eq!(cache.get("a"), Some(value('y')));
    }

    #[test]
    fn test_lfu_evicts_least_used() {
        let (cache, _) = cache(EvictionStrategy::Lfu, 20);
        cache.set("a", value('a'), None, None).unwrap();
        cache.set("b", value('b'), None, None).unwrap();
        cache.get("a");
        cache.get("a");
        cache.get("b");

        cache.set("c", value('c'), None, None).unwrap();
        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert_eq!(cache.get_stats().evictions, 1);
    }

    #[test]
    fn test_fifo_ignores_access() {
        let (cache, _) = cache(EvictionStrategy::Fifo, 20);
        cache.set("a", value('a'), None, None).unwrap();
        cache.set("b", value('b'), None, None).unwrap();
        cache.get("a");

        cache.set("c", value('c'), None, None).unwrap();
        assert!(!cache.has("a"));
        assert!(cache.has("b"));
    }

    #[test]
    fn test_oversized_entry_empties_cache_and_is_stored() {
        let (cache, _) = cache(EvictionStrategy::Lru, 20);
        cache.set("a", value('a'), None, None).unwrap();
        cache.set("big", "x".repeat(100), None, None).unwrap();

        assert_eq!(cache.len(), 1);
        assert!(cache.has("big"));
        assert_eq!(cache.get_stats().total_size_bytes, 102);
    }

    #[test]
    fn test_has_does_not_touch_stats() {
        let (cache, clock) = cache(EvictionStrategy::Lru, 1_000);
        cache.set("a", value('a'), Some(Duration::from_millis(10)), None).unwrap();
        assert!(cache.has("a"));
        assert!(!cache.has("missing"));

        clock.advance_millis(11);
        assert!(!cache.has("a"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get_stats().total_lookups(), 0);
    }

    #[test]
    fn test_expiry_boundary_is_strict() {
        let (cache, clock) = cache(EvictionStrategy::Lru, 1_000);
        cache.set("a", value('a'), Some(Duration::from_millis(100)), None).unwrap();

        clock.advance_millis(100);
        assert_eq!(cache.get("a"), Some(value('a')));

        clock.advance_millis(1);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_cleanup_expired_and_events() {
        let (cache, clock) = cache(EvictionStrategy::Lru, 1_000);
        let recorder = Arc::new(RecordingObserver::new());
        let cache = cache.with_observer(recorder.clone());

        cache.set("short", value('s'), Some(Duration::from_millis(5)), None).unwrap();
        cache.set("long", value('l'), None, Some(json!({"source": "test"}))).unwrap();
        clock.advance_millis(10);

        assert_eq!(cache.cleanup_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(recorder.count("cache-eviction"), 1);

        assert_eq!(cache.get("long"), Some(value('l')));
        assert_eq!(cache.get("short"), None);
        assert_eq!(recorder.count("cache-hit"), 1);
        assert_eq!(recorder.count("cache-miss"), 1);
        assert_eq!(cache.get_entries()[0].metadata, Some(json!({"source": "test"})));
    }

    #[test]
    fn test_get_or_insert_with_computes_once() {
        let (cache, _) = cache(EvictionStrategy::Lru, 1_000);
        let mut calls = 0;
        let first = cache
            .get_or_insert_with("k", || {
                calls += 1;
                value('k')
            })
            .unwrap();
        let second = cache.get_or_insert_with("k", || unreachable!()).unwrap();

        assert_eq!(first, second);
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_delete_and_clear() {
        let (cache, _) = cache(EvictionStrategy::Lru, 1_000);
        cache.set("a", value('a'), None, None).unwrap();
        cache.get("a");

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.get_stats().total_size_bytes, 0);

        cache.set("b", value('b'), None, None).unwrap();
        cache.get("missing");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(
            cache.get_stats(),
            CacheStats { hits: 1, misses: 1, evictions: 0, total_size_bytes: 0, entry_count: 0 }
        );

        // Counters keep growing after a clear
        cache.set("c", value('c'), None, None).unwrap();
        cache.get("c");
        assert_eq!(cache.get_stats().hits, 2);
    }

    #[test]
    fn test_huge_ttl_saturates_instead_of_wrapping() {
        let (cache, clock) = cache(EvictionStrategy::Lru, 1_000);
        cache.set("forever", value('f'), Some(Duration::from_secs(1 << 62)), None).unwrap();

        clock.advance(Duration::from_secs(365 * 24 * 3600));
        assert!(cache.has("forever"));
        assert_eq!(cache.get_entries()[0].expires_at, u64::MAX);
    }

    #[tokio::test]
    async fn test_restore_skips_unknown_version() {
        let store = Arc::new(
            MemorySnapshotStore::with_json(&json!({
                "version": 99,
                "timestamp": 0,
                "entries": [],
                "stats": {}
            }))
            .unwrap(),
        );

        let cache: ResponseCache<String, MockClock> = ResponseCache::open_with_clock(
            CacheConfig::default(),
            store,
            observer::noop(),
            MockClock::new(),
        )
        .await
        .unwrap();

        assert!(cache.is_empty());
        cache.shutdown().await;
    }
}
