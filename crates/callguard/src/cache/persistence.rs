//! Durable cache snapshots
//!
//! The cache talks to storage only through [`SnapshotStore`]. A snapshot is
//! a versioned JSON document:
//!
//! ```json
//! {
//!   "version": 1,
//!   "timestamp": 1700000000000,
//!   "entries": [{ "key": "...", "value": ..., "createdAt": ..., "expiresAt": ...,
//!                 "sizeBytes": ..., "accessCount": ..., "lastAccessAt": ...,
//!                 "metadata": null }],
//!   "stats": { "hits": 0, "misses": 0, "evictions": 0,
//!              "totalSizeBytes": 0, "entryCount": 0 }
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

use super::entry::CacheEntry;
use super::stats::CacheStats;
use crate::error::{CallguardError, CallguardResult};

/// Snapshot format version written by this crate
pub const SNAPSHOT_VERSION: u32 = 1;

/// Point-in-time copy of the cache contents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot<V> {
    pub version: u32,
    /// Unix milliseconds when the snapshot was taken
    pub timestamp: u64,
    pub entries: Vec<CacheEntry<V>>,
    pub stats: CacheStats,
}

impl<V: Serialize> CacheSnapshot<V> {
    /// Encode as JSON bytes
    pub fn to_json(&self) -> CallguardResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

impl<V: DeserializeOwned> CacheSnapshot<V> {
    /// Decode JSON bytes, rejecting any version other than
    /// [`SNAPSHOT_VERSION`]
    pub fn from_json(bytes: &[u8]) -> CallguardResult<Self> {
        let document: Value = serde_json::from_slice(bytes)?;

        match document.get("version") {
            Some(version) if version.as_u64() == Some(u64::from(SNAPSHOT_VERSION)) => {}
            other => {
                return Err(CallguardError::UnsupportedSnapshotVersion {
                    found: other.map_or_else(|| "missing".to_string(), Value::to_string),
                    expected: SNAPSHOT_VERSION,
                });
            }
        }

        Ok(serde_json::from_value(document)?)
    }
}

/// Narrow storage interface backing cache persistence
#[async_trait]
pub trait SnapshotStore<V>: Send + Sync + fmt::Debug {
    /// Replace the stored snapshot
    async fn save(&self, snapshot: &CacheSnapshot<V>) -> CallguardResult<()>;

    /// Load the stored snapshot, `None` when nothing has been saved yet
    async fn load(&self) -> CallguardResult<Option<CacheSnapshot<V>>>;
}

/// JSON file store with atomic replace
///
/// Writes go to a sibling `.tmp` file which is then renamed over the
/// target.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl<V> SnapshotStore<V> for JsonFileStore
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    #[instrument(skip(self, snapshot), fields(path = %self.path.display(), entries = snapshot.entries.len()))]
    async fn save(&self, snapshot: &CacheSnapshot<V>) -> CallguardResult<()> {
        let data = snapshot.to_json()?;
        let temp_path = self.path.with_extension("tmp");

        if let Some(parent) = temp_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut file =
            fs::OpenOptions::new().write(true).create(true).truncate(true).open(&temp_path).await?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;

        debug!(bytes = data.len(), "cache snapshot written");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load(&self) -> CallguardResult<Option<CacheSnapshot<V>>> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no cache snapshot on disk");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let snapshot = CacheSnapshot::from_json(&data)?;
        info!(entries = snapshot.entries.len(), "cache snapshot read");
        Ok(Some(snapshot))
    }
}

/// In-memory store holding the encoded snapshot
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    data: Mutex<Option<Vec<u8>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a raw JSON document
    pub fn with_json(document: &Value) -> CallguardResult<Self> {
        Ok(Self { data: Mutex::new(Some(serde_json::to_vec(document)?)) })
    }

    /// Raw stored bytes, if any
    pub fn raw(&self) -> Option<Vec<u8>> {
        self.data.lock().clone()
    }
}

#[async_trait]
impl<V> SnapshotStore<V> for MemorySnapshotStore
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    async fn save(&self, snapshot: &CacheSnapshot<V>) -> CallguardResult<()> {
        let data = snapshot.to_json()?;
        *self.data.lock() = Some(data);
        Ok(())
    }

    async fn load(&self) -> CallguardResult<Option<CacheSnapshot<V>>> {
        let data = self.data.lock().clone();
        data.map(|bytes| CacheSnapshot::from_json(&bytes)).transpose()
    }
}
