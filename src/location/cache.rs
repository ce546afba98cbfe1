//! Location cache: a short-lived in-memory entry backed by a durable record.
//!
//! The durable copy lives at ~/.cari_lokasi/cache.json under a single fixed
//! key. Unreadable or corrupt files load as absent.

use super::types::CachedLocation;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Key the durable record is stored under.
pub const CACHE_KEY: &str = "user_location";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Key-value persistence of a single [`CachedLocation`].
pub trait CacheStore: Send + Sync {
    fn load(&self) -> Option<CachedLocation>;
    fn save(&self, entry: &CachedLocation) -> Result<(), StoreError>;
}

/// JSON file store.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store at the default location (~/.cari_lokasi/cache.json).
    pub fn new() -> Self {
        Self { path: Self::default_path() }
    }

    /// Store at a specific path.
    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cari_lokasi")
            .join("cache.json")
    }

    fn read_map(&self) -> Option<Map<String, Value>> {
        let data = fs::read_to_string(&self.path).ok()?;
        serde_json::from_str(&data).ok()
    }
}

impl Default for FileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for FileStore {
    fn load(&self) -> Option<CachedLocation> {
        let mut map = self.read_map()?;
        let value = map.remove(CACHE_KEY)?;
        serde_json::from_value(value).ok()
    }

    fn save(&self, entry: &CachedLocation) -> Result<(), StoreError> {
        // Keep unrelated keys someone else may have written.
        let mut map = self.read_map().unwrap_or_default();
        map.insert(CACHE_KEY.to_string(), serde_json::to_value(entry)?);

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&map)?)?;
        Ok(())
    }
}

/// In-process store, for tests and `--no-persist`.
#[derive(Default)]
pub struct MemoryStore {
    entry: Mutex<Option<CachedLocation>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(entry: CachedLocation) -> Self {
        Self { entry: Mutex::new(Some(entry)) }
    }
}

impl CacheStore for MemoryStore {
    fn load(&self) -> Option<CachedLocation> {
        *self.entry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn save(&self, entry: &CachedLocation) -> Result<(), StoreError> {
        *self.entry.lock().unwrap_or_else(|e| e.into_inner()) = Some(*entry);
        Ok(())
    }
}

/// The resolver's cache: one in-memory entry plus its durable copy.
pub struct LocationCache {
    memory: Mutex<Option<CachedLocation>>,
    store: Arc<dyn CacheStore>,
}

impl LocationCache {
    pub fn new(store: Box<dyn CacheStore>) -> Self {
        Self {
            memory: Mutex::new(None),
            store: Arc::from(store),
        }
    }

    /// Consistent copy of the in-memory entry.
    pub fn snapshot(&self) -> Option<CachedLocation> {
        *self.memory.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The in-memory entry if it is younger than `window_ms`.
    pub fn fresh(&self, now_ms: i64, window_ms: i64) -> Option<CachedLocation> {
        self.snapshot().filter(|e| e.is_fresh(now_ms, window_ms))
    }

    /// Adopt a durable record into memory, unless something newer got there first.
    pub fn adopt(&self, entry: CachedLocation) -> CachedLocation {
        let mut memory = self.memory.lock().unwrap_or_else(|e| e.into_inner());
        match *memory {
            Some(current) if current.acquired_at_ms >= entry.acquired_at_ms => current,
            _ => {
                *memory = Some(entry);
                entry
            }
        }
    }

    /// Overwrite the in-memory entry, then persist it on the blocking pool.
    /// Persistence failures are logged, never surfaced.
    ///
    /// The memory write happens before the first await, so dropping the
    /// returned future never leaves the entry half-stored.
    pub async fn store(&self, entry: CachedLocation) {
        *self.memory.lock().unwrap_or_else(|e| e.into_inner()) = Some(entry);

        let store = Arc::clone(&self.store);
        match tokio::task::spawn_blocking(move || store.save(&entry)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to persist location cache"),
            Err(e) => tracing::warn!(error = %e, "location cache writer did not finish"),
        }
    }

    /// Read the durable record on the blocking pool.
    pub async fn load_durable(&self) -> Option<CachedLocation> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.load()).await.ok().flatten()
    }
}
