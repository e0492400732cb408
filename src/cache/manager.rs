//! Two-tier cache manager for serialized values
//!
//! Provides a `CacheManager` that keeps JSON-serialized values in a
//! cost-bounded memory tier and mirrors them to disk as a blob file plus a
//! `.meta` sidecar holding the expiration date. Reads consult memory first,
//! fall back to disk, and promote disk hits back into memory.
//!
//! Failures never reach the caller: a value that cannot be written to disk
//! stays memory-only, and anything unreadable is reported as a miss.

use chrono::{DateTime, Duration, Utc};
use directories::ProjectDirs;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::keys::{sanitize_key, METADATA_EXTENSION};
use super::lock::mutex_lock;
use super::memory::{MemoryEntry, MemoryTier};
use crate::clock::{saturating_add, system_clock, Clock, SharedClock};

/// Default time-to-live for entries, in seconds
pub const DEFAULT_TTL_SECS: i64 = 3600;

/// Default byte budget for the memory tier (50 MB)
pub const DEFAULT_MEMORY_BUDGET: usize = 50 * 1024 * 1024;

/// Name of the cache directory inside the platform cache root
pub const CACHE_DIR_NAME: &str = "MarvelCache";

const METADATA_VERSION: u32 = 1;

fn default_metadata_version() -> u32 {
    METADATA_VERSION
}

/// Sidecar record stored next to each blob on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the blob stops being valid
    pub expiration_date: DateTime<Utc>,
    /// Sidecar format version
    #[serde(default = "default_metadata_version")]
    pub version: u32,
}

impl CacheMetadata {
    pub fn new(expiration_date: DateTime<Utc>) -> Self {
        Self {
            expiration_date,
            version: METADATA_VERSION,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date <= now
    }
}

/// Tunables for a cache instance
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// TTL applied by `save` and on disk-hit promotion
    pub default_ttl: Duration,
    /// Aggregate payload bytes the memory tier may hold
    pub memory_budget: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::seconds(DEFAULT_TTL_SECS),
            memory_budget: DEFAULT_MEMORY_BUDGET,
        }
    }
}

/// Manages a memory tier and a disk tier of cached values
///
/// Clones share the same tiers. Mutations (`save`, `remove`, `clear_all`,
/// `set_expiration_date`, `sweep_expired`) hold the write side of a shared
/// barrier, reads hold the read side, so reads run alongside each other but
/// never alongside a mutation. A read that finds an expired or orphaned disk
/// entry releases the read side and purges it under the write side. Mutations
/// run on a spawned task and complete even if the caller stops waiting.
#[derive(Debug, Clone)]
pub struct CacheManager {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// Directory where blobs and sidecars are stored
    cache_dir: PathBuf,
    memory: Mutex<MemoryTier>,
    barrier: RwLock<()>,
    clock: SharedClock,
    default_ttl: Duration,
}

impl CacheManager {
    /// Creates a CacheManager using the XDG-compliant cache directory
    ///
    /// Uses `~/.cache/marvelcache/MarvelCache/` on Linux, or the equivalent
    /// path on other platforms. Returns `None` if no home directory can be found.
    pub fn new() -> Option<Self> {
        let project_dirs = ProjectDirs::from("", "", "marvelcache")?;
        let cache_dir = project_dirs.cache_dir().join(CACHE_DIR_NAME);
        Some(Self::with_dir(cache_dir))
    }

    /// Creates a CacheManager with a custom cache directory and default settings
    pub fn with_dir(cache_dir: PathBuf) -> Self {
        Self::with_settings(cache_dir, CacheSettings::default(), system_clock())
    }

    /// Creates a CacheManager with explicit settings and time source
    pub fn with_settings(cache_dir: PathBuf, settings: CacheSettings, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Inner {
                cache_dir,
                memory: Mutex::new(MemoryTier::new(settings.memory_budget)),
                barrier: RwLock::new(()),
                clock,
                default_ttl: settings.default_ttl,
            }),
        }
    }

    /// Directory holding the disk tier
    pub fn cache_dir(&self) -> &Path {
        &self.inner.cache_dir
    }

    /// Stores `value` under `key` with the default TTL
    pub async fn save<T: Serialize>(&self, key: &str, value: &T) {
        self.save_with_ttl(key, value, self.inner.default_ttl).await;
    }

    /// Stores `value` under `key`, expiring `ttl` from now
    ///
    /// Overwrites any previous entry for the key. The memory tier is updated
    /// first; a failed disk write is logged and leaves the entry memory-only.
    /// A value that cannot be serialized removes the previous entry instead.
    pub async fn save_with_ttl<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let sanitized = sanitize_key(key);
        let encoded = serde_json::to_vec(value);
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let _barrier = inner.barrier.write().await;
            let payload = match encoded {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(key = %sanitized, error = %e, "Failed to serialize cache value");
                    inner.memory("save.encode_failed").remove(&sanitized);
                    inner.remove_files(&sanitized).await;
                    return;
                }
            };

            let expires_at = saturating_add(inner.clock.now(), ttl);
            inner
                .memory("save")
                .insert(sanitized.clone(), MemoryEntry::new(payload.clone(), expires_at));

            if let Err(e) = inner.write_disk(&sanitized, &payload, expires_at).await {
                warn!(key = %sanitized, error = %e, "Disk cache write failed, entry kept in memory only");
            }
        });

        if let Err(e) = task.await {
            warn!(error = %e, "Cache save task failed");
        }
    }

    /// Reads the value stored under `key`
    ///
    /// Returns `None` when the key is absent, expired, or cannot be decoded as
    /// `T`. Expired disk entries are deleted. A disk hit is copied back into
    /// the memory tier so the next read is served from memory.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let sanitized = sanitize_key(key);
        let lookup = {
            let _barrier = self.inner.barrier.read().await;
            let now = self.inner.clock.now();

            let cached = self.inner.memory("load").get(&sanitized, now);
            if let Some(payload) = cached {
                match serde_json::from_slice(&payload) {
                    Ok(value) => return Some(value),
                    Err(e) => debug!(key = %sanitized, error = %e, "Memory entry did not decode, trying disk"),
                }
            }

            self.inner.load_from_disk(&sanitized, now).await
        };

        match lookup {
            DiskLookup::Hit(value) => Some(value),
            DiskLookup::Miss => None,
            DiskLookup::Dead => {
                self.purge(sanitized).await;
                None
            }
        }
    }

    /// Deletes a dead disk entry under the write side of the barrier
    async fn purge(&self, sanitized: String) {
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let _barrier = inner.barrier.write().await;
            inner.purge_if_dead(&sanitized).await;
        });

        if let Err(e) = task.await {
            warn!(error = %e, "Cache purge task failed");
        }
    }

    /// Removes `key` from both tiers; a no-op when absent
    pub async fn remove(&self, key: &str) {
        let sanitized = sanitize_key(key);
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let _barrier = inner.barrier.write().await;
            inner.memory("remove").remove(&sanitized);
            inner.remove_files(&sanitized).await;
        });

        if let Err(e) = task.await {
            warn!(error = %e, "Cache remove task failed");
        }
    }

    /// Empties the memory tier and recreates the cache directory
    pub async fn clear_all(&self) {
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let _barrier = inner.barrier.write().await;
            inner.memory("clear_all").clear();

            if let Err(e) = fs::remove_dir_all(&inner.cache_dir).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(dir = %inner.cache_dir.display(), error = %e, "Failed to delete cache directory");
                }
            }
            if let Err(e) = fs::create_dir_all(&inner.cache_dir).await {
                warn!(dir = %inner.cache_dir.display(), error = %e, "Failed to recreate cache directory");
            }
        });

        if let Err(e) = task.await {
            warn!(error = %e, "Cache clear task failed");
        }
    }

    /// Total size in bytes of the files in the cache directory
    pub async fn get_cache_size(&self) -> u64 {
        let _barrier = self.inner.barrier.read().await;
        match directory_size(&self.inner.cache_dir).await {
            Ok(size) => size,
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => {
                warn!(dir = %self.inner.cache_dir.display(), error = %e, "Failed to measure cache directory");
                0
            }
        }
    }

    /// Overwrites the sidecar expiration for `key`
    ///
    /// The blob and the memory tier are left alone, so a memory entry may
    /// outlive the new date until it expires or is evicted.
    pub async fn set_expiration_date(&self, key: &str, date: DateTime<Utc>) {
        let sanitized = sanitize_key(key);
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let _barrier = inner.barrier.write().await;
            if let Err(e) = inner.write_metadata(&sanitized, &CacheMetadata::new(date)).await {
                warn!(key = %sanitized, error = %e, "Failed to update cache expiration");
            }
        });

        if let Err(e) = task.await {
            warn!(error = %e, "Cache expiration task failed");
        }
    }

    /// Whether the sidecar for `key` reports expiry
    ///
    /// A missing or unreadable sidecar counts as expired.
    pub async fn is_expired(&self, key: &str) -> bool {
        let sanitized = sanitize_key(key);
        let _barrier = self.inner.barrier.read().await;
        match self.inner.read_metadata(&sanitized).await {
            Some(metadata) => metadata.is_expired(self.inner.clock.now()),
            None => true,
        }
    }

    /// Drops every entry in the memory tier, leaving disk untouched
    pub fn handle_memory_warning(&self) {
        let mut memory = self.inner.memory("memory_warning");
        debug!(entries = memory.len(), "Clearing memory tier");
        memory.clear();
    }

    /// Deletes every disk entry whose sidecar reports expiration in the past
    ///
    /// Returns the number of entries removed. Entries without a readable
    /// sidecar are left for `load` to deal with.
    pub async fn sweep_expired(&self) -> usize {
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move {
            let _barrier = inner.barrier.write().await;
            match inner.sweep().await {
                Ok(removed) => removed,
                Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
                Err(e) => {
                    warn!(dir = %inner.cache_dir.display(), error = %e, "Expired entry sweep failed");
                    0
                }
            }
        });

        match task.await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Cache sweep task failed");
                0
            }
        }
    }

    /// Number of entries currently in the memory tier
    pub fn memory_entry_count(&self) -> usize {
        self.inner.memory("memory_entry_count").len()
    }

    /// Aggregate payload bytes currently in the memory tier
    pub fn memory_cost(&self) -> usize {
        self.inner.memory("memory_cost").total_cost()
    }

    /// Whether the memory tier holds an entry for `key`, expired or not
    pub fn is_in_memory(&self, key: &str) -> bool {
        self.inner.memory("is_in_memory").contains(&sanitize_key(key))
    }
}

/// Outcome of a disk-tier read
enum DiskLookup<T> {
    Hit(T),
    /// Present but undecodable as the requested type
    Miss,
    /// Expired or half of a blob/sidecar pair; to be purged
    Dead,
}

impl Inner {
    fn memory(&self, op: &'static str) -> MutexGuard<'_, MemoryTier> {
        mutex_lock(&self.memory, op)
    }

    /// Returns the path to the blob file for a sanitized key
    fn blob_path(&self, sanitized: &str) -> PathBuf {
        self.cache_dir.join(sanitized)
    }

    /// Returns the path to the metadata sidecar for a sanitized key
    fn metadata_path(&self, sanitized: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.{}", sanitized, METADATA_EXTENSION))
    }

    async fn write_disk(&self, sanitized: &str, payload: &[u8], expires_at: DateTime<Utc>) -> io::Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;
        fs::write(self.blob_path(sanitized), payload).await?;

        if let Err(e) = self.write_metadata(sanitized, &CacheMetadata::new(expires_at)).await {
            // A blob without its sidecar would only be purged on the next load
            let _ = fs::remove_file(self.blob_path(sanitized)).await;
            return Err(e);
        }
        Ok(())
    }

    async fn write_metadata(&self, sanitized: &str, metadata: &CacheMetadata) -> io::Result<()> {
        let json = serde_json::to_vec(metadata).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::create_dir_all(&self.cache_dir).await?;
        fs::write(self.metadata_path(sanitized), json).await
    }

    async fn read_metadata(&self, sanitized: &str) -> Option<CacheMetadata> {
        let bytes = fs::read(self.metadata_path(sanitized)).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(key = %sanitized, error = %e, "Unreadable cache sidecar");
                None
            }
        }
    }

    async fn load_from_disk<T: DeserializeOwned>(&self, sanitized: &str, now: DateTime<Utc>) -> DiskLookup<T> {
        let Ok(payload) = fs::read(self.blob_path(sanitized)).await else {
            // An orphaned sidecar, if any, still has to go
            return DiskLookup::Dead;
        };

        let Some(metadata) = self.read_metadata(sanitized).await else {
            debug!(key = %sanitized, "Cache blob without sidecar");
            return DiskLookup::Dead;
        };

        if metadata.is_expired(now) {
            debug!(key = %sanitized, "Disk cache entry expired");
            return DiskLookup::Dead;
        }

        let value = match serde_json::from_slice(&payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %sanitized, error = %e, "Failed to decode cached value");
                return DiskLookup::Miss;
            }
        };

        let expires_at = saturating_add(now, self.default_ttl).min(metadata.expiration_date);
        self.memory("load.promote")
            .insert(sanitized.to_string(), MemoryEntry::new(payload, expires_at));
        DiskLookup::Hit(value)
    }

    /// Removes the entry if it is still expired or missing half of its pair
    ///
    /// Re-checked under the write side, since a save may have replaced the
    /// entry after the read that found it dead.
    async fn purge_if_dead(&self, sanitized: &str) {
        let blob_exists = fs::try_exists(self.blob_path(sanitized)).await.unwrap_or(false);
        let dead = match self.read_metadata(sanitized).await {
            Some(metadata) => !blob_exists || metadata.is_expired(self.clock.now()),
            None => true,
        };
        if dead {
            debug!(key = %sanitized, "Purging dead disk cache entry");
            self.remove_files(sanitized).await;
        }
    }

    async fn remove_files(&self, sanitized: &str) {
        for path in [self.blob_path(sanitized), self.metadata_path(sanitized)] {
            if let Err(e) = fs::remove_file(&path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to delete cache file");
                }
            }
        }
    }

    async fn sweep(&self) -> io::Result<usize> {
        let now = self.clock.now();
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.cache_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == METADATA_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if let Some(metadata) = self.read_metadata(name).await {
                if metadata.is_expired(now) {
                    self.remove_files(name).await;
                    removed += 1;
                }
            }
        }

        debug!(removed, "Swept expired disk cache entries");
        Ok(removed)
    }
}

async fn directory_size(dir: &Path) -> io::Result<u64> {
    let mut size = 0;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if metadata.is_file() {
            size += metadata.len();
        }
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestData {
        name: String,
        value: i32,
    }

    fn sample(name: &str, value: i32) -> TestData {
        TestData {
            name: name.to_string(),
            value,
        }
    }

    fn create_test_cache() -> (CacheManager, ManualClock, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = ManualClock::starting_now();
        let cache = CacheManager::with_settings(
            temp_dir.path().join("cache"),
            CacheSettings::default(),
            clock.shared(),
        );
        (cache, clock, temp_dir)
    }

    #[tokio::test]
    async fn test_save_creates_blob_and_sidecar() {
        let (cache, _clock, _temp_dir) = create_test_cache();

        cache.save("test_key", &sample("test", 42)).await;

        let blob = cache.cache_dir().join("test_key");
        let sidecar = cache.cache_dir().join("test_key.meta");
        assert!(blob.exists(), "Blob file should exist");
        assert!(sidecar.exists(), "Sidecar file should exist");

        let content = std::fs::read_to_string(&blob).expect("Should read blob");
        assert!(content.contains("\"test\""));
        assert!(content.contains("42"));

        let meta = std::fs::read_to_string(&sidecar).expect("Should read sidecar");
        assert!(meta.contains("expiration_date"));
    }

    #[tokio::test]
    async fn test_load_returns_none_for_missing_key() {
        let (cache, _clock, _temp_dir) = create_test_cache();

        let result: Option<TestData> = cache.load("nonexistent_key").await;

        assert!(result.is_none(), "Should return None for missing key");
    }

    #[tokio::test]
    async fn test_load_returns_fresh_value() {
        let (cache, clock, _temp_dir) = create_test_cache();
        let data = sample("fresh", 100);

        cache.save("fresh_key", &data).await;
        clock.advance(Duration::minutes(59));

        assert_eq!(cache.load::<TestData>("fresh_key").await, Some(data));
    }

    #[tokio::test]
    async fn test_load_after_ttl_returns_none_and_purges_disk() {
        let (cache, clock, _temp_dir) = create_test_cache();

        cache
            .save_with_ttl("short_key", &sample("short", 1), Duration::seconds(10))
            .await;
        clock.advance(Duration::seconds(10));

        assert!(cache.load::<TestData>("short_key").await.is_none());
        assert!(!cache.cache_dir().join("short_key").exists());
        assert!(!cache.cache_dir().join("short_key.meta").exists());
    }

    #[tokio::test]
    async fn test_disk_hit_is_promoted_to_memory() {
        let (cache, _clock, _temp_dir) = create_test_cache();
        let data = sample("promoted", 7);

        cache.save("promo", &data).await;
        cache.handle_memory_warning();
        assert!(!cache.is_in_memory("promo"));

        assert_eq!(cache.load::<TestData>("promo").await, Some(data.clone()));
        assert!(cache.is_in_memory("promo"), "Disk hit should repopulate memory");

        // With the disk copy gone, the next read must come from memory
        std::fs::remove_file(cache.cache_dir().join("promo")).expect("remove blob");
        std::fs::remove_file(cache.cache_dir().join("promo.meta")).expect("remove sidecar");
        assert_eq!(cache.load::<TestData>("promo").await, Some(data));
    }

    #[tokio::test]
    async fn test_promotion_never_outlives_sidecar_expiration() {
        let (cache, clock, _temp_dir) = create_test_cache();

        cache
            .save_with_ttl("bounded", &sample("bounded", 3), Duration::seconds(100))
            .await;
        clock.advance(Duration::seconds(50));
        cache.handle_memory_warning();
        assert!(cache.load::<TestData>("bounded").await.is_some());

        clock.advance(Duration::seconds(50));
        assert!(cache.load::<TestData>("bounded").await.is_none());
    }

    #[tokio::test]
    async fn test_overwrite_existing_entry() {
        let (cache, _clock, _temp_dir) = create_test_cache();

        cache.save("overwrite_key", &sample("first", 1)).await;
        cache.save("overwrite_key", &sample("second", 2)).await;

        assert_eq!(
            cache.load::<TestData>("overwrite_key").await,
            Some(sample("second", 2)),
            "Cache should contain latest data"
        );
    }

    #[tokio::test]
    async fn test_remove_deletes_both_tiers_and_is_idempotent() {
        let (cache, _clock, _temp_dir) = create_test_cache();

        cache.save("gone", &sample("gone", 0)).await;
        cache.remove("gone").await;
        cache.remove("gone").await;

        assert!(!cache.is_in_memory("gone"));
        assert!(!cache.cache_dir().join("gone").exists());
        assert!(cache.load::<TestData>("gone").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_all_empties_everything_and_recreates_dir() {
        let (cache, _clock, _temp_dir) = create_test_cache();

        cache.save("a", &sample("a", 1)).await;
        cache.save("b", &sample("b", 2)).await;
        cache.clear_all().await;

        assert_eq!(cache.memory_entry_count(), 0);
        assert!(cache.cache_dir().exists(), "Cache directory should be recreated");
        assert_eq!(cache.get_cache_size().await, 0);
    }

    #[tokio::test]
    async fn test_get_cache_size_counts_blob_and_sidecar() {
        let (cache, _clock, _temp_dir) = create_test_cache();
        assert_eq!(cache.get_cache_size().await, 0);

        cache.save("sized", &sample("sized", 5)).await;

        let blob = std::fs::metadata(cache.cache_dir().join("sized")).expect("blob").len();
        let meta = std::fs::metadata(cache.cache_dir().join("sized.meta")).expect("meta").len();
        assert_eq!(cache.get_cache_size().await, blob + meta);
    }

    #[tokio::test]
    async fn test_set_expiration_date_only_touches_sidecar() {
        let (cache, clock, _temp_dir) = create_test_cache();

        cache.save("expiring", &sample("expiring", 9)).await;
        cache
            .set_expiration_date("expiring", clock.now() - Duration::seconds(1))
            .await;

        assert!(cache.is_expired("expiring").await);
        // Memory still answers until the entry is dropped from it
        assert!(cache.load::<TestData>("expiring").await.is_some());

        cache.handle_memory_warning();
        assert!(cache.load::<TestData>("expiring").await.is_none());
    }

    #[tokio::test]
    async fn test_is_expired_true_without_sidecar() {
        let (cache, _clock, _temp_dir) = create_test_cache();

        assert!(cache.is_expired("never_saved").await);

        cache.save("saved", &sample("saved", 1)).await;
        assert!(!cache.is_expired("saved").await);
    }

    #[tokio::test]
    async fn test_blob_without_sidecar_is_purged() {
        let (cache, _clock, _temp_dir) = create_test_cache();

        cache.save("orphan", &sample("orphan", 1)).await;
        cache.handle_memory_warning();
        std::fs::remove_file(cache.cache_dir().join("orphan.meta")).expect("remove sidecar");

        assert!(cache.load::<TestData>("orphan").await.is_none());
        assert!(!cache.cache_dir().join("orphan").exists());
    }

    #[tokio::test]
    async fn test_corrupted_blob_is_a_miss() {
        let (cache, _clock, _temp_dir) = create_test_cache();

        cache.save("corrupt", &sample("corrupt", 1)).await;
        cache.handle_memory_warning();
        std::fs::write(cache.cache_dir().join("corrupt"), b"{not json").expect("corrupt blob");

        assert!(cache.load::<TestData>("corrupt").await.is_none());
    }

    #[tokio::test]
    async fn test_sanitized_keys_collide() {
        let (cache, _clock, _temp_dir) = create_test_cache();

        cache.save("page:0", &sample("colon", 1)).await;

        assert_eq!(cache.load::<TestData>("page/0").await, Some(sample("colon", 1)));
        assert!(cache.cache_dir().join("page_0").exists());
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired_entries() {
        let (cache, clock, _temp_dir) = create_test_cache();

        cache
            .save_with_ttl("old", &sample("old", 1), Duration::seconds(10))
            .await;
        cache
            .save_with_ttl("new", &sample("new", 2), Duration::hours(2))
            .await;
        clock.advance(Duration::seconds(11));

        assert_eq!(cache.sweep_expired().await, 1);
        assert!(!cache.cache_dir().join("old").exists());
        assert!(cache.cache_dir().join("new").exists());
    }

    #[tokio::test]
    async fn test_memory_budget_evicts_but_disk_still_answers() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let settings = CacheSettings {
            default_ttl: Duration::hours(1),
            memory_budget: 64,
        };
        let cache = CacheManager::with_settings(temp_dir.path().to_path_buf(), settings, system_clock());

        cache.save("first", &"x".repeat(40)).await;
        cache.save("second", &"y".repeat(40)).await;

        assert!(!cache.is_in_memory("first"), "First entry should be evicted");
        assert!(cache.memory_cost() <= 64);
        assert_eq!(cache.load::<String>("first").await, Some("x".repeat(40)));
    }

    #[tokio::test]
    async fn test_save_creates_directory_if_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let nested_path = temp_dir.path().join("nested").join("cache").join("dir");
        let cache = CacheManager::with_dir(nested_path.clone());

        cache.save("nested_key", &sample("nested", 1)).await;

        assert!(nested_path.join("nested_key").exists(), "Cache file should exist");
    }

    #[tokio::test]
    async fn test_huge_ttl_saturates_instead_of_overflowing() {
        let (cache, clock, _temp_dir) = create_test_cache();

        cache
            .save_with_ttl("forever", &sample("forever", 1), Duration::seconds(100_000_000_000_000))
            .await;
        clock.advance(Duration::days(365));

        assert_eq!(cache.load::<TestData>("forever").await, Some(sample("forever", 1)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_loads_and_removes_stay_consistent() {
        let (cache, _clock, _temp_dir) = create_test_cache();
        let mut tasks = Vec::new();

        for i in 0..16 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move {
                let key = format!("key_{}", i);
                cache.save(&key, &sample(&key, i)).await;
                // Readers may see the entry or not, but never a torn value
                if let Some(loaded) = cache.load::<TestData>(&key).await {
                    assert_eq!(loaded, sample(&key, i));
                }
                if i % 2 == 1 {
                    cache.remove(&key).await;
                }
            }));
        }
        for task in tasks {
            task.await.expect("task panicked");
        }

        for i in 0..16 {
            let key = format!("key_{}", i);
            let expected = (i % 2 == 0).then(|| sample(&key, i));
            assert_eq!(cache.load::<TestData>(&key).await, expected);
            assert_eq!(cache.cache_dir().join(&key).exists(), i % 2 == 0);
        }
        assert_eq!(cache.memory_entry_count(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_loads_of_expired_entry_all_miss() {
        let (cache, clock, _temp_dir) = create_test_cache();
        cache
            .save_with_ttl("stale", &sample("stale", 1), Duration::seconds(10))
            .await;
        cache.handle_memory_warning();
        clock.advance(Duration::seconds(11));

        let loads: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.load::<TestData>("stale").await })
            })
            .collect();
        for load in loads {
            assert!(load.await.expect("task panicked").is_none());
        }

        assert!(!cache.cache_dir().join("stale").exists());
        assert!(!cache.cache_dir().join("stale.meta").exists());
    }

    #[tokio::test]
    async fn test_purge_spares_an_entry_saved_after_it_was_found_dead() {
        let (cache, clock, _temp_dir) = create_test_cache();
        cache.save("revived", &sample("old", 1)).await;
        cache
            .set_expiration_date("revived", clock.now() - Duration::seconds(1))
            .await;

        // A save lands between the read that saw it expired and the purge
        cache.save("revived", &sample("new", 2)).await;
        cache.purge("revived".to_string()).await;

        assert!(cache.cache_dir().join("revived").exists());
        cache.handle_memory_warning();
        assert_eq!(cache.load::<TestData>("revived").await, Some(sample("new", 2)));
    }

    #[tokio::test]
    async fn test_save_completes_when_caller_stops_waiting() {
        let (cache, _clock, _temp_dir) = create_test_cache();

        let abandoned = tokio::time::timeout(
            std::time::Duration::ZERO,
            cache.save("abandoned", &sample("abandoned", 9)),
        )
        .await;
        assert!(abandoned.is_err(), "save should still be pending when abandoned");

        let sidecar = cache.cache_dir().join("abandoned.meta");
        for _ in 0..200 {
            if sidecar.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        cache.handle_memory_warning();
        assert_eq!(cache.load::<TestData>("abandoned").await, Some(sample("abandoned", 9)));
    }

    #[test]
    fn test_new_creates_xdg_compliant_path() {
        if let Some(cache) = CacheManager::new() {
            let path_str = cache.cache_dir().to_string_lossy();
            assert!(path_str.contains("marvelcache"), "Cache path should contain project name");
            assert!(path_str.ends_with(CACHE_DIR_NAME));
        }
        // Test passes if new() returns None (e.g., no home directory in CI)
    }
}
