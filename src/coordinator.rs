//! Cache coordinator
//!
//! The one surface use-case code calls to read through, write through and
//! invalidate cached data. Each [`CachedResource`] knows which tier it lives
//! in: raw payloads go to the key-value cache, domain rows that need
//! ordering and freshness checks go to the local store.

use async_trait::async_trait;
use chrono::Duration;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use tracing::{debug, warn};

use crate::cache::CacheManager;
use crate::data::{Character, Comic};
use crate::error::StoreError;
use crate::store::PersistenceManager;

/// Which tier a resource is kept in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    /// Key-value blobs with TTL
    Blob,
    /// Structured rows with freshness
    Records,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Blob => write!(f, "blob"),
            StoreKind::Records => write!(f, "records"),
        }
    }
}

/// Where a value returned by the coordinator came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Remote,
}

/// The two backing stores of the process
#[derive(Debug, Clone)]
pub struct CacheStores {
    pub blobs: CacheManager,
    pub records: PersistenceManager,
}

/// Something the coordinator can look up, store and invalidate
#[async_trait]
pub trait CachedResource: Send + Sync {
    type Value: Send + Sync;

    fn kind(&self) -> StoreKind;

    /// Short label for logs
    fn describe(&self) -> String;

    /// Cached value, or `None` on a miss or stale entry
    async fn lookup(&self, stores: &CacheStores) -> Option<Self::Value>;

    async fn store(&self, stores: &CacheStores, value: &Self::Value) -> Result<(), StoreError>;

    /// Makes the next lookup miss
    async fn invalidate(&self, stores: &CacheStores) -> Result<(), StoreError>;
}

/// Any serializable value kept in the key-value cache
pub struct Blob<T> {
    key: String,
    ttl: Option<Duration>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Blob<T> {
    /// A blob under `key` with the cache's default TTL
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ttl: None,
            _value: PhantomData,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl<T> CachedResource for Blob<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Value = T;

    fn kind(&self) -> StoreKind {
        StoreKind::Blob
    }

    fn describe(&self) -> String {
        format!("blob {}", self.key)
    }

    async fn lookup(&self, stores: &CacheStores) -> Option<T> {
        stores.blobs.load(&self.key).await
    }

    async fn store(&self, stores: &CacheStores, value: &T) -> Result<(), StoreError> {
        match self.ttl {
            Some(ttl) => stores.blobs.save_with_ttl(&self.key, value, ttl).await,
            None => stores.blobs.save(&self.key, value).await,
        }
        Ok(())
    }

    async fn invalidate(&self, stores: &CacheStores) -> Result<(), StoreError> {
        stores.blobs.remove(&self.key).await;
        Ok(())
    }
}

/// One page of the character listing, cached as a raw blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharactersPage {
    pub offset: u32,
    pub limit: u32,
    ttl: Option<Duration>,
}

impl CharactersPage {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self {
            offset,
            limit,
            ttl: None,
        }
    }

    /// Expires the cached page after `ttl` instead of the cache default
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn key(&self) -> String {
        format!("characters_offset_{}_limit_{}", self.offset, self.limit)
    }
}

#[async_trait]
impl CachedResource for CharactersPage {
    type Value = Vec<Character>;

    fn kind(&self) -> StoreKind {
        StoreKind::Blob
    }

    fn describe(&self) -> String {
        format!("characters page offset={} limit={}", self.offset, self.limit)
    }

    async fn lookup(&self, stores: &CacheStores) -> Option<Vec<Character>> {
        stores.blobs.load(&self.key()).await
    }

    async fn store(&self, stores: &CacheStores, value: &Vec<Character>) -> Result<(), StoreError> {
        match self.ttl {
            Some(ttl) => stores.blobs.save_with_ttl(&self.key(), value, ttl).await,
            None => stores.blobs.save(&self.key(), value).await,
        }
        Ok(())
    }

    async fn invalidate(&self, stores: &CacheStores) -> Result<(), StoreError> {
        stores.blobs.remove(&self.key()).await;
        Ok(())
    }
}

/// A single character row in the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterRecord {
    pub id: i64,
}

#[async_trait]
impl CachedResource for CharacterRecord {
    type Value = Character;

    fn kind(&self) -> StoreKind {
        StoreKind::Records
    }

    fn describe(&self) -> String {
        format!("character {}", self.id)
    }

    async fn lookup(&self, stores: &CacheStores) -> Option<Character> {
        let record = stores.records.load_character_record(self.id).await?;
        if !stores.records.is_fresh(record.cached_at) {
            debug!(id = self.id, "Cached character is stale");
            return None;
        }
        Some(record.into_character())
    }

    async fn store(&self, stores: &CacheStores, value: &Character) -> Result<(), StoreError> {
        stores.records.save_character(value).await
    }

    async fn invalidate(&self, stores: &CacheStores) -> Result<(), StoreError> {
        stores.records.expire_character(self.id).await.map(|_| ())
    }
}

/// The comics cached for one character
///
/// An empty set counts as a miss, so a character with no comics is fetched
/// each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterComics {
    pub character_id: i64,
}

#[async_trait]
impl CachedResource for CharacterComics {
    type Value = Vec<Comic>;

    fn kind(&self) -> StoreKind {
        StoreKind::Records
    }

    fn describe(&self) -> String {
        format!("comics for character {}", self.character_id)
    }

    async fn lookup(&self, stores: &CacheStores) -> Option<Vec<Comic>> {
        let records = stores.records.load_comic_records(self.character_id).await;
        if records.is_empty() {
            return None;
        }
        if records.iter().any(|r| !stores.records.is_fresh(r.cached_at)) {
            debug!(character_id = self.character_id, "Cached comics are stale");
            return None;
        }
        Some(records.into_iter().map(|r| r.into_comic()).collect())
    }

    async fn store(&self, stores: &CacheStores, value: &Vec<Comic>) -> Result<(), StoreError> {
        stores.records.save_comics(value, self.character_id).await
    }

    async fn invalidate(&self, stores: &CacheStores) -> Result<(), StoreError> {
        stores.records.expire_comics(self.character_id).await.map(|_| ())
    }
}

/// Snapshot of what both tiers hold
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    /// Bytes used by blob files and sidecars
    pub disk_bytes: u64,
    pub memory_entries: usize,
    pub memory_bytes: usize,
    /// Age of the oldest cached character row
    pub cache_age: Option<Duration>,
    pub cached_characters: usize,
    pub favorites: usize,
    pub search_history: usize,
}

/// Facade over the key-value cache and the local store
#[derive(Debug, Clone)]
pub struct CacheCoordinator {
    stores: CacheStores,
}

impl CacheCoordinator {
    pub fn new(blobs: CacheManager, records: PersistenceManager) -> Self {
        Self {
            stores: CacheStores { blobs, records },
        }
    }

    pub fn blobs(&self) -> &CacheManager {
        &self.stores.blobs
    }

    pub fn records(&self) -> &PersistenceManager {
        &self.stores.records
    }

    /// Returns the cached value or fetches, stores and returns a fresh one
    ///
    /// A fetch error is returned unchanged and nothing is cached. A failure to
    /// store a fetched value is logged; the value is still returned.
    pub async fn get_or_fetch<R, F, Fut, E>(&self, resource: &R, fetcher: F) -> Result<R::Value, E>
    where
        R: CachedResource,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R::Value, E>>,
    {
        self.get_or_fetch_with_source(resource, fetcher)
            .await
            .map(|(value, _)| value)
    }

    /// Same as [`get_or_fetch`](Self::get_or_fetch), also reporting where the value came from
    pub async fn get_or_fetch_with_source<R, F, Fut, E>(
        &self,
        resource: &R,
        fetcher: F,
    ) -> Result<(R::Value, Source), E>
    where
        R: CachedResource,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<R::Value, E>>,
    {
        if let Some(value) = resource.lookup(&self.stores).await {
            debug!(resource = %resource.describe(), kind = %resource.kind(), "Cache hit");
            return Ok((value, Source::Cache));
        }

        debug!(resource = %resource.describe(), kind = %resource.kind(), "Cache miss, fetching");
        let value = fetcher().await?;

        if let Err(e) = resource.store(&self.stores, &value).await {
            warn!(resource = %resource.describe(), error = %e, "Failed to cache fetched value");
        }
        Ok((value, Source::Remote))
    }

    /// Cached value only, never fetching
    pub async fn cached<R: CachedResource>(&self, resource: &R) -> Option<R::Value> {
        resource.lookup(&self.stores).await
    }

    /// Stores a value the caller already has
    pub async fn write_through<R: CachedResource>(&self, resource: &R, value: &R::Value) -> Result<(), StoreError> {
        resource.store(&self.stores, value).await
    }

    pub async fn invalidate<R: CachedResource>(&self, resource: &R) -> Result<(), StoreError> {
        resource.invalidate(&self.stores).await
    }

    /// Empties both tiers
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.stores.blobs.clear_all().await;
        self.stores.records.clear_all_cache().await
    }

    pub async fn stats(&self) -> CacheStats {
        let blobs = &self.stores.blobs;
        let records = &self.stores.records;
        CacheStats {
            disk_bytes: blobs.get_cache_size().await,
            memory_entries: blobs.memory_entry_count(),
            memory_bytes: blobs.memory_cost(),
            cache_age: records.get_cache_age().await,
            cached_characters: records.character_count().await,
            favorites: records.favorites_count().await,
            search_history: records.search_history_count().await,
        }
    }
}
