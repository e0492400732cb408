//! SQLite-backed store for characters, comics and search history
//!
//! All writes go through one gate and run as a single transaction on a spawned
//! task, so a write commits even if the caller stops waiting for it and a
//! crash never leaves a half-replaced table behind. Reads go straight to the
//! pool and see everything committed so far.

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::records::{from_millis, CachedCharacter, CachedComic, SearchHistoryEntry};
use super::schema;
use crate::clock::{saturating_sub, Clock, SharedClock};
use crate::data::{Character, Comic};
use crate::error::StoreError;

/// Rows younger than this are served by `load_characters`
pub const DEFAULT_FRESHNESS_SECS: i64 = 3600;

/// Entries returned by `load_search_history`
pub const SEARCH_HISTORY_LIMIT: i64 = 10;

/// File name of the store inside the data directory
pub const DATABASE_FILE_NAME: &str = "marvel_cache.sqlite";

const MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

const CHARACTER_COLUMNS: &str = "id, name, description, thumbnail_path, comics_available, series_available, \
     stories_available, events_available, is_favorite, last_updated, cached_at, favorited_at";

const COMIC_COLUMNS: &str = "id, title, description, thumbnail_path, character_id, cached_at";

/// Structured local store
///
/// Clones share the pool and the write gate, so every handle in the process
/// writes through the same serialized path.
#[derive(Debug, Clone)]
pub struct PersistenceManager {
    pool: SqlitePool,
    write_gate: Arc<Mutex<()>>,
    clock: SharedClock,
    freshness_window: Duration,
    path: PathBuf,
}

impl PersistenceManager {
    /// Opens (creating if needed) the database at `path` and migrates it
    pub async fn open(path: impl AsRef<Path>, clock: SharedClock) -> Result<Self, StoreError> {
        Self::open_with_window(path, clock, Duration::seconds(DEFAULT_FRESHNESS_SECS)).await
    }

    /// Opens the database with a custom freshness window
    pub async fn open_with_window(
        path: impl AsRef<Path>,
        clock: SharedClock,
        freshness_window: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        let version = schema::migrate(&pool).await?;
        info!(path = %path.display(), version, "Opened local store");

        Ok(Self {
            pool,
            write_gate: Arc::new(Mutex::new(())),
            clock,
            freshness_window,
            path,
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn freshness_window(&self) -> Duration {
        self.freshness_window
    }

    /// Rows cached at or before this instant are stale
    pub fn freshness_cutoff(&self) -> DateTime<Utc> {
        saturating_sub(self.clock.now(), self.freshness_window)
    }

    /// Whether a row cached at `cached_at` (Unix millis) is still fresh
    pub fn is_fresh(&self, cached_at: i64) -> bool {
        cached_at > self.freshness_cutoff().timestamp_millis()
    }

    /// Closes the pool; later calls on any clone fail
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Runs `op` on a spawned task while holding the write gate
    async fn write<F, Fut, T>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(SqlitePool, DateTime<Utc>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StoreError>> + Send + 'static,
        T: Send + 'static,
    {
        let gate = Arc::clone(&self.write_gate);
        let pool = self.pool.clone();
        let clock = Arc::clone(&self.clock);

        let task = tokio::spawn(async move {
            let _guard = gate.lock_owned().await;
            f(pool, clock.now()).await
        });

        let result = task.await.map_err(|e| StoreError::TaskFailed(e.to_string()))?;
        if let Err(e) = &result {
            warn!(op, error = %e, "Store write failed");
        }
        result
    }

    // Characters

    /// Replaces every character row with `characters`
    ///
    /// Ids that were favorites before and appear in the new list stay
    /// favorites. Everything else is gone after the call.
    pub async fn save_characters(&self, characters: &[Character]) -> Result<(), StoreError> {
        let characters = characters.to_vec();
        self.write("save_characters", move |pool, now| async move {
            let mut tx = pool.begin().await?;

            let favorites: HashMap<i64, Option<i64>> =
                sqlx::query("SELECT id, favorited_at FROM characters WHERE is_favorite = 1")
                    .fetch_all(&mut *tx)
                    .await?
                    .into_iter()
                    .map(|row| (row.get::<i64, _>("id"), row.get::<Option<i64>, _>("favorited_at")))
                    .collect();

            sqlx::query("DELETE FROM characters").execute(&mut *tx).await?;

            for character in &characters {
                let mut row = CachedCharacter::from_character(character, now);
                if let Some(favorited_at) = favorites.get(&row.id) {
                    row.is_favorite = true;
                    row.favorited_at = favorited_at.or(Some(row.last_updated));
                }
                insert_character(&mut tx, &row).await?;
            }

            tx.commit().await?;
            debug!(count = characters.len(), "Replaced cached characters");
            Ok(())
        })
        .await
    }

    /// Fresh characters ordered by name, windowed by `offset` and `limit`
    pub async fn load_characters(&self, offset: u32, limit: u32) -> Vec<Character> {
        let query = format!(
            "SELECT {} FROM characters WHERE cached_at > ?1 ORDER BY name ASC, id ASC LIMIT ?2 OFFSET ?3",
            CHARACTER_COLUMNS
        );
        let rows = sqlx::query_as::<_, CachedCharacter>(&query)
            .bind(self.freshness_cutoff().timestamp_millis())
            .bind(i64::from(limit))
            .bind(i64::from(offset))
            .fetch_all(&self.pool)
            .await;

        into_characters(absorb("load_characters", rows))
    }

    /// Inserts or updates one character, keeping its favorite state
    pub async fn save_character(&self, character: &Character) -> Result<(), StoreError> {
        let character = character.clone();
        self.write("save_character", move |pool, now| async move {
            let row = CachedCharacter::from_character(&character, now);
            let mut tx = pool.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO characters (
                    id, name, description, thumbnail_path, comics_available, series_available,
                    stories_available, events_available, is_favorite, last_updated, cached_at, favorited_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, NULL)
                ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    description = excluded.description,
                    thumbnail_path = excluded.thumbnail_path,
                    comics_available = excluded.comics_available,
                    series_available = excluded.series_available,
                    stories_available = excluded.stories_available,
                    events_available = excluded.events_available,
                    last_updated = excluded.last_updated,
                    cached_at = excluded.cached_at
                "#,
            )
            .bind(row.id)
            .bind(&row.name)
            .bind(&row.description)
            .bind(&row.thumbnail_path)
            .bind(row.comics_available)
            .bind(row.series_available)
            .bind(row.stories_available)
            .bind(row.events_available)
            .bind(row.last_updated)
            .bind(row.cached_at)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// One character regardless of freshness
    pub async fn load_character(&self, id: i64) -> Option<Character> {
        self.load_character_record(id).await.map(CachedCharacter::into_character)
    }

    /// The raw row for `id`, including its timestamps
    pub async fn load_character_record(&self, id: i64) -> Option<CachedCharacter> {
        let query = format!("SELECT {} FROM characters WHERE id = ?1", CHARACTER_COLUMNS);
        let row = sqlx::query_as::<_, CachedCharacter>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await;

        match row {
            Ok(row) => row,
            Err(e) => {
                warn!(op = "load_character", error = %e, "Store read failed");
                None
            }
        }
    }

    /// Case-insensitive name match over every cached row, ordered by name
    pub async fn search_characters(&self, query: &str, limit: u32) -> Vec<Character> {
        let pattern = format!("%{}%", escape_like(query.trim()));
        let sql = format!(
            "SELECT {} FROM characters WHERE name LIKE ?1 ESCAPE '\\' ORDER BY name ASC, id ASC LIMIT ?2",
            CHARACTER_COLUMNS
        );
        let rows = sqlx::query_as::<_, CachedCharacter>(&sql)
            .bind(pattern)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await;

        into_characters(absorb("search_characters", rows))
    }

    /// Backdates a character so freshness checks treat it as stale
    ///
    /// Returns whether a row existed.
    pub async fn expire_character(&self, id: i64) -> Result<bool, StoreError> {
        let window = self.freshness_window;
        self.write("expire_character", move |pool, now| async move {
            let result = sqlx::query("UPDATE characters SET cached_at = ?1 WHERE id = ?2")
                .bind(saturating_sub(now, window).timestamp_millis())
                .bind(id)
                .execute(&pool)
                .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    // Comics

    /// Replaces the comics cached for `character_id`; other characters are untouched
    pub async fn save_comics(&self, comics: &[Comic], character_id: i64) -> Result<(), StoreError> {
        let comics = comics.to_vec();
        self.write("save_comics", move |pool, now| async move {
            let mut tx = pool.begin().await?;
            sqlx::query("DELETE FROM comics WHERE character_id = ?1")
                .bind(character_id)
                .execute(&mut *tx)
                .await?;

            for comic in &comics {
                let row = CachedComic::from_comic(comic, character_id, now);
                sqlx::query(
                    "INSERT INTO comics (id, title, description, thumbnail_path, character_id, cached_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )
                .bind(row.id)
                .bind(&row.title)
                .bind(&row.description)
                .bind(&row.thumbnail_path)
                .bind(row.character_id)
                .bind(row.cached_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            debug!(character_id, count = comics.len(), "Replaced cached comics");
            Ok(())
        })
        .await
    }

    /// All comics cached for a character, ordered by title
    pub async fn load_comics(&self, character_id: i64) -> Vec<Comic> {
        self.load_comic_records(character_id)
            .await
            .into_iter()
            .map(CachedComic::into_comic)
            .collect()
    }

    /// Raw comic rows for a character, ordered by title
    pub async fn load_comic_records(&self, character_id: i64) -> Vec<CachedComic> {
        let query = format!(
            "SELECT {} FROM comics WHERE character_id = ?1 ORDER BY title ASC, row_id ASC",
            COMIC_COLUMNS
        );
        let rows = sqlx::query_as::<_, CachedComic>(&query)
            .bind(character_id)
            .fetch_all(&self.pool)
            .await;

        absorb("load_comics", rows)
    }

    /// Backdates the comics of a character; returns how many rows changed
    pub async fn expire_comics(&self, character_id: i64) -> Result<u64, StoreError> {
        let window = self.freshness_window;
        self.write("expire_comics", move |pool, now| async move {
            let result = sqlx::query("UPDATE comics SET cached_at = ?1 WHERE character_id = ?2")
                .bind(saturating_sub(now, window).timestamp_millis())
                .bind(character_id)
                .execute(&pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    // Favorites

    /// Marks a character as favorite, creating its row if needed
    ///
    /// An existing row keeps its data and only gains the flag. A created row
    /// starts out stale, so freshness-checked reads still fetch full details.
    /// Returns whether membership changed.
    pub async fn save_favorite(&self, character: &Character) -> Result<bool, StoreError> {
        let character = character.clone();
        let window = self.freshness_window;
        self.write("save_favorite", move |pool, now| async move {
            let mut tx = pool.begin().await?;
            let existing: Option<bool> = sqlx::query_scalar("SELECT is_favorite FROM characters WHERE id = ?1")
                .bind(character.id)
                .fetch_optional(&mut *tx)
                .await?;

            let changed = match existing {
                Some(true) => false,
                Some(false) => {
                    sqlx::query("UPDATE characters SET is_favorite = 1, favorited_at = ?1 WHERE id = ?2")
                        .bind(now.timestamp_millis())
                        .bind(character.id)
                        .execute(&mut *tx)
                        .await?;
                    true
                }
                None => {
                    let mut row = CachedCharacter::from_character(&character, now);
                    row.is_favorite = true;
                    row.favorited_at = Some(row.last_updated);
                    row.cached_at = saturating_sub(now, window).timestamp_millis();
                    insert_character(&mut tx, &row).await?;
                    true
                }
            };

            tx.commit().await?;
            Ok(changed)
        })
        .await
    }

    /// Clears the favorite flag; the row itself stays
    ///
    /// Returns whether membership changed. Absent ids are a no-op.
    pub async fn remove_favorite(&self, id: i64) -> Result<bool, StoreError> {
        self.write("remove_favorite", move |pool, _now| async move {
            let result = sqlx::query(
                "UPDATE characters SET is_favorite = 0, favorited_at = NULL WHERE id = ?1 AND is_favorite = 1",
            )
            .bind(id)
            .execute(&pool)
            .await?;
            Ok(result.rows_affected() > 0)
        })
        .await
    }

    /// Favorite characters ordered by name
    pub async fn load_favorites(&self) -> Vec<Character> {
        let query = format!(
            "SELECT {} FROM characters WHERE is_favorite = 1 ORDER BY name ASC, id ASC",
            CHARACTER_COLUMNS
        );
        let rows = sqlx::query_as::<_, CachedCharacter>(&query)
            .fetch_all(&self.pool)
            .await;

        into_characters(absorb("load_favorites", rows))
    }

    /// Favorite rows ordered by when they were favorited
    pub async fn load_favorite_records(&self) -> Vec<CachedCharacter> {
        let query = format!(
            "SELECT {} FROM characters WHERE is_favorite = 1 ORDER BY favorited_at ASC, id ASC",
            CHARACTER_COLUMNS
        );
        let rows = sqlx::query_as::<_, CachedCharacter>(&query)
            .fetch_all(&self.pool)
            .await;

        absorb("load_favorite_records", rows)
    }

    pub async fn is_favorite(&self, id: i64) -> bool {
        let flag = sqlx::query_scalar::<_, bool>("SELECT is_favorite FROM characters WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await;

        match flag {
            Ok(flag) => flag.unwrap_or(false),
            Err(e) => {
                warn!(op = "is_favorite", error = %e, "Store read failed");
                false
            }
        }
    }

    pub async fn favorites_count(&self) -> usize {
        self.count("favorites_count", "SELECT COUNT(*) FROM characters WHERE is_favorite = 1")
            .await
    }

    // Search history

    /// Records a search, refreshing the entry if the query was seen before
    ///
    /// Queries are trimmed; an empty query is ignored.
    pub async fn save_search_history(&self, query: &str, result_count: usize) -> Result<(), StoreError> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Ok(());
        }
        let result_count = i64::try_from(result_count).unwrap_or(i64::MAX);

        self.write("save_search_history", move |pool, now| async move {
            let mut tx = pool.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO search_history (query, timestamp, result_count) VALUES (?1, ?2, ?3)
                ON CONFLICT(query) DO UPDATE SET
                    timestamp = excluded.timestamp,
                    result_count = excluded.result_count
                "#,
            )
            .bind(&query)
            .bind(now.timestamp_millis())
            .bind(result_count)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(())
        })
        .await
    }

    /// The most recent queries, newest first
    pub async fn load_search_history(&self) -> Vec<String> {
        self.load_search_history_entries()
            .await
            .into_iter()
            .map(|entry| entry.query)
            .collect()
    }

    /// The most recent history rows, newest first
    pub async fn load_search_history_entries(&self) -> Vec<SearchHistoryEntry> {
        let rows = sqlx::query_as::<_, SearchHistoryEntry>(
            "SELECT query, timestamp, result_count FROM search_history ORDER BY timestamp DESC, query ASC LIMIT ?1",
        )
        .bind(SEARCH_HISTORY_LIMIT)
        .fetch_all(&self.pool)
        .await;

        absorb("load_search_history", rows)
    }

    pub async fn clear_search_history(&self) -> Result<(), StoreError> {
        self.write("clear_search_history", |pool, _now| async move {
            sqlx::query("DELETE FROM search_history").execute(&pool).await?;
            Ok(())
        })
        .await
    }

    pub async fn search_history_count(&self) -> usize {
        self.count("search_history_count", "SELECT COUNT(*) FROM search_history")
            .await
    }

    // Cache-wide

    /// Deletes every row of every table in one transaction
    pub async fn clear_all_cache(&self) -> Result<(), StoreError> {
        self.write("clear_all_cache", |pool, _now| async move {
            let mut tx = pool.begin().await?;
            sqlx::query("DELETE FROM characters").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM comics").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM search_history").execute(&mut *tx).await?;
            tx.commit().await?;
            info!("Cleared local store");
            Ok(())
        })
        .await
    }

    /// Age of the oldest cached character, `None` when there are none
    pub async fn get_cache_age(&self) -> Option<Duration> {
        let oldest = sqlx::query_scalar::<_, Option<i64>>("SELECT MIN(cached_at) FROM characters")
            .fetch_one(&self.pool)
            .await;

        match oldest {
            Ok(oldest) => oldest.map(|millis| self.clock.now() - from_millis(millis)),
            Err(e) => {
                warn!(op = "get_cache_age", error = %e, "Store read failed");
                None
            }
        }
    }

    pub async fn character_count(&self) -> usize {
        self.count("character_count", "SELECT COUNT(*) FROM characters").await
    }

    async fn count(&self, op: &'static str, sql: &str) -> usize {
        match sqlx::query_scalar::<_, i64>(sql).fetch_one(&self.pool).await {
            Ok(n) => usize::try_from(n).unwrap_or(0),
            Err(e) => {
                warn!(op, error = %e, "Store read failed");
                0
            }
        }
    }
}

async fn insert_character(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    row: &CachedCharacter,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO characters (
            id, name, description, thumbnail_path, comics_available, series_available,
            stories_available, events_available, is_favorite, last_updated, cached_at, favorited_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            description = excluded.description,
            thumbnail_path = excluded.thumbnail_path,
            comics_available = excluded.comics_available,
            series_available = excluded.series_available,
            stories_available = excluded.stories_available,
            events_available = excluded.events_available,
            is_favorite = excluded.is_favorite,
            last_updated = excluded.last_updated,
            cached_at = excluded.cached_at,
            favorited_at = excluded.favorited_at
        "#,
    )
    .bind(row.id)
    .bind(&row.name)
    .bind(&row.description)
    .bind(&row.thumbnail_path)
    .bind(row.comics_available)
    .bind(row.series_available)
    .bind(row.stories_available)
    .bind(row.events_available)
    .bind(row.is_favorite)
    .bind(row.last_updated)
    .bind(row.cached_at)
    .bind(row.favorited_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Logs a failed read and reports it as empty
fn absorb<T>(op: &'static str, result: Result<Vec<T>, sqlx::Error>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        warn!(op, error = %e, "Store read failed");
        Vec::new()
    })
}

fn into_characters(rows: Vec<CachedCharacter>) -> Vec<Character> {
    rows.into_iter().map(CachedCharacter::into_character).collect()
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::data::{MarvelImage, ResourceList};
    use tempfile::TempDir;

    async fn create_test_store() -> (PersistenceManager, ManualClock, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = ManualClock::starting_now();
        let store = PersistenceManager::open(temp_dir.path().join("store.sqlite"), clock.shared())
            .await
            .expect("Failed to open store");
        (store, clock, temp_dir)
    }

    fn character(id: i64, name: &str) -> Character {
        Character::minimal(id, name, MarvelImage::new(format!("http://img/{}", id), "jpg"))
    }

    fn comic(id: i64, title: &str) -> Comic {
        Comic {
            id,
            title: title.to_string(),
            description: Some(format!("{} description", title)),
            thumbnail: MarvelImage::new(format!("http://img/c{}", id), "jpg"),
        }
    }

    fn names(characters: &[Character]) -> Vec<&str> {
        characters.iter().map(|c| c.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_save_characters_replaces_everything() {
        let (store, _clock, _temp_dir) = create_test_store().await;

        store
            .save_characters(&[character(1, "A"), character(2, "B")])
            .await
            .expect("first save");
        store.save_characters(&[character(3, "C")]).await.expect("second save");

        assert!(store.load_character(1).await.is_none());
        assert!(store.load_character(2).await.is_none());
        assert_eq!(store.load_character(3).await.map(|c| c.name), Some("C".to_string()));
        assert_eq!(store.character_count().await, 1);
    }

    #[tokio::test]
    async fn test_save_characters_keeps_favorites_that_reappear() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        store.save_favorite(&character(1, "Hulk")).await.expect("favorite");
        store.save_favorite(&character(2, "Thor")).await.expect("favorite");

        store
            .save_characters(&[character(1, "Hulk"), character(5, "Loki")])
            .await
            .expect("replace");

        assert!(store.is_favorite(1).await);
        assert!(!store.is_favorite(2).await);
        assert!(!store.is_favorite(5).await);
    }

    #[tokio::test]
    async fn test_load_characters_orders_by_name_and_pages() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        store
            .save_characters(&[
                character(1, "Wolverine"),
                character(2, "Captain America"),
                character(3, "Iron Man"),
                character(4, "Black Widow"),
            ])
            .await
            .expect("save");

        let first = store.load_characters(0, 2).await;
        let second = store.load_characters(2, 2).await;

        assert_eq!(names(&first), vec!["Black Widow", "Captain America"]);
        assert_eq!(names(&second), vec!["Iron Man", "Wolverine"]);
        assert!(store.load_characters(4, 2).await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_rows_are_hidden_from_listing_but_not_deleted() {
        let (store, clock, _temp_dir) = create_test_store().await;
        let mut spidey = character(1001, "Spider-Man");
        spidey.comics = ResourceList::with_available(150);
        store.save_character(&spidey).await.expect("save");

        assert_eq!(store.load_characters(0, 20).await.len(), 1);

        clock.advance(Duration::seconds(DEFAULT_FRESHNESS_SECS + 1));

        assert!(store.load_characters(0, 20).await.is_empty());
        let loaded = store.load_character(1001).await.expect("still stored");
        assert_eq!(loaded.name, "Spider-Man");
        assert_eq!(loaded.comics.available, 150);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_replace_all_keeps_one_whole_list() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        let mut tasks = Vec::new();

        for batch in 0..8i64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let list = [
                    character(batch * 10, &format!("A{}", batch)),
                    character(batch * 10 + 1, &format!("B{}", batch)),
                ];
                store.save_characters(&list).await.expect("save");
                let seen = store.load_characters(0, 20).await;
                assert_eq!(seen.len(), 2, "readers never see a half-replaced list");
            }));
        }
        for task in tasks {
            task.await.expect("task panicked");
        }

        let survivors = store.load_characters(0, 20).await;
        assert_eq!(survivors.len(), 2);
        assert_eq!(survivors[0].id / 10, survivors[1].id / 10);
        assert_eq!(store.character_count().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_upserts_all_land() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        let mut tasks = Vec::new();

        for id in 0..20i64 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                store.save_character(&character(id, &format!("Hero {:02}", id))).await.expect("save");
                store.load_character(id).await.expect("own write visible");
            }));
        }
        for task in tasks {
            task.await.expect("task panicked");
        }

        assert_eq!(store.character_count().await, 20);
        assert_eq!(store.load_characters(0, 50).await.len(), 20);
    }

    #[tokio::test]
    async fn test_write_commits_when_caller_stops_waiting() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        let list = [character(1, "Hulk"), character(2, "Thor")];

        let abandoned = tokio::time::timeout(std::time::Duration::ZERO, store.save_characters(&list)).await;
        assert!(abandoned.is_err(), "write should still be pending when abandoned");

        for _ in 0..200 {
            if store.character_count().await == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(names(&store.load_characters(0, 20).await), vec!["Hulk", "Thor"]);
    }

    #[tokio::test]
    async fn test_huge_freshness_window_saturates() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = ManualClock::starting_now();
        let store = PersistenceManager::open_with_window(
            temp_dir.path().join("store.sqlite"),
            clock.shared(),
            Duration::seconds(100_000_000_000_000),
        )
        .await
        .expect("Failed to open store");

        store.save_character(&character(1, "Hulk")).await.expect("save");
        assert_eq!(store.load_characters(0, 20).await.len(), 1);

        assert!(store.expire_character(1).await.expect("expire"));
        assert!(store.load_characters(0, 20).await.is_empty());
        assert!(store.load_character(1).await.is_some());
    }

    #[tokio::test]
    async fn test_save_character_upserts_and_keeps_favorite_flag() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        store.save_favorite(&character(7, "Storm")).await.expect("favorite");

        let mut updated = character(7, "Storm");
        updated.description = "Weather witch".to_string();
        store.save_character(&updated).await.expect("upsert");

        let loaded = store.load_character(7).await.expect("row");
        assert_eq!(loaded.description, "Weather witch");
        assert!(store.is_favorite(7).await);
        assert_eq!(store.character_count().await, 1);
    }

    #[tokio::test]
    async fn test_save_comics_is_scoped_to_character() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        store
            .save_comics(&[comic(10, "X"), comic(11, "Y")], 1)
            .await
            .expect("save for 1");
        store.save_comics(&[comic(20, "Other")], 2).await.expect("save for 2");
        store.save_comics(&[comic(12, "Z")], 1).await.expect("replace for 1");

        let first: Vec<i64> = store.load_comics(1).await.iter().map(|c| c.id).collect();
        let second: Vec<i64> = store.load_comics(2).await.iter().map(|c| c.id).collect();
        assert_eq!(first, vec![12]);
        assert_eq!(second, vec![20]);
    }

    #[tokio::test]
    async fn test_load_comics_orders_by_title() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        store
            .save_comics(&[comic(1, "Uncanny X-Men"), comic(2, "Amazing Spider-Man"), comic(3, "Daredevil")], 9)
            .await
            .expect("save");

        let titles: Vec<String> = store.load_comics(9).await.into_iter().map(|c| c.title).collect();
        assert_eq!(titles, vec!["Amazing Spider-Man", "Daredevil", "Uncanny X-Men"]);
    }

    #[tokio::test]
    async fn test_favorites_are_idempotent() {
        let (store, _clock, _temp_dir) = create_test_store().await;

        assert!(!store.remove_favorite(404).await.expect("remove absent"));
        assert!(store.save_favorite(&character(1, "Hulk")).await.expect("add"));
        assert!(!store.save_favorite(&character(1, "Hulk")).await.expect("add again"));
        assert!(store.is_favorite(1).await);

        assert!(store.remove_favorite(1).await.expect("remove"));
        assert!(!store.remove_favorite(1).await.expect("remove again"));
        assert!(!store.is_favorite(1).await);
        assert!(store.load_character(1).await.is_some(), "row is kept");
    }

    #[tokio::test]
    async fn test_save_favorite_on_existing_row_keeps_data() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        let mut full = character(3, "Iron Man");
        full.comics = ResourceList::with_available(2500);
        store.save_character(&full).await.expect("save");

        store
            .save_favorite(&character(3, "Tony"))
            .await
            .expect("favorite");

        let loaded = store.load_character(3).await.expect("row");
        assert_eq!(loaded.name, "Iron Man");
        assert_eq!(loaded.comics.available, 2500);
    }

    #[tokio::test]
    async fn test_synthesized_favorite_row_is_stale() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        store.save_favorite(&character(8, "Falcon")).await.expect("favorite");

        let record = store.load_character_record(8).await.expect("row created");
        assert!(!store.is_fresh(record.cached_at));
        assert!(store.load_characters(0, 20).await.is_empty());
        assert_eq!(store.load_favorites().await.len(), 1);
    }

    #[tokio::test]
    async fn test_favorite_listings_order() {
        let (store, clock, _temp_dir) = create_test_store().await;
        store.save_favorite(&character(1, "Zemo")).await.expect("favorite");
        clock.advance(Duration::seconds(1));
        store.save_favorite(&character(2, "Agatha")).await.expect("favorite");

        assert_eq!(names(&store.load_favorites().await), vec!["Agatha", "Zemo"]);
        let by_date: Vec<i64> = store.load_favorite_records().await.iter().map(|r| r.id).collect();
        assert_eq!(by_date, vec![1, 2]);
        assert_eq!(store.favorites_count().await, 2);
    }

    #[tokio::test]
    async fn test_search_history_keeps_ten_newest() {
        let (store, clock, _temp_dir) = create_test_store().await;
        for i in 0..15 {
            store
                .save_search_history(&format!("query {}", i), i)
                .await
                .expect("save history");
            clock.advance(Duration::seconds(1));
        }

        let history = store.load_search_history().await;
        let expected: Vec<String> = (5..15).rev().map(|i| format!("query {}", i)).collect();
        assert_eq!(history, expected);
        assert_eq!(store.search_history_count().await, 15);
    }

    #[tokio::test]
    async fn test_search_history_updates_in_place() {
        let (store, clock, _temp_dir) = create_test_store().await;
        store.save_search_history("hulk", 1).await.expect("save");
        clock.advance(Duration::seconds(1));
        store.save_search_history("thor", 2).await.expect("save");
        clock.advance(Duration::seconds(1));
        store.save_search_history("  hulk ", 5).await.expect("save again");
        store.save_search_history("   ", 0).await.expect("empty ignored");

        let entries = store.load_search_history_entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].query, "hulk");
        assert_eq!(entries[0].result_count, 5);
        assert_eq!(entries[1].query, "thor");
    }

    #[tokio::test]
    async fn test_clear_search_history() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        store.save_search_history("hulk", 1).await.expect("save");

        store.clear_search_history().await.expect("clear");

        assert!(store.load_search_history().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_cache_empties_every_table() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        store.save_characters(&[character(1, "A")]).await.expect("save");
        store.save_comics(&[comic(1, "X")], 1).await.expect("save");
        store.save_search_history("a", 1).await.expect("save");

        store.clear_all_cache().await.expect("clear");

        assert_eq!(store.character_count().await, 0);
        assert!(store.load_comics(1).await.is_empty());
        assert!(store.load_search_history().await.is_empty());
        assert!(store.get_cache_age().await.is_none());
    }

    #[tokio::test]
    async fn test_cache_age_tracks_oldest_row() {
        let (store, clock, _temp_dir) = create_test_store().await;
        assert!(store.get_cache_age().await.is_none());

        store.save_character(&character(1, "A")).await.expect("save");
        clock.advance(Duration::seconds(30));
        store.save_character(&character(2, "B")).await.expect("save");
        clock.advance(Duration::seconds(10));

        assert_eq!(store.get_cache_age().await, Some(Duration::seconds(40)));
    }

    #[tokio::test]
    async fn test_expire_marks_rows_stale() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        store.save_character(&character(1, "A")).await.expect("save");
        store.save_comics(&[comic(1, "X"), comic(2, "Y")], 1).await.expect("save");

        assert!(store.expire_character(1).await.expect("expire"));
        assert!(!store.expire_character(99).await.expect("expire absent"));
        assert_eq!(store.expire_comics(1).await.expect("expire comics"), 2);

        let record = store.load_character_record(1).await.expect("row kept");
        assert!(!store.is_fresh(record.cached_at));
        assert!(store.load_characters(0, 20).await.is_empty());
        assert!(store
            .load_comic_records(1)
            .await
            .iter()
            .all(|c| !store.is_fresh(c.cached_at)));
    }

    #[tokio::test]
    async fn test_search_characters_is_case_insensitive() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        store
            .save_characters(&[character(1, "Spider-Man"), character(2, "Spider-Woman"), character(3, "Hulk")])
            .await
            .expect("save");

        assert_eq!(names(&store.search_characters("SPIDER", 10).await), vec!["Spider-Man", "Spider-Woman"]);
        assert_eq!(names(&store.search_characters("spider", 1).await), vec!["Spider-Man"]);
        assert!(store.search_characters("100%", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_reopen_sees_committed_rows() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("nested").join("store.sqlite");
        let clock = ManualClock::starting_now();

        let store = PersistenceManager::open(&path, clock.shared()).await.expect("open");
        store.save_favorite(&character(1, "Hulk")).await.expect("favorite");
        store.close().await;

        let reopened = PersistenceManager::open(&path, clock.shared()).await.expect("reopen");
        assert!(reopened.is_favorite(1).await);
    }

    #[tokio::test]
    async fn test_writes_fail_loudly_after_close() {
        let (store, _clock, _temp_dir) = create_test_store().await;
        store.close().await;

        assert!(store.save_characters(&[character(1, "A")]).await.is_err());
        assert!(store.load_characters(0, 20).await.is_empty());
        assert!(!store.is_favorite(1).await);
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("a_b%c\\"), "a\\_b\\%c\\\\");
    }
}
