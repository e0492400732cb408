//! Favorites ledger
//!
//! Tracks which characters are marked as favorite and broadcasts a
//! [`FavoritesEvent`] whenever membership changes. Two backends exist: the
//! character table of the local store, and a standalone JSON id-set for setups
//! without a database. The id-set can borrow full records from a store when
//! one is available.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};

use crate::clock::{Clock, SharedClock};
use crate::data::{Character, MarvelImage};
use crate::error::StoreError;
use crate::store::{CachedCharacter, PersistenceManager};

/// File name of the standalone favorites set
pub const FAVORITES_FILE_NAME: &str = "favorites.json";

const EVENT_CAPACITY: usize = 64;

/// Membership change notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavoritesEvent {
    Added(i64),
    Removed(i64),
}

/// What a caller needs to favorite a character that may not be cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FavoriteCharacterInput {
    pub id: i64,
    pub name: String,
    /// Full thumbnail URL, extension included
    pub thumbnail_url: Option<String>,
}

impl FavoriteCharacterInput {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            thumbnail_url: None,
        }
    }

    pub fn with_thumbnail(mut self, url: impl Into<String>) -> Self {
        self.thumbnail_url = Some(url.into());
        self
    }

    fn thumbnail(&self) -> MarvelImage {
        self.thumbnail_url
            .as_deref()
            .map(MarvelImage::from_url)
            .unwrap_or_default()
    }

    /// A character with only the fields the input carries
    pub fn to_character(&self) -> Character {
        Character::minimal(self.id, self.name.clone(), self.thumbnail())
    }
}

impl From<&Character> for FavoriteCharacterInput {
    fn from(character: &Character) -> Self {
        Self {
            id: character.id,
            name: character.name.clone(),
            thumbnail_url: character.thumbnail.url(),
        }
    }
}

/// A favorited character and when it was favorited
#[derive(Debug, Clone, PartialEq)]
pub struct Favorite {
    pub character: Character,
    pub added_at: DateTime<Utc>,
}

/// Orderings offered for the favorites list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FavoritesSort {
    /// Oldest favorite first
    #[default]
    DateAdded,
    Name,
    /// Most comic appearances first
    MostComics,
}

impl FavoritesSort {
    pub fn title(&self) -> &'static str {
        match self {
            FavoritesSort::DateAdded => "Date Added",
            FavoritesSort::Name => "Name",
            FavoritesSort::MostComics => "Most Comics",
        }
    }

    /// Sorts `favorites` in place; ties keep their relative order
    pub fn apply(&self, favorites: &mut [Favorite]) {
        match self {
            FavoritesSort::DateAdded => favorites.sort_by_key(|f| f.added_at),
            FavoritesSort::Name => favorites.sort_by(|a, b| a.character.name.cmp(&b.character.name)),
            FavoritesSort::MostComics => {
                favorites.sort_by(|a, b| b.character.comics.available.cmp(&a.character.comics.available))
            }
        }
    }
}

/// Keeps favorites whose name contains `query`, ignoring case
pub fn filter_by_name(favorites: Vec<Favorite>, query: &str) -> Vec<Favorite> {
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return favorites;
    }
    favorites
        .into_iter()
        .filter(|f| f.character.name.to_lowercase().contains(&query))
        .collect()
}

/// Plain-text list suitable for sharing
pub fn export_favorites(favorites: &[Favorite]) -> String {
    let list = favorites
        .iter()
        .map(|f| format!("• {}", f.character.name))
        .collect::<Vec<_>>()
        .join("\n");
    format!("My Marvel Favorites:\n\n{}", list)
}

/// One entry of the standalone favorites file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdSetEntry {
    id: i64,
    name: String,
    #[serde(default)]
    thumbnail_path: Option<String>,
    added_at: DateTime<Utc>,
}

#[derive(Debug)]
enum Backend {
    Store(PersistenceManager),
    IdSet {
        path: PathBuf,
        entries: Mutex<Vec<IdSetEntry>>,
        enrich_from: Option<PersistenceManager>,
    },
}

/// Favorite membership with change notifications
#[derive(Debug)]
pub struct FavoritesLedger {
    backend: Backend,
    events: broadcast::Sender<FavoritesEvent>,
    clock: SharedClock,
}

impl FavoritesLedger {
    /// Ledger over the character table of `store`
    pub fn with_store(store: PersistenceManager, clock: SharedClock) -> Self {
        Self::from_backend(Backend::Store(store), clock)
    }

    /// Ledger over a standalone JSON file
    ///
    /// A missing file starts an empty set. An unreadable one is logged and
    /// also starts empty; it is replaced on the next change.
    pub async fn with_id_set(path: impl Into<PathBuf>, clock: SharedClock) -> Self {
        let path = path.into();
        let entries = read_id_set(&path).await;
        Self::from_backend(
            Backend::IdSet {
                path,
                entries: Mutex::new(entries),
                enrich_from: None,
            },
            clock,
        )
    }

    /// Lets an id-set ledger fill in full records from `store`
    ///
    /// Has no effect on a store-backed ledger.
    pub fn enrich_from(mut self, store: PersistenceManager) -> Self {
        if let Backend::IdSet { enrich_from, .. } = &mut self.backend {
            *enrich_from = Some(store);
        }
        self
    }

    fn from_backend(backend: Backend, clock: SharedClock) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self { backend, events, clock }
    }

    /// Receives every membership change from now on; drop it to unsubscribe
    pub fn subscribe(&self) -> broadcast::Receiver<FavoritesEvent> {
        self.events.subscribe()
    }

    pub async fn is_favorite(&self, id: i64) -> bool {
        match &self.backend {
            Backend::Store(store) => store.is_favorite(id).await,
            Backend::IdSet { entries, .. } => entries.lock().await.iter().any(|e| e.id == id),
        }
    }

    /// Adds a favorite, synthesizing a record if the character was never cached
    pub async fn add_favorite(&self, input: &FavoriteCharacterInput) -> Result<(), StoreError> {
        let changed = match &self.backend {
            Backend::Store(store) => store.save_favorite(&input.to_character()).await?,
            Backend::IdSet { path, entries, .. } => {
                let mut entries = entries.lock().await;
                if entries.iter().any(|e| e.id == input.id) {
                    false
                } else {
                    let mut updated = entries.clone();
                    updated.push(IdSetEntry {
                        id: input.id,
                        name: input.name.clone(),
                        thumbnail_path: input.thumbnail_url.clone(),
                        added_at: self.clock.now(),
                    });
                    write_id_set(path, &updated).await?;
                    *entries = updated;
                    true
                }
            }
        };

        if changed {
            self.notify(FavoritesEvent::Added(input.id));
        }
        Ok(())
    }

    /// Removes a favorite; removing an absent id succeeds without notifying
    pub async fn remove_favorite(&self, id: i64) -> Result<(), StoreError> {
        let changed = match &self.backend {
            Backend::Store(store) => store.remove_favorite(id).await?,
            Backend::IdSet { path, entries, .. } => {
                let mut entries = entries.lock().await;
                if entries.iter().any(|e| e.id == id) {
                    let updated: Vec<IdSetEntry> = entries.iter().filter(|e| e.id != id).cloned().collect();
                    write_id_set(path, &updated).await?;
                    *entries = updated;
                    true
                } else {
                    false
                }
            }
        };

        if changed {
            self.notify(FavoritesEvent::Removed(id));
        }
        Ok(())
    }

    /// Removes several favorites, stopping at the first failure
    pub async fn remove_favorites(&self, ids: &[i64]) -> Result<(), StoreError> {
        for id in ids {
            self.remove_favorite(*id).await?;
        }
        Ok(())
    }

    /// Every favorite, oldest first
    ///
    /// Records are rebuilt from whatever is cached. Missing fields come back
    /// empty or zero instead of failing the call.
    pub async fn get_all_favorites(&self) -> Vec<Favorite> {
        match &self.backend {
            Backend::Store(store) => store
                .load_favorite_records()
                .await
                .into_iter()
                .map(favorite_from_record)
                .collect(),
            Backend::IdSet {
                entries, enrich_from, ..
            } => {
                let entries = entries.lock().await.clone();
                match enrich_from {
                    Some(store) => {
                        let lookups = entries.iter().map(|entry| store.load_character(entry.id));
                        let cached = join_all(lookups).await;
                        entries
                            .into_iter()
                            .zip(cached)
                            .map(|(entry, character)| Favorite {
                                character: character.unwrap_or_else(|| entry_character(&entry)),
                                added_at: entry.added_at,
                            })
                            .collect()
                    }
                    None => entries
                        .into_iter()
                        .map(|entry| Favorite {
                            character: entry_character(&entry),
                            added_at: entry.added_at,
                        })
                        .collect(),
                }
            }
        }
    }

    /// Favorites in the requested order
    pub async fn get_sorted_favorites(&self, sort: FavoritesSort) -> Vec<Favorite> {
        let mut favorites = self.get_all_favorites().await;
        sort.apply(&mut favorites);
        favorites
    }

    pub async fn count(&self) -> usize {
        match &self.backend {
            Backend::Store(store) => store.favorites_count().await,
            Backend::IdSet { entries, .. } => entries.lock().await.len(),
        }
    }

    fn notify(&self, event: FavoritesEvent) {
        // No subscribers is not an error
        if self.events.send(event).is_err() {
            debug!(?event, "Favorites changed with no subscribers");
        }
    }
}

fn favorite_from_record(record: CachedCharacter) -> Favorite {
    let added_at = record.favorited_at().unwrap_or_else(|| record.cached_at());
    Favorite {
        character: record.into_character(),
        added_at,
    }
}

fn entry_character(entry: &IdSetEntry) -> Character {
    let thumbnail = entry
        .thumbnail_path
        .as_deref()
        .map(MarvelImage::from_url)
        .unwrap_or_default();
    Character::minimal(entry.id, entry.name.clone(), thumbnail)
}

async fn read_id_set(path: &Path) -> Vec<IdSetEntry> {
    let content = match tokio::fs::read(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read favorites file");
            return Vec::new();
        }
    };

    serde_json::from_slice(&content).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Favorites file is corrupt, starting empty");
        Vec::new()
    })
}

/// Writes the set to a temporary file and renames it over the old one
async fn write_id_set(path: &Path, entries: &[IdSetEntry]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = serde_json::to_vec_pretty(entries)?;
    let temp_path = path.with_extension("json.tmp");
    tokio::fs::write(&temp_path, content).await?;
    tokio::fs::rename(&temp_path, path).await?;
    Ok(())
}
