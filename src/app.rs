//! Application wiring for the Marvel cache CLI
//!
//! This module opens both cache tiers from an [`AppConfig`], connects the
//! favorites ledger and the optional API client, and runs one [`Command`]
//! against them, rendering the result as text.

use chrono::Duration;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::CacheManager;
use crate::cli::{Command, FavoritesCommand};
use crate::clock::{system_clock, SharedClock};
use crate::config::AppConfig;
use crate::coordinator::{CacheCoordinator, CacheStats, CharacterComics, CharacterRecord, CharactersPage, Source};
use crate::data::{Character, Comic, MarvelClient, MarvelError, MarvelService};
use crate::error::AppError;
use crate::favorites::{export_favorites, filter_by_name, Favorite, FavoriteCharacterInput, FavoritesLedger};
use crate::lifecycle::{LifecycleEvent, MaintenanceConfig, MaintenanceHandle, MaintenanceReport};
use crate::store::PersistenceManager;

/// Main application struct owning the stores and the API client
pub struct App {
    coordinator: CacheCoordinator,
    favorites: FavoritesLedger,
    /// Marvel API client, absent when offline
    service: Option<Arc<dyn MarvelService>>,
}

impl App {
    /// Opens the stores described by `config`
    pub async fn open(config: &AppConfig) -> Result<Self, AppError> {
        let service = config
            .marvel
            .clone()
            .map(|api| Arc::new(MarvelClient::new(api)) as Arc<dyn MarvelService>);
        Self::with_service(config, service, system_clock()).await
    }

    /// Opens the stores with an explicit API client and time source (for testing)
    pub async fn with_service(
        config: &AppConfig,
        service: Option<Arc<dyn MarvelService>>,
        clock: SharedClock,
    ) -> Result<Self, AppError> {
        let blobs = CacheManager::with_settings(config.cache_dir.clone(), config.cache_settings(), Arc::clone(&clock));
        let records =
            PersistenceManager::open_with_window(&config.database_path, Arc::clone(&clock), config.freshness_window)
                .await?;

        let favorites = match &config.favorites_file {
            Some(path) => FavoritesLedger::with_id_set(path, Arc::clone(&clock))
                .await
                .enrich_from(records.clone()),
            None => FavoritesLedger::with_store(records.clone(), Arc::clone(&clock)),
        };

        info!(online = service.is_some(), cache_dir = %config.cache_dir.display(), "Opened Marvel cache");
        Ok(Self {
            coordinator: CacheCoordinator::new(blobs, records),
            favorites,
            service,
        })
    }

    pub fn coordinator(&self) -> &CacheCoordinator {
        &self.coordinator
    }

    pub fn favorites(&self) -> &FavoritesLedger {
        &self.favorites
    }

    pub fn is_online(&self) -> bool {
        self.service.is_some()
    }

    /// Runs `command` and returns what should be printed
    pub async fn run(&self, command: &Command) -> Result<String, AppError> {
        match command {
            Command::Stats => Ok(render_stats(&self.coordinator.stats().await)),
            Command::Clear => {
                self.coordinator.clear_all().await?;
                Ok("Cleared all cached data".to_string())
            }
            Command::Sweep => self.sweep().await,
            Command::Characters { offset, limit } => self.characters(*offset, *limit).await,
            Command::Character { id } => self.character(*id).await,
            Command::Comics { character_id, limit } => self.comics(*character_id, *limit).await,
            Command::Search { query, limit } => self.search(query, *limit).await,
            Command::History { clear } => self.history(*clear).await,
            Command::Favorites { action } => self.run_favorites(action).await,
        }
    }

    async fn sweep(&self) -> Result<String, AppError> {
        let config = MaintenanceConfig {
            periodic_sweep: false,
            ..Default::default()
        };
        let mut handle = MaintenanceHandle::spawn(self.coordinator.blobs().clone(), config);
        handle.notify(LifecycleEvent::EnteredBackground).await;
        let report = handle.reports.recv().await;
        handle.shutdown().await;

        match report {
            Some(MaintenanceReport::Swept { removed, .. }) => Ok(format!("Removed {} expired entries", removed)),
            _ => Ok("Sweep did not complete".to_string()),
        }
    }

    async fn characters(&self, offset: u32, limit: u32) -> Result<String, AppError> {
        let page = CharactersPage::new(offset, limit);
        let fetched = match &self.service {
            Some(service) => served(
                "characters",
                self.coordinator
                    .get_or_fetch_with_source(&page, || service.fetch_characters(offset, limit))
                    .await,
            ),
            None => None,
        };
        let (characters, source) = match fetched {
            Some(hit) => hit,
            None => match self.coordinator.cached(&page).await {
                Some(characters) => (characters, Source::Cache),
                None => {
                    // Fall back to whatever fresh rows the store holds
                    let stored = self.coordinator.records().load_characters(offset, limit).await;
                    if stored.is_empty() {
                        return Err(AppError::NotCached(format!("characters offset={} limit={}", offset, limit)));
                    }
                    (stored, Source::Cache)
                }
            },
        };

        let mut out = format!(
            "Characters {}-{} ({})\n",
            offset,
            offset.saturating_add(limit),
            source_label(source)
        );
        for character in &characters {
            let _ = writeln!(out, "{}", character_line(character));
        }
        Ok(out.trim_end().to_string())
    }

    async fn character(&self, id: i64) -> Result<String, AppError> {
        let resource = CharacterRecord { id };
        let fetched = match &self.service {
            Some(service) => served(
                "character",
                self.coordinator
                    .get_or_fetch_with_source(&resource, || service.fetch_character(id))
                    .await,
            ),
            None => None,
        };
        let (character, source) = match fetched {
            Some(hit) => hit,
            None => {
                // A stale row beats nothing
                let character = match self.coordinator.cached(&resource).await {
                    Some(character) => Some(character),
                    None => self.coordinator.records().load_character(id).await,
                };
                (character.ok_or_else(|| AppError::NotCached(format!("character {}", id)))?, Source::Cache)
            }
        };

        let favorite = self.favorites.is_favorite(id).await;
        Ok(render_character(&character, favorite, source))
    }

    async fn comics(&self, character_id: i64, limit: u32) -> Result<String, AppError> {
        let resource = CharacterComics { character_id };
        let fetched = match &self.service {
            Some(service) => served(
                "comics",
                self.coordinator
                    .get_or_fetch_with_source(&resource, || service.fetch_character_comics(character_id, 0, limit))
                    .await,
            ),
            None => None,
        };
        let (comics, source) = match fetched {
            Some(hit) => hit,
            None => {
                let comics = match self.coordinator.cached(&resource).await {
                    Some(comics) => comics,
                    None => self.coordinator.records().load_comics(character_id).await,
                };
                if comics.is_empty() {
                    return Err(AppError::NotCached(format!("comics for character {}", character_id)));
                }
                (comics, Source::Cache)
            }
        };

        let mut out = format!("Comics for character {} ({})\n", character_id, source_label(source));
        for comic in comics.iter().take(limit as usize) {
            let _ = writeln!(out, "{}", comic_line(comic));
        }
        Ok(out.trim_end().to_string())
    }

    async fn search(&self, query: &str, limit: u32) -> Result<String, AppError> {
        let records = self.coordinator.records();
        let results = records.search_characters(query, limit).await;
        records.save_search_history(query, results.len()).await?;
        debug!(query, results = results.len(), "Searched stored characters");

        if results.is_empty() {
            return Ok(format!("No stored characters match \"{}\"", query.trim()));
        }
        let mut out = format!("{} stored characters match \"{}\"\n", results.len(), query.trim());
        for character in &results {
            let _ = writeln!(out, "{}", character_line(character));
        }
        Ok(out.trim_end().to_string())
    }

    async fn history(&self, clear: bool) -> Result<String, AppError> {
        let records = self.coordinator.records();
        if clear {
            records.clear_search_history().await?;
            return Ok("Cleared search history".to_string());
        }

        let entries = records.load_search_history_entries().await;
        if entries.is_empty() {
            return Ok("No recent searches".to_string());
        }
        let mut out = String::from("Recent searches\n");
        for entry in &entries {
            let _ = writeln!(
                out,
                "{}  {} ({} results)",
                entry.searched_at().format("%Y-%m-%d %H:%M"),
                entry.query,
                entry.result_count
            );
        }
        Ok(out.trim_end().to_string())
    }

    async fn run_favorites(&self, action: &FavoritesCommand) -> Result<String, AppError> {
        match action {
            FavoritesCommand::List { sort, filter } => {
                let mut favorites = self.favorites.get_sorted_favorites((*sort).into()).await;
                if let Some(filter) = filter {
                    favorites = filter_by_name(favorites, filter);
                }
                Ok(render_favorites(&favorites))
            }
            FavoritesCommand::Add { id, name, thumbnail } => {
                let mut input = FavoriteCharacterInput::new(*id, name.clone());
                if let Some(url) = thumbnail {
                    input = input.with_thumbnail(url.clone());
                }
                self.favorites.add_favorite(&input).await?;
                Ok(format!("Added {} ({}) to favorites", name, id))
            }
            FavoritesCommand::Remove { ids } => {
                self.favorites.remove_favorites(ids).await?;
                Ok(format!("Removed {} from favorites", join_ids(ids)))
            }
            FavoritesCommand::Export => Ok(export_favorites(&self.favorites.get_all_favorites().await)),
        }
    }
}

/// Keeps a successful fetch; a failed one is logged so the caller can fall
/// back to stored data
fn served<T>(what: &'static str, result: Result<(T, Source), MarvelError>) -> Option<(T, Source)> {
    match result {
        Ok(hit) => Some(hit),
        Err(e) => {
            warn!(what, error = %e, "Fetch failed, falling back to stored data");
            None
        }
    }
}

fn source_label(source: Source) -> &'static str {
    match source {
        Source::Cache => "cached",
        Source::Remote => "fetched",
    }
}

fn character_line(character: &Character) -> String {
    format!("{:>8}  {} ({} comics)", character.id, character.name, character.comics.available)
}

fn comic_line(comic: &Comic) -> String {
    format!("{:>8}  {}", comic.id, comic.title)
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

/// Formats a duration as the largest whole unit, e.g. `3h 12m`
pub fn format_age(age: Duration) -> String {
    let secs = age.num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s if s < 86_400 => format!("{}h {}m", s / 3600, (s % 3600) / 60),
        s => format!("{}d {}h", s / 86_400, (s % 86_400) / 3600),
    }
}

/// Formats a byte count with a binary unit
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn render_stats(stats: &CacheStats) -> String {
    let age = stats.cache_age.map(format_age).unwrap_or_else(|| "empty".to_string());
    format!(
        "Disk cache:        {}\n\
         Memory cache:      {} entries, {}\n\
         Stored characters: {} (oldest {})\n\
         Favorites:         {}\n\
         Recent searches:   {}",
        format_bytes(stats.disk_bytes),
        stats.memory_entries,
        format_bytes(stats.memory_bytes as u64),
        stats.cached_characters,
        age,
        stats.favorites,
        stats.search_history
    )
}

fn render_character(character: &Character, favorite: bool, source: Source) -> String {
    let mut out = format!(
        "{}{} (#{}, {})\n",
        if favorite { "★ " } else { "" },
        character.name,
        character.id,
        source_label(source)
    );
    if !character.description.is_empty() {
        let _ = writeln!(out, "{}", character.description);
    }
    let _ = writeln!(
        out,
        "Comics: {}  Series: {}  Stories: {}  Events: {}",
        character.comics.available, character.series.available, character.stories.available, character.events.available
    );
    if let Some(url) = character.thumbnail.secure_url() {
        let _ = writeln!(out, "Thumbnail: {}", url);
    }
    out.trim_end().to_string()
}

fn render_favorites(favorites: &[Favorite]) -> String {
    if favorites.is_empty() {
        return "No favorites yet".to_string();
    }
    let mut out = format!("{} favorites\n", favorites.len());
    for favorite in favorites {
        let _ = writeln!(
            out,
            "{}  added {}",
            character_line(&favorite.character),
            favorite.added_at.format("%Y-%m-%d")
        );
    }
    out.trim_end().to_string()
}
