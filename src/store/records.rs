//! Row types for the local store and their conversions to the domain model

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::data::{Character, Comic, MarvelImage, ResourceList, DEFAULT_IMAGE_EXTENSION};

/// Converts a stored Unix-millisecond timestamp back into a date
pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or(DateTime::UNIX_EPOCH)
}

/// One row of the `characters` table
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CachedCharacter {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// Thumbnail path without extension
    pub thumbnail_path: String,
    pub comics_available: i64,
    pub series_available: i64,
    pub stories_available: i64,
    pub events_available: i64,
    pub is_favorite: bool,
    /// Unix milliseconds
    pub last_updated: i64,
    /// Unix milliseconds; drives freshness filtering
    pub cached_at: i64,
    /// Unix milliseconds, set while the row is a favorite
    pub favorited_at: Option<i64>,
}

impl CachedCharacter {
    /// Builds a row from an API character, stamped at `now`
    pub fn from_character(character: &Character, now: DateTime<Utc>) -> Self {
        let millis = now.timestamp_millis();
        Self {
            id: character.id,
            name: character.name.clone(),
            description: character.description.clone(),
            thumbnail_path: character.thumbnail.path.clone(),
            comics_available: i64::from(character.comics.available),
            series_available: i64::from(character.series.available),
            stories_available: i64::from(character.stories.available),
            events_available: i64::from(character.events.available),
            is_favorite: false,
            last_updated: millis,
            cached_at: millis,
            favorited_at: None,
        }
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        from_millis(self.cached_at)
    }

    pub fn favorited_at(&self) -> Option<DateTime<Utc>> {
        self.favorited_at.map(from_millis)
    }

    /// Rebuilds an API character
    ///
    /// The store keeps only counts for related resources, so the lists come
    /// back empty with `available` restored. Thumbnails use the `jpg` extension.
    pub fn into_character(self) -> Character {
        let mut character = Character::minimal(
            self.id,
            self.name,
            MarvelImage::new(self.thumbnail_path, DEFAULT_IMAGE_EXTENSION),
        );
        character.description = self.description;
        character.comics = ResourceList::with_available(count(self.comics_available));
        character.series = ResourceList::with_available(count(self.series_available));
        character.stories = ResourceList::with_available(count(self.stories_available));
        character.events = ResourceList::with_available(count(self.events_available));
        character
    }
}

fn count(value: i64) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

/// One row of the `comics` table
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CachedComic {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_path: String,
    /// Character this comic was cached for
    pub character_id: i64,
    pub cached_at: i64,
}

impl CachedComic {
    pub fn from_comic(comic: &Comic, character_id: i64, now: DateTime<Utc>) -> Self {
        Self {
            id: comic.id,
            title: comic.title.clone(),
            description: comic.description.clone(),
            thumbnail_path: comic.thumbnail.path.clone(),
            character_id,
            cached_at: now.timestamp_millis(),
        }
    }

    pub fn cached_at(&self) -> DateTime<Utc> {
        from_millis(self.cached_at)
    }

    pub fn into_comic(self) -> Comic {
        Comic {
            id: self.id,
            title: self.title,
            description: self.description,
            thumbnail: MarvelImage::new(self.thumbnail_path, DEFAULT_IMAGE_EXTENSION),
        }
    }
}

/// One row of the `search_history` table
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct SearchHistoryEntry {
    pub query: String,
    /// Unix milliseconds of the latest search
    pub timestamp: i64,
    pub result_count: i64,
}

impl SearchHistoryEntry {
    pub fn searched_at(&self) -> DateTime<Utc> {
        from_millis(self.timestamp)
    }
}
