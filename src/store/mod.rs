//! Structured local store
//!
//! Durable, queryable storage for cached characters, the comics cached for
//! each character, and search history, backed by a single SQLite file.

mod persistence;
mod records;
pub mod schema;

pub use persistence::{
    PersistenceManager, DATABASE_FILE_NAME, DEFAULT_FRESHNESS_SECS, SEARCH_HISTORY_LIMIT,
};
pub use records::{CachedCharacter, CachedComic, SearchHistoryEntry};
