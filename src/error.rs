//! Error types for the local store, configuration and the application

use thiserror::Error;

use crate::data::MarvelError;

/// Errors surfaced by the structured local store and the favorites ledger
///
/// Read paths absorb these and report a miss; write paths return them so a
/// failed save is never silent.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The database rejected a query or transaction
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The database was written by a newer schema than this build knows
    #[error("Database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    /// A migration statement failed
    #[error("Migration {version} ({description}) failed: {source}")]
    Migration {
        version: i64,
        description: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Filesystem access failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The background task running a write did not finish
    #[error("Write task failed: {0}")]
    TaskFailed(String),
}

/// Errors building the runtime configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No home directory to derive default paths from
    #[error("Could not determine a home directory; pass --cache-dir and --db-path")]
    NoProjectDirs,

    /// A numeric option is out of range
    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Errors reported by the command-line application
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Marvel(#[from] MarvelError),

    /// Offline and nothing cached for the request
    #[error("No cached data for {0} (offline)")]
    NotCached(String),
}
