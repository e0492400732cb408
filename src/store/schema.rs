//! Versioned schema for the local store
//!
//! Migrations are listed in order and applied one transaction each. The
//! applied versions are recorded in `schema_migrations`, so running the
//! migrator again only applies what is missing.

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::info;

use crate::error::StoreError;

/// One schema step
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

/// Every migration, oldest first
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create characters, comics and search history",
        statements: &[
            r#"
            CREATE TABLE characters (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                thumbnail_path TEXT NOT NULL DEFAULT '',
                comics_available INTEGER NOT NULL DEFAULT 0,
                series_available INTEGER NOT NULL DEFAULT 0,
                stories_available INTEGER NOT NULL DEFAULT 0,
                events_available INTEGER NOT NULL DEFAULT 0,
                is_favorite INTEGER NOT NULL DEFAULT 0,
                last_updated INTEGER NOT NULL,
                cached_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE comics (
                row_id INTEGER PRIMARY KEY AUTOINCREMENT,
                id INTEGER NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                thumbnail_path TEXT NOT NULL DEFAULT '',
                character_id INTEGER NOT NULL,
                cached_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE search_history (
                query TEXT PRIMARY KEY,
                timestamp INTEGER NOT NULL,
                result_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        ],
    },
    Migration {
        version: 2,
        description: "track favorite time and index lookups",
        statements: &[
            "ALTER TABLE characters ADD COLUMN favorited_at INTEGER",
            "UPDATE characters SET favorited_at = last_updated WHERE is_favorite = 1",
            "CREATE INDEX idx_characters_name ON characters(name)",
            "CREATE INDEX idx_characters_cached_at ON characters(cached_at)",
            "CREATE INDEX idx_comics_character_id ON comics(character_id)",
            "CREATE INDEX idx_search_history_timestamp ON search_history(timestamp)",
        ],
    },
];

/// Newest schema version this build understands
pub fn latest_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

async fn ensure_migrations_table(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Highest applied version, 0 for a fresh database
pub async fn current_version(pool: &SqlitePool) -> Result<i64, StoreError> {
    ensure_migrations_table(pool).await?;
    let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

/// Applies every pending migration
pub async fn migrate(pool: &SqlitePool) -> Result<i64, StoreError> {
    migrate_to(pool, latest_version()).await
}

/// Applies pending migrations up to and including `target`
///
/// Returns the version the database is at afterwards. Fails without touching
/// anything if the database is already past the newest known version.
pub async fn migrate_to(pool: &SqlitePool, target: i64) -> Result<i64, StoreError> {
    let mut current = current_version(pool).await?;
    let supported = latest_version();
    if current > supported {
        return Err(StoreError::SchemaTooNew {
            found: current,
            supported,
        });
    }

    let start = current;
    for migration in MIGRATIONS
        .iter()
        .filter(|m| m.version > start && m.version <= target)
    {
        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|source| StoreError::Migration {
                    version: migration.version,
                    description: migration.description,
                    source,
                })?;
        }
        sqlx::query("INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)")
            .bind(migration.version)
            .bind(migration.description)
            .bind(Utc::now().timestamp_millis())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version = migration.version, description = migration.description, "Applied store migration");
        current = migration.version;
    }

    Ok(current)
}
