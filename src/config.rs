//! Runtime configuration
//!
//! Resolves the command-line options into explicit paths, cache tunables and
//! API credentials. Defaults come from the platform directories.

use chrono::Duration;
use directories::ProjectDirs;
use std::path::PathBuf;

use crate::cache::{CacheSettings, CACHE_DIR_NAME, DEFAULT_MEMORY_BUDGET, DEFAULT_TTL_SECS};
use crate::cli::Cli;
use crate::data::MarvelApiConfig;
use crate::error::ConfigError;
use crate::store::{DATABASE_FILE_NAME, DEFAULT_FRESHNESS_SECS};

/// Placeholder shipped in sample configurations instead of a real key
pub const PLACEHOLDER_PUBLIC_KEY: &str = "YOUR_PUBLIC_KEY_HERE";
pub const PLACEHOLDER_PRIVATE_KEY: &str = "YOUR_PRIVATE_KEY_HERE";

/// Longest accepted TTL or freshness window, about a century
pub const MAX_DURATION_SECS: i64 = 100 * 365 * 24 * 60 * 60;

/// Everything the application needs to open its stores
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub cache_dir: PathBuf,
    pub database_path: PathBuf,
    /// Standalone favorites file; favorites live in the store when unset
    pub favorites_file: Option<PathBuf>,
    pub default_ttl: Duration,
    pub memory_budget: usize,
    pub freshness_window: Duration,
    /// API credentials; `None` means offline
    pub marvel: Option<MarvelApiConfig>,
}

impl AppConfig {
    /// Configuration with default tunables and no API access
    pub fn with_paths(cache_dir: impl Into<PathBuf>, database_path: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            database_path: database_path.into(),
            favorites_file: None,
            default_ttl: Duration::seconds(DEFAULT_TTL_SECS),
            memory_budget: DEFAULT_MEMORY_BUDGET,
            freshness_window: Duration::seconds(DEFAULT_FRESHNESS_SECS),
            marvel: None,
        }
    }

    /// Builds the configuration from parsed CLI arguments
    ///
    /// Platform directories are only consulted for paths not given on the
    /// command line. `--offline` drops any API keys.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let project_dirs = || ProjectDirs::from("", "", "marvelcache").ok_or(ConfigError::NoProjectDirs);

        let cache_dir = match &cli.cache_dir {
            Some(dir) => dir.clone(),
            None => project_dirs()?.cache_dir().join(CACHE_DIR_NAME),
        };
        let database_path = match &cli.db_path {
            Some(path) => path.clone(),
            None => project_dirs()?.data_dir().join(DATABASE_FILE_NAME),
        };

        let mut config = Self::with_paths(cache_dir, database_path);
        config.favorites_file = cli.favorites_file.clone();

        if let Some(ttl) = cli.ttl {
            config.default_ttl = positive_seconds("--ttl", ttl)?;
        }
        if let Some(freshness) = cli.freshness {
            config.freshness_window = positive_seconds("--freshness", freshness)?;
        }
        if let Some(budget) = cli.memory_budget {
            config.memory_budget = budget;
        }

        if !cli.offline {
            config.marvel = api_config(cli.public_key.as_deref(), cli.private_key.as_deref());
        }

        Ok(config)
    }

    pub fn is_online(&self) -> bool {
        self.marvel.is_some()
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            default_ttl: self.default_ttl,
            memory_budget: self.memory_budget,
        }
    }
}

fn positive_seconds(name: &'static str, secs: i64) -> Result<Duration, ConfigError> {
    if secs <= 0 || secs > MAX_DURATION_SECS {
        return Err(ConfigError::InvalidValue {
            name,
            reason: format!("expected between 1 and {} seconds, got {}", MAX_DURATION_SECS, secs),
        });
    }
    Duration::try_seconds(secs).ok_or_else(|| ConfigError::InvalidValue {
        name,
        reason: format!("{} seconds is out of range", secs),
    })
}

/// API credentials, if both keys are present and not placeholders
pub fn api_config(public_key: Option<&str>, private_key: Option<&str>) -> Option<MarvelApiConfig> {
    let public_key = usable_key(public_key, PLACEHOLDER_PUBLIC_KEY)?;
    let private_key = usable_key(private_key, PLACEHOLDER_PRIVATE_KEY)?;
    Some(MarvelApiConfig::new(public_key, private_key))
}

fn usable_key<'a>(key: Option<&'a str>, placeholder: &str) -> Option<&'a str> {
    key.map(str::trim).filter(|k| !k.is_empty() && *k != placeholder)
}
