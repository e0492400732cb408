//! Command-line interface parsing for the Marvel cache
//!
//! This module handles parsing of CLI arguments using clap: global options
//! for paths, API keys and cache tuning, plus one subcommand per cache
//! operation.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::favorites::FavoritesSort;

/// Marvel Cache - offline cache for the Marvel comics catalog
#[derive(Parser, Debug)]
#[command(name = "marvelcache")]
#[command(about = "Offline cache and local store for the Marvel comics catalog")]
#[command(version)]
pub struct Cli {
    /// Directory for cached API payloads
    #[arg(long, global = true, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Path of the local SQLite store
    #[arg(long, global = true, value_name = "FILE")]
    pub db_path: Option<PathBuf>,

    /// Keep favorites in a standalone JSON file instead of the local store
    #[arg(long, global = true, value_name = "FILE")]
    pub favorites_file: Option<PathBuf>,

    /// Marvel API public key
    #[arg(long, global = true, env = "MARVEL_PUBLIC_KEY", hide_env_values = true)]
    pub public_key: Option<String>,

    /// Marvel API private key
    #[arg(long, global = true, env = "MARVEL_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Answer from the cache only, never calling the API
    #[arg(long, global = true)]
    pub offline: bool,

    /// Time-to-live for cached payloads, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub ttl: Option<i64>,

    /// How long stored characters count as fresh, in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub freshness: Option<i64>,

    /// Byte budget of the in-memory tier
    #[arg(long, global = true, value_name = "BYTES")]
    pub memory_budget: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Cache operations
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show what both cache tiers hold
    Stats,
    /// Delete every cached payload and stored row
    Clear,
    /// Delete expired payloads from disk
    Sweep,
    /// List characters, one page at a time
    Characters {
        #[arg(long, default_value_t = 0)]
        offset: u32,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show one character
    Character { id: i64 },
    /// List the comics a character appears in
    Comics {
        character_id: i64,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Search stored characters by name and record the query
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show recent searches
    History {
        /// Forget all recent searches
        #[arg(long)]
        clear: bool,
    },
    /// Manage favorite characters
    Favorites {
        #[command(subcommand)]
        action: FavoritesCommand,
    },
}

/// Favorites operations
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum FavoritesCommand {
    /// List favorites
    List {
        #[arg(long, value_enum, default_value_t = SortArg::Date)]
        sort: SortArg,
        /// Only show names containing this text
        #[arg(long)]
        filter: Option<String>,
    },
    /// Mark a character as favorite
    Add {
        id: i64,
        name: String,
        /// Full thumbnail URL
        #[arg(long, value_name = "URL")]
        thumbnail: Option<String>,
    },
    /// Unmark one or more characters
    Remove {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Print favorites as shareable text
    Export,
}

/// Sort order accepted on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortArg {
    Date,
    Name,
    Comics,
}

impl From<SortArg> for FavoritesSort {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Date => FavoritesSort::DateAdded,
            SortArg::Name => FavoritesSort::Name,
            SortArg::Comics => FavoritesSort::MostComics,
        }
    }
}
