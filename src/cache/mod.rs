//! Key-value cache for serialized API payloads
//!
//! This module provides a two-tier cache manager: a cost-bounded in-memory
//! tier in front of a directory of blob files with expiration sidecars. It is
//! independent of the domain model and stores anything `serde` can encode.

mod keys;
mod lock;
mod manager;
mod memory;

pub use keys::{sanitize_key, METADATA_EXTENSION};
pub use manager::{
    CacheManager, CacheMetadata, CacheSettings, CACHE_DIR_NAME, DEFAULT_MEMORY_BUDGET, DEFAULT_TTL_SECS,
};
