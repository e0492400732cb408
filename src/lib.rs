//! Marvel Cache Library
//!
//! Local caching and persistence for the Marvel comics catalog: a two-tier
//! key-value cache, a structured SQLite store, a favorites ledger, and a
//! coordinator that reads through both.

pub mod app;
pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod data;
pub mod error;
pub mod favorites;
pub mod lifecycle;
pub mod store;
