//! # Moodlog Infrastructure
//!
//! Infrastructure implementations of core domain ports.
//!
//! This crate contains:
//! - SQLite-backed queue persistence
//! - The reqwest collector client
//! - The connectivity handle fed by platform glue
//! - Configuration loading
//!
//! ## Architecture
//! - Implements traits defined in `moodlog-core`
//! - Depends on `moodlog-domain` and `moodlog-core`
//! - Contains all "impure" code (I/O, HTTP)

pub mod api;
pub mod config;
pub mod database;
pub mod network;

// Re-export commonly used items
pub use api::CollectorClient;
pub use database::{DbManager, SqliteQueueStore};
pub use network::ConnectivityHandle;
