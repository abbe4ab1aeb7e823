//! # Moodlog Core
//!
//! Pure business logic layer - no infrastructure dependencies.
//!
//! This crate contains:
//! - The check-in upload queue engine
//! - Port/adapter interfaces (traits)
//!
//! ## Architecture Principles
//! - Only depends on `moodlog-domain`
//! - No database, HTTP, or platform code
//! - All external dependencies via traits

pub mod queue;

// Re-export specific items to avoid ambiguity
pub use queue::engine::UploadQueue;
pub use queue::ports::{NetworkMonitor, QueueStore, UploadTransport};
