//! # Moodlog Domain
//!
//! Business domain types and models for the Moodlog check-in uploader.
//!
//! This crate contains:
//! - Queue item and check-in record types
//! - Domain error types and Result definitions
//! - Configuration structures
//!
//! ## Architecture
//! - No dependencies on other Moodlog crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items
pub use config::*;
pub use errors::*;
pub use types::*;
