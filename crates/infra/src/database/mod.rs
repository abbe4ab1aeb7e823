//! SQLite persistence for the check-in upload queue.

pub mod manager;
pub mod queue_store;

pub use manager::DbManager;
pub use queue_store::SqliteQueueStore;
