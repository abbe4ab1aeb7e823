//! Port interfaces for the upload queue

use async_trait::async_trait;
use moodlog_domain::{QueueItem, Result, UploadStatus};
use tokio::sync::watch;

/// Durable persistence for queue items.
///
/// Every mutation must be crash-safe: the engine considers a state
/// transition final only once the corresponding store call has returned.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a freshly enqueued item.
    async fn insert(&self, item: &QueueItem) -> Result<()>;

    /// Transition an item to `uploading`.
    async fn mark_uploading(&self, id: &str) -> Result<()>;

    /// Transition an item to `completed`, stamping `uploaded_at`.
    async fn mark_completed(&self, id: &str, uploaded_at: i64) -> Result<()>;

    /// Record a failed attempt with its retry bookkeeping.
    async fn mark_failed(
        &self,
        id: &str,
        retry_count: u32,
        error: Option<&str>,
        next_retry_at: i64,
    ) -> Result<()>;

    /// Crash recovery: force an interrupted `uploading` item back to
    /// `pending`, leaving `retry_count` untouched.
    async fn reset_to_pending(&self, id: &str) -> Result<()>;

    /// Operator retry: back to `pending` with `retry_count` zeroed and the
    /// failure fields cleared.
    async fn reset_for_retry(&self, id: &str) -> Result<()>;

    /// Page through items in the given statuses, oldest `created_at` first.
    async fn fetch_batch(
        &self,
        statuses: &[UploadStatus],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<QueueItem>>;

    /// All non-terminal items (`pending`, `failed`, leftover `uploading`).
    async fn load_active(&self) -> Result<Vec<QueueItem>>;

    /// Delete a single item.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Delete every item.
    async fn delete_all(&self) -> Result<()>;
}

/// Connectivity signal source.
pub trait NetworkMonitor: Send + Sync {
    /// One-shot poll of the current state.
    fn is_connected(&self) -> bool;

    /// Change notifications; the receiver yields the new state.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Remote transfer calls for one check-in.
///
/// Both calls are idempotent per `session_id`, so re-invoking them on retry
/// is safe.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Send the session metadata half of a submission.
    async fn upload_metadata(&self, item: &QueueItem) -> Result<()>;

    /// Send the video half of a submission.
    async fn upload_video(&self, session_id: &str, video_uri: &str) -> Result<()>;
}
