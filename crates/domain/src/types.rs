//! Queue item types for the check-in upload pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Upload state of a queued check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Completed,
    Failed,
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Uploading => write!(f, "uploading"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid UploadStatus: {s}")),
        }
    }
}

/// A check-in captured by the app, as handed to the upload queue.
///
/// The queue engine fills in status and retry bookkeeping; callers only
/// supply the payload. `id` doubles as the idempotency key on the collector
/// side and must be unique for the lifetime of the item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckinRecord {
    pub id: String,
    pub session_id: String,
    /// Capture instant, epoch milliseconds.
    pub timestamp: i64,
    pub emotion_score: i32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Local reference to the recorded video; `None` means metadata-only.
    pub video_uri: Option<String>,
}

impl CheckinRecord {
    /// Create a record with a freshly generated unique id.
    pub fn new(session_id: impl Into<String>, timestamp: i64, emotion_score: i32) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            session_id: session_id.into(),
            timestamp,
            emotion_score,
            latitude: None,
            longitude: None,
            video_uri: None,
        }
    }

    /// Attach a capture location.
    #[must_use]
    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    /// Attach a recorded video.
    #[must_use]
    pub fn with_video(mut self, video_uri: impl Into<String>) -> Self {
        self.video_uri = Some(video_uri.into());
        self
    }
}

/// One unit of upload work tracked by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub session_id: String,
    pub timestamp: i64,
    pub emotion_score: i32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub video_uri: Option<String>,
    pub status: UploadStatus,
    pub retry_count: u32,
    pub error_message: Option<String>,
    /// Creation instant in epoch milliseconds; upload ordering key.
    pub created_at: i64,
    /// Do-not-attempt-before instant in epoch milliseconds; 0 = eligible now.
    pub next_retry_at: i64,
    /// Set exactly once, when the item reaches `Completed`.
    pub uploaded_at: Option<i64>,
}

impl QueueItem {
    /// Build a fresh queue item from a captured check-in.
    pub fn from_record(record: CheckinRecord, now_ms: i64) -> Self {
        Self {
            id: record.id,
            session_id: record.session_id,
            timestamp: record.timestamp,
            emotion_score: record.emotion_score,
            latitude: record.latitude,
            longitude: record.longitude,
            video_uri: record.video_uri,
            status: UploadStatus::Pending,
            retry_count: 0,
            error_message: None,
            created_at: now_ms,
            next_retry_at: 0,
            uploaded_at: None,
        }
    }

    /// Whether the item is eligible for an attempt at `now_ms`.
    pub fn ready_at(&self, now_ms: i64) -> bool {
        self.next_retry_at <= now_ms
    }

    /// Backoff delay for the attempt numbered `retry_count` (1-based).
    ///
    /// Exponential: `base * 2^(retry_count - 1)`. The exponent is capped to
    /// keep the multiplication from overflowing on pathological counts.
    pub fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(16);
        base.saturating_mul(2_u32.saturating_pow(exp))
    }
}

/// Per-status counts for the history screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: usize,
    pub uploading: usize,
    pub failed: usize,
}
