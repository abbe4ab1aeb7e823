//! In-memory port implementations for exercising the engine without
//! SQLite or a real network stack.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use moodlog_core::{NetworkMonitor, QueueStore, UploadTransport};
use moodlog_domain::{MoodlogError, QueueItem, Result, UploadStatus};
use tokio::sync::watch;

/// Install a fmt subscriber when `RUST_LOG` is set, so failing tests can be
/// re-run with engine logs visible.
pub fn init_tracing() {
    if std::env::var_os("RUST_LOG").is_some() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// `QueueStore` backed by a mutex-guarded vector.
#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<QueueItem>>,
    fail_inserts: AtomicBool,
    completion_failures: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent `insert` fail, simulating a broken store.
    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    /// Fail the next `n` `mark_completed` calls.
    pub fn fail_completions(&self, n: usize) {
        self.completion_failures.store(n, Ordering::SeqCst);
    }

    /// Seed a row directly, bypassing the engine.
    pub fn seed(&self, item: QueueItem) {
        self.rows.lock().unwrap().push(item);
    }

    /// Durable view of one row.
    pub fn row(&self, id: &str) -> Option<QueueItem> {
        self.rows.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn update<F>(&self, id: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut QueueItem),
    {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| MoodlogError::NotFound(format!("queue item {id}")))?;
        apply(row);
        Ok(())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn insert(&self, item: &QueueItem) -> Result<()> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(MoodlogError::Database("insert rejected by test".into()));
        }
        self.rows.lock().unwrap().push(item.clone());
        Ok(())
    }

    async fn mark_uploading(&self, id: &str) -> Result<()> {
        self.update(id, |row| row.status = UploadStatus::Uploading)
    }

    async fn mark_completed(&self, id: &str, uploaded_at: i64) -> Result<()> {
        if self
            .completion_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(MoodlogError::Database("completion rejected by test".into()));
        }
        self.update(id, |row| {
            row.status = UploadStatus::Completed;
            row.uploaded_at = Some(uploaded_at);
        })
    }

    async fn mark_failed(
        &self,
        id: &str,
        retry_count: u32,
        error: Option<&str>,
        next_retry_at: i64,
    ) -> Result<()> {
        self.update(id, |row| {
            row.status = UploadStatus::Failed;
            row.retry_count = retry_count;
            row.error_message = error.map(str::to_string);
            row.next_retry_at = next_retry_at;
        })
    }

    async fn reset_to_pending(&self, id: &str) -> Result<()> {
        self.update(id, |row| {
            row.status = UploadStatus::Pending;
            row.next_retry_at = 0;
        })
    }

    async fn reset_for_retry(&self, id: &str) -> Result<()> {
        self.update(id, |row| {
            row.status = UploadStatus::Pending;
            row.retry_count = 0;
            row.error_message = None;
            row.next_retry_at = 0;
        })
    }

    async fn fetch_batch(
        &self,
        statuses: &[UploadStatus],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<QueueItem>> {
        let mut rows: Vec<QueueItem> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn load_active(&self) -> Result<Vec<QueueItem>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status != UploadStatus::Completed)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.rows.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        self.rows.lock().unwrap().clear();
        Ok(())
    }
}

/// Watch-channel connectivity stub; tests flip the state.
pub struct StubNetwork {
    tx: watch::Sender<bool>,
}

impl StubNetwork {
    pub fn new(connected: bool) -> Arc<Self> {
        let (tx, _rx) = watch::channel(connected);
        Arc::new(Self { tx })
    }

    pub fn set_connected(&self, connected: bool) {
        let _ = self.tx.send(connected);
    }
}

impl NetworkMonitor for StubNetwork {
    fn is_connected(&self) -> bool {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

/// Scriptable transfer stub.
///
/// Fails the first `metadata_failures` / `video_failures` calls of each kind,
/// then succeeds. Optionally sleeps inside each call so tests can observe the
/// engine mid-attempt.
#[derive(Default)]
pub struct ScriptedTransport {
    metadata_calls: AtomicUsize,
    video_calls: AtomicUsize,
    metadata_failures: AtomicUsize,
    video_failures: AtomicUsize,
    call_delay_ms: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next `n` metadata uploads.
    pub fn fail_metadata(&self, n: usize) {
        self.metadata_failures.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` video uploads.
    pub fn fail_video(&self, n: usize) {
        self.video_failures.store(n, Ordering::SeqCst);
    }

    /// Sleep this long inside every transfer call.
    pub fn set_call_delay(&self, delay: Duration) {
        self.call_delay_ms.store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn video_calls(&self) -> usize {
        self.video_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        let ms = self.call_delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms as u64)).await;
        }
    }

    fn consume_failure(budget: &AtomicUsize) -> bool {
        budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    async fn upload_metadata(&self, _item: &QueueItem) -> Result<()> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if Self::consume_failure(&self.metadata_failures) {
            return Err(MoodlogError::Network("metadata upload refused by test".into()));
        }
        Ok(())
    }

    async fn upload_video(&self, _session_id: &str, _video_uri: &str) -> Result<()> {
        self.video_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if Self::consume_failure(&self.video_failures) {
            return Err(MoodlogError::Network("video upload refused by test".into()));
        }
        Ok(())
    }
}
