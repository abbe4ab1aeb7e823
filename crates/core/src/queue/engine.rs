//! Check-in upload queue engine.
//!
//! Owns the in-memory view of pending work, the retry/backoff state machine
//! and the single-flight processing loop. Persistence, connectivity and the
//! actual transfer calls are injected through the ports in
//! [`super::ports`].
//!
//! Every trigger (enqueue, connectivity restored, retry timer, explicit
//! `process_queue`) posts a unit signal into one channel; a single consumer
//! task drains the backlog and runs at most one processing pass at a time.
//! Within a pass, items are attempted serially in `created_at` order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use chrono::Utc;
use moodlog_domain::{
    CheckinRecord, MoodlogError, QueueConfig, QueueItem, QueueStats, Result, UploadStatus,
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::ports::{NetworkMonitor, QueueStore, UploadTransport};

/// Offline-resilient upload queue.
///
/// Construct once at process start, call [`UploadQueue::initialize`] during
/// startup and [`UploadQueue::shutdown`] on teardown. Cloning is cheap and
/// shares the same engine.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn QueueStore>,
    transport: Arc<dyn UploadTransport>,
    network: Arc<dyn NetworkMonitor>,
    config: QueueConfig,
    /// Authoritative snapshot for readers; keyed by item id.
    items: RwLock<HashMap<String, QueueItem>>,
    process_tx: mpsc::UnboundedSender<()>,
    /// Taken by `initialize`; `Some` only before the driver task exists.
    process_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
    /// Single-flight guard over processing passes.
    pass_active: AtomicBool,
    /// The one live retry timer, replaced on every retryable failure.
    retry_timer: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl UploadQueue {
    /// Create an engine over the given ports.
    ///
    /// # Errors
    ///
    /// Returns `MoodlogError::Config` if the queue configuration is invalid.
    pub fn new(
        store: Arc<dyn QueueStore>,
        transport: Arc<dyn UploadTransport>,
        network: Arc<dyn NetworkMonitor>,
        config: QueueConfig,
    ) -> Result<Self> {
        config.validate()?;

        let (process_tx, process_rx) = mpsc::unbounded_channel();

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                transport,
                network,
                config,
                items: RwLock::new(HashMap::new()),
                process_tx,
                process_rx: Mutex::new(Some(process_rx)),
                pass_active: AtomicBool::new(false),
                retry_timer: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        })
    }

    /// Load persisted work, recover interrupted uploads and start the
    /// background tasks.
    ///
    /// Items found in `uploading` state are forcibly reset to `pending`: an
    /// interrupted upload cannot be assumed to have had any effect, so it is
    /// retried from scratch with its `retry_count` unchanged. If the device
    /// is currently online a processing pass is triggered immediately.
    ///
    /// # Errors
    ///
    /// Returns `MoodlogError::Internal` when called twice, and propagates
    /// store failures from the initial load.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> Result<()> {
        let rx = self
            .inner
            .process_rx
            .lock()
            .take()
            .ok_or_else(|| MoodlogError::Internal("upload queue already initialized".into()))?;

        let active = self.inner.store.load_active().await?;
        let mut recovered = 0usize;

        {
            let mut items = self.inner.items.write();
            for item in &active {
                items.insert(item.id.clone(), item.clone());
            }
        }

        // Crash recovery happens outside the map lock; each reset is
        // persisted before the in-memory status flips.
        for item in active {
            if item.status == UploadStatus::Uploading {
                match self.inner.store.reset_to_pending(&item.id).await {
                    Ok(()) => {
                        recovered += 1;
                        if let Some(entry) = self.inner.items.write().get_mut(&item.id) {
                            entry.status = UploadStatus::Pending;
                            entry.next_retry_at = 0;
                        }
                    }
                    Err(e) => {
                        error!(item_id = %item.id, error = %e, "failed to recover interrupted upload");
                    }
                }
            }
        }

        let loaded = self.inner.items.read().len();
        info!(loaded, recovered, "upload queue initialized");

        let driver = Arc::clone(&self.inner);
        tokio::spawn(async move { driver.run_driver(rx).await });

        let listener = Arc::clone(&self.inner);
        let watch_rx = self.inner.network.subscribe();
        tokio::spawn(async move { listener.run_network_listener(watch_rx).await });

        if self.inner.network.is_connected() {
            self.inner.kick();
        }

        Ok(())
    }

    /// Stop background tasks and cancel the armed retry timer.
    ///
    /// Does not block on an in-flight upload; an attempt already running is
    /// allowed to finish so its status update still lands in the store.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(timer) = self.inner.retry_timer.lock().take() {
            timer.abort();
        }
        info!("upload queue shut down");
    }

    /// Persist a captured check-in and schedule it for upload.
    ///
    /// The item is added to the in-memory set only after the store insert
    /// succeeds; a persistence failure leaves no orphaned state. Kicks the
    /// processing loop and returns without waiting for the upload.
    ///
    /// # Errors
    ///
    /// Propagates the store failure when the item cannot be persisted.
    #[instrument(skip(self, record), fields(item_id = %record.id, session_id = %record.session_id))]
    pub async fn enqueue(&self, record: CheckinRecord) -> Result<QueueItem> {
        let item = QueueItem::from_record(record, now_ms());

        self.inner.store.insert(&item).await?;
        self.inner.items.write().insert(item.id.clone(), item.clone());

        debug!("check-in enqueued");
        self.inner.kick();

        Ok(item)
    }

    /// Remove an item from the queue.
    ///
    /// Memory is updated synchronously; the store delete is best-effort and
    /// runs in the background (a failure is logged, not surfaced, since the
    /// in-memory set is authoritative for the caller's next read).
    pub fn remove_from_queue(&self, id: &str) {
        self.inner.items.write().remove(id);

        let store = Arc::clone(&self.inner.store);
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.delete(&id).await {
                warn!(item_id = %id, error = %e, "best-effort queue delete failed");
            }
        });
    }

    /// Drop every queued item, memory and store. Full reset only.
    ///
    /// # Errors
    ///
    /// Propagates the store failure from the bulk delete.
    pub async fn clear_queue(&self) -> Result<()> {
        let count = {
            let mut items = self.inner.items.write();
            let count = items.len();
            items.clear();
            count
        };

        self.inner.store.delete_all().await?;
        info!(removed = count, "queue cleared");
        Ok(())
    }

    /// Put a terminally failed item back into circulation with a fresh retry
    /// budget, then kick processing.
    ///
    /// # Errors
    ///
    /// `NotFound` for unknown ids, `InvalidInput` when the item is not in
    /// `failed` state, and store failures from the reset.
    #[instrument(skip(self))]
    pub async fn retry_item(&self, id: &str) -> Result<()> {
        let status = self
            .inner
            .items
            .read()
            .get(id)
            .map(|item| item.status)
            .ok_or_else(|| MoodlogError::NotFound(format!("queue item {id}")))?;

        if status != UploadStatus::Failed {
            return Err(MoodlogError::InvalidInput(format!(
                "queue item {id} is {status}, only failed items can be retried"
            )));
        }

        self.inner.store.reset_for_retry(id).await?;

        if let Some(entry) = self.inner.items.write().get_mut(id) {
            entry.status = UploadStatus::Pending;
            entry.retry_count = 0;
            entry.error_message = None;
            entry.next_retry_at = 0;
        }

        info!(item_id = %id, "item reset for manual retry");
        self.inner.kick();
        Ok(())
    }

    /// Request a processing pass. Never blocks; a pass already in flight
    /// serves the request through its own page scan.
    pub fn process_queue(&self) {
        self.inner.kick();
    }

    /// Snapshot of all active items, oldest first.
    pub fn queue_items(&self) -> Vec<QueueItem> {
        let mut items: Vec<QueueItem> = self.inner.items.read().values().cloned().collect();
        items.sort_by_key(|item| item.created_at);
        items
    }

    /// Snapshot of a single item.
    pub fn queue_item(&self, id: &str) -> Option<QueueItem> {
        self.inner.items.read().get(id).cloned()
    }

    /// Number of items still waiting for their first or next attempt.
    pub fn pending_count(&self) -> usize {
        self.inner
            .items
            .read()
            .values()
            .filter(|item| item.status == UploadStatus::Pending)
            .count()
    }

    /// Per-status counts over the in-memory snapshot.
    pub fn stats(&self) -> QueueStats {
        let items = self.inner.items.read();
        let mut stats = QueueStats::default();
        for item in items.values() {
            match item.status {
                UploadStatus::Pending => stats.pending += 1,
                UploadStatus::Uploading => stats.uploading += 1,
                UploadStatus::Failed => stats.failed += 1,
                UploadStatus::Completed => {}
            }
        }
        stats
    }
}

impl Inner {
    /// Post a "process now" signal. Lossy by design: the driver coalesces
    /// bursts into a single pass.
    fn kick(&self) {
        let _ = self.process_tx.send(());
    }

    /// Single consumer of the work channel. Serializes passes; a trigger
    /// received mid-pass stays queued and produces one follow-up pass.
    async fn run_driver(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<()>) {
        debug!("queue driver started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                signal = rx.recv() => {
                    if signal.is_none() {
                        break;
                    }
                    // Coalesce the backlog accumulated since the last pass.
                    while rx.try_recv().is_ok() {}

                    if self
                        .pass_active
                        .compare_exchange(
                            false,
                            true,
                            AtomicOrdering::SeqCst,
                            AtomicOrdering::SeqCst,
                        )
                        .is_ok()
                    {
                        self.run_pass().await;
                        self.pass_active.store(false, AtomicOrdering::SeqCst);
                    }
                }
            }
        }
        debug!("queue driver stopped");
    }

    /// Re-trigger processing whenever connectivity comes back.
    async fn run_network_listener(self: Arc<Self>, mut rx: tokio::sync::watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let connected = *rx.borrow_and_update();
                    if connected {
                        info!("connectivity restored, triggering upload pass");
                        self.kick();
                    } else {
                        debug!("connectivity lost");
                    }
                }
            }
        }
    }

    /// One processing pass: page through ready work oldest-first and attempt
    /// each eligible item serially. Terminates when a page comes back empty,
    /// so continuous enqueue pressure cannot starve the driver.
    async fn run_pass(&self) {
        let now = now_ms();
        let mut offset = 0usize;
        debug!(now, "processing pass started");

        loop {
            let page = match self
                .store
                .fetch_batch(
                    &[UploadStatus::Pending, UploadStatus::Failed],
                    self.config.batch_size,
                    offset,
                )
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    warn!(error = %e, offset, "store page read failed, ending pass");
                    break;
                }
            };

            if page.is_empty() {
                break;
            }
            let page_len = page.len();
            let mut completed = 0usize;

            for item in page {
                if !item.ready_at(now) {
                    debug!(item_id = %item.id, next_retry_at = item.next_retry_at, "not yet eligible, skipping");
                    continue;
                }
                // A row absent from memory was removed by the caller; its
                // store delete is still in flight. Do not resurrect it.
                {
                    let mut items = self.items.write();
                    match items.get_mut(&item.id) {
                        Some(entry) => *entry = item.clone(),
                        None => continue,
                    }
                }
                if self.attempt(item).await {
                    completed += 1;
                }
            }

            // Completed rows leave the pending|failed scan set, shifting
            // the rows behind them down. Advance only past the rows that
            // are still in the set, or the final pages go unvisited.
            offset += page_len - completed;
        }

        debug!("processing pass finished");
    }

    /// One attempt of the per-item state machine:
    /// `pending -> uploading -> completed | failed`.
    ///
    /// Returns `true` when the item completed and left the active set.
    async fn attempt(&self, mut item: QueueItem) -> bool {
        // Precondition, not an error: offline just defers the attempt.
        if !self.network.is_connected() {
            debug!(item_id = %item.id, "offline, deferring attempt");
            return false;
        }

        // Retry budget exhausted: terminal, no timer, operator action only.
        if item.retry_count >= self.config.max_retries {
            if item.status != UploadStatus::Failed {
                if let Err(e) = self
                    .store
                    .mark_failed(
                        &item.id,
                        item.retry_count,
                        item.error_message.as_deref(),
                        item.next_retry_at,
                    )
                    .await
                {
                    warn!(item_id = %item.id, error = %e, "failed to persist terminal state");
                    return false;
                }
                item.status = UploadStatus::Failed;
                self.sync_entry(&item);
            }
            return false;
        }

        // The uploading transition must be durable before any bytes move.
        if let Err(e) = self.store.mark_uploading(&item.id).await {
            warn!(item_id = %item.id, error = %e, "could not persist uploading state, deferring");
            return false;
        }
        item.status = UploadStatus::Uploading;
        self.sync_entry(&item);

        // Metadata and video are independent channels keyed by the same
        // session; start both before awaiting either.
        let outcome = match item.video_uri.clone() {
            Some(video_uri) => {
                let metadata = self.transport.upload_metadata(&item);
                let video = self.transport.upload_video(&item.session_id, &video_uri);
                let (meta_result, video_result) = tokio::join!(metadata, video);
                meta_result.and(video_result)
            }
            None => self.transport.upload_metadata(&item).await,
        };

        match outcome {
            Ok(()) => self.finish_success(item).await,
            Err(e) => {
                self.finish_failure(item, &e).await;
                false
            }
        }
    }

    async fn finish_success(&self, mut item: QueueItem) -> bool {
        let uploaded_at = now_ms();

        if let Err(e) = self.store.mark_completed(&item.id, uploaded_at).await {
            // The collector has the data and dedupes on the session key, so
            // the row goes back to pending and a timer-driven pass re-sends
            // it once the store recovers.
            warn!(item_id = %item.id, error = %e, "failed to persist completion, resetting to pending");
            match self.store.reset_to_pending(&item.id).await {
                Ok(()) => {
                    item.status = UploadStatus::Pending;
                    item.next_retry_at = 0;
                    self.sync_entry(&item);
                    self.arm_retry_timer(self.config.base_retry_delay());
                }
                Err(reset_err) => {
                    error!(
                        item_id = %item.id,
                        error = %reset_err,
                        "failed to reset after completion persist failure, startup recovery will reclaim it"
                    );
                }
            }
            return false;
        }

        self.items.write().remove(&item.id);
        info!(item_id = %item.id, session_id = %item.session_id, "check-in uploaded");
        true
    }

    async fn finish_failure(&self, mut item: QueueItem, error: &MoodlogError) {
        item.retry_count += 1;
        item.status = UploadStatus::Failed;
        item.error_message = Some(error.to_string());

        let retryable = item.retry_count < self.config.max_retries;
        if retryable {
            let delay = QueueItem::backoff_delay(self.config.base_retry_delay(), item.retry_count);
            item.next_retry_at = now_ms() + delay.as_millis() as i64;

            if let Err(e) = self
                .store
                .mark_failed(
                    &item.id,
                    item.retry_count,
                    item.error_message.as_deref(),
                    item.next_retry_at,
                )
                .await
            {
                warn!(item_id = %item.id, error = %e, "failed to persist retry state");
            }
            self.sync_entry(&item);

            warn!(
                item_id = %item.id,
                retry_count = item.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "upload failed, retry scheduled"
            );
            self.arm_retry_timer(delay);
        } else {
            if let Err(e) = self
                .store
                .mark_failed(
                    &item.id,
                    item.retry_count,
                    item.error_message.as_deref(),
                    item.next_retry_at,
                )
                .await
            {
                warn!(item_id = %item.id, error = %e, "failed to persist terminal state");
            }
            self.sync_entry(&item);

            error!(
                item_id = %item.id,
                retry_count = item.retry_count,
                error = %error,
                "upload failed terminally, operator action required"
            );
        }
    }

    /// Mirror an item's state into the in-memory map, but only while the
    /// entry still exists. An absent entry means the caller removed the item
    /// mid-attempt; writing it back would resurrect it.
    fn sync_entry(&self, item: &QueueItem) {
        if let Some(entry) = self.items.write().get_mut(&item.id) {
            *entry = item.clone();
        }
    }

    /// Arm the one-shot retry timer, replacing any previous one. Only one
    /// timer is live system-wide; the pass it triggers re-scans all eligible
    /// items anyway.
    fn arm_retry_timer(&self, delay: std::time::Duration) {
        let tx = self.process_tx.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    let _ = tx.send(());
                }
            }
        });

        if let Some(previous) = self.retry_timer.lock().replace(handle) {
            previous.abort();
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
