//! Priority retry queue that carries optimistic cache writes to the durable
//! store.
//!
//! Entries drain high before normal before low, FIFO within a tier. A drain
//! cycle snapshots a ready batch under the lock, releases it for the store
//! round-trips, then re-locks to record the outcomes, so enqueue is never
//! stuck behind a slow store.

pub mod persistence;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::config::QueueConfig;
use crate::metrics::{Metric, SyncMetrics};
use crate::models::{EnqueueRequest, Priority, QueuedUpdate};
use crate::store::{status_path, StoreAdapter};
use crate::util::{compact_text, unix_millis_now};
use crate::Result;

pub use persistence::{FileQueuePersistence, MemoryQueuePersistence, QueuePersistence};

/// What happened to one entry during a drain cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Applied {
        queue_id: String,
        artist_id: String,
        event_id: String,
    },
    Retrying {
        queue_id: String,
        artist_id: String,
        attempt: u32,
        delay: Duration,
    },
    /// Max retries exceeded; the entry is gone for good.
    Dropped {
        queue_id: String,
        artist_id: String,
        attempts: u32,
        error: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub outcomes: Vec<DrainOutcome>,
}

impl DrainReport {
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// `(artist_id, event_id)` of every entry confirmed durable this cycle.
    pub fn applied(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            DrainOutcome::Applied {
                artist_id,
                event_id,
                ..
            } => Some((artist_id.as_str(), event_id.as_str())),
            _ => None,
        })
    }

    pub fn applied_count(&self) -> usize {
        self.applied().count()
    }

    pub fn retrying_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, DrainOutcome::Retrying { .. }))
            .count()
    }

    pub fn dropped_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, DrainOutcome::Dropped { .. }))
            .count()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
}

struct Shared {
    entries: Mutex<Vec<QueuedUpdate>>,
    /// Serializes drain cycles; enqueue only ever takes `entries`.
    draining: Mutex<()>,
    store: StoreAdapter,
    config: QueueConfig,
    backoff: Backoff,
    persistence: Option<Arc<dyn QueuePersistence>>,
    metrics: Arc<SyncMetrics>,
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    reports: broadcast::Sender<DrainReport>,
}

struct DrainWorker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct RetryQueue {
    shared: Arc<Shared>,
    worker: StdMutex<Option<DrainWorker>>,
}

impl RetryQueue {
    pub fn new(store: StoreAdapter, config: QueueConfig, metrics: Arc<SyncMetrics>) -> Self {
        Self::build(store, config, metrics, None, Vec::new())
    }

    /// Queue backed by `persistence`; entries saved by a previous run are
    /// restored in drain order.
    pub fn with_persistence(
        store: StoreAdapter,
        config: QueueConfig,
        metrics: Arc<SyncMetrics>,
        persistence: Arc<dyn QueuePersistence>,
    ) -> Self {
        let mut restored = match persistence.load_queue() {
            Ok(entries) => entries,
            Err(error) => {
                tracing::warn!(error = %error, "Failed to restore persisted retry queue");
                Vec::new()
            }
        };
        // Stable sort keeps FIFO order inside each tier.
        restored.sort_by_key(|entry| entry.priority);
        if !restored.is_empty() {
            tracing::info!(count = restored.len(), "Restored pending queue entries");
        }
        Self::build(store, config, metrics, Some(persistence), restored)
    }

    fn build(
        store: StoreAdapter,
        config: QueueConfig,
        metrics: Arc<SyncMetrics>,
        persistence: Option<Arc<dyn QueuePersistence>>,
        entries: Vec<QueuedUpdate>,
    ) -> Self {
        let (reports, _) = broadcast::channel(32);
        Self {
            shared: Arc::new(Shared {
                entries: Mutex::new(entries),
                draining: Mutex::new(()),
                store,
                backoff: config.backoff(),
                config,
                persistence,
                metrics,
                processed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                retried: AtomicU64::new(0),
                reports,
            }),
            worker: StdMutex::new(None),
        }
    }

    /// Queue a write and return its id.
    pub async fn enqueue(&self, request: EnqueueRequest) -> String {
        let entry = QueuedUpdate {
            id: Uuid::now_v7().to_string(),
            artist_id: request.artist_id,
            event_id: request.event_id,
            updates: request.updates,
            timestamp: request.written_at.unwrap_or_else(Utc::now),
            retry_count: 0,
            max_retries: request
                .max_retries
                .unwrap_or(self.shared.config.max_retries)
                .max(1),
            priority: request.priority,
            next_retry_at: None,
        };
        let id = entry.id.clone();

        let mut entries = self.shared.entries.lock().await;
        let position = entries
            .iter()
            .position(|queued| queued.priority > entry.priority)
            .unwrap_or(entries.len());
        tracing::debug!(
            queue_id = %id,
            artist_id = %entry.artist_id,
            priority = ?entry.priority,
            position,
            "Enqueued durable write"
        );
        entries.insert(position, entry);
        self.shared.persist(&entries).await;
        id
    }

    /// Make an entry immediately eligible again with a fresh retry budget,
    /// ahead of everything else in its tier.
    pub async fn retry(&self, id: &str) -> bool {
        let mut entries = self.shared.entries.lock().await;
        let Some(index) = entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        let mut entry = entries.remove(index);
        entry.retry_count = 0;
        entry.next_retry_at = None;
        let position = entries
            .iter()
            .position(|queued| queued.priority >= entry.priority)
            .unwrap_or(entries.len());
        entries.insert(position, entry);
        self.shared.persist(&entries).await;
        true
    }

    pub async fn remove(&self, id: &str) -> Option<QueuedUpdate> {
        let mut entries = self.shared.entries.lock().await;
        let index = entries.iter().position(|entry| entry.id == id)?;
        let removed = entries.remove(index);
        self.shared.persist(&entries).await;
        Some(removed)
    }

    pub async fn clear(&self) -> usize {
        let mut entries = self.shared.entries.lock().await;
        let count = entries.len();
        entries.clear();
        self.shared.persist(&entries).await;
        count
    }

    /// Entries in drain order.
    pub async fn pending(&self) -> Vec<QueuedUpdate> {
        self.shared.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.shared.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.shared.entries.lock().await.is_empty()
    }

    /// Whether any entry for this artist is still waiting.
    pub async fn has_pending_for(&self, artist_id: &str) -> bool {
        self.shared
            .entries
            .lock()
            .await
            .iter()
            .any(|entry| entry.artist_id == artist_id)
    }

    pub async fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.len().await,
            processed: self.shared.processed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            retried: self.shared.retried.load(Ordering::Relaxed),
        }
    }

    /// Reports of every drain cycle that touched at least one entry.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<DrainReport> {
        self.shared.reports.subscribe()
    }

    /// Run one drain cycle now.
    pub async fn drain_now(&self) -> DrainReport {
        self.shared.drain_at(unix_millis_now()).await
    }

    /// Run one drain cycle as if the clock read `now_ms`.
    pub async fn drain_at(&self, now_ms: i64) -> DrainReport {
        self.shared.drain_at(now_ms).await
    }

    /// Start the periodic drain loop. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(shared.config.drain_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        shared.drain_at(unix_millis_now()).await;
                    }
                }
            }
            tracing::debug!("Drain loop stopped");
        });
        tracing::info!(
            interval_ms = millis(self.shared.config.drain_interval),
            batch_size = self.shared.config.batch_size,
            "Drain loop started"
        );
        *worker = Some(DrainWorker { cancel, handle });
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the drain loop and wait for an in-flight cycle to finish.
    pub async fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
            if let Err(error) = worker.handle.await {
                tracing::warn!(error = %error, "Drain loop ended abnormally");
            }
        }
    }
}

impl Drop for RetryQueue {
    fn drop(&mut self) {
        let worker = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.cancel.cancel();
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Shared {
    async fn drain_at(&self, now_ms: i64) -> DrainReport {
        let _cycle = self.draining.lock().await;

        let batch: Vec<QueuedUpdate> = {
            let entries = self.entries.lock().await;
            entries
                .iter()
                .filter(|entry| entry.is_ready(now_ms))
                .take(self.config.batch_size)
                .cloned()
                .collect()
        };
        if batch.is_empty() {
            return DrainReport::default();
        }

        let mut results = Vec::with_capacity(batch.len());
        for entry in &batch {
            let result = self.apply(entry).await;
            results.push((entry, result));
        }

        let mut report = DrainReport::default();
        let mut entries = self.entries.lock().await;
        for (attempted, result) in results {
            // The entry may have been removed or cleared while we were away.
            let Some(index) = entries.iter().position(|entry| entry.id == attempted.id) else {
                continue;
            };
            match result {
                Ok(()) => {
                    entries.remove(index);
                    self.processed.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record(Metric::QueueDrained);
                    tracing::debug!(
                        queue_id = %attempted.id,
                        artist_id = %attempted.artist_id,
                        "Durable write applied"
                    );
                    report.outcomes.push(DrainOutcome::Applied {
                        queue_id: attempted.id.clone(),
                        artist_id: attempted.artist_id.clone(),
                        event_id: attempted.event_id.clone(),
                    });
                }
                Err(error) => {
                    let entry = &mut entries[index];
                    entry.retry_count += 1;
                    if entry.is_exhausted() {
                        let attempts = entry.retry_count;
                        entries.remove(index);
                        self.failed.fetch_add(1, Ordering::Relaxed);
                        self.metrics.record(Metric::QueueFailed);
                        tracing::error!(
                            queue_id = %attempted.id,
                            artist_id = %attempted.artist_id,
                            event_id = %attempted.event_id,
                            attempts,
                            error = %error,
                            "Max retries exceeded; dropping durable write"
                        );
                        report.outcomes.push(DrainOutcome::Dropped {
                            queue_id: attempted.id.clone(),
                            artist_id: attempted.artist_id.clone(),
                            attempts,
                            error: compact_text(&error.to_string()),
                        });
                    } else {
                        let attempt = entry.retry_count;
                        let delay = self.backoff.delay(attempt);
                        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                        entry.next_retry_at = Some(now_ms.saturating_add(delay_ms));
                        self.retried.fetch_add(1, Ordering::Relaxed);
                        self.metrics.record(Metric::QueueRetried);
                        tracing::warn!(
                            queue_id = %attempted.id,
                            artist_id = %attempted.artist_id,
                            attempt,
                            delay_ms,
                            error = %error,
                            "Durable write failed; scheduled retry"
                        );
                        report.outcomes.push(DrainOutcome::Retrying {
                            queue_id: attempted.id.clone(),
                            artist_id: attempted.artist_id.clone(),
                            attempt,
                            delay,
                        });
                    }
                }
            }
        }
        self.persist(&entries).await;
        drop(entries);

        if !report.is_empty() {
            let _ = self.reports.send(report.clone());
        }
        report
    }

    /// Read-merge-write of one entry against the store document.
    async fn apply(&self, entry: &QueuedUpdate) -> Result<()> {
        let path = status_path(&entry.event_id, &entry.artist_id);
        let mut document = self
            .store
            .read_document(&path)
            .await?
            .unwrap_or_else(|| json!({}));
        let previous_version = document
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or(0);

        entry.updates.apply_to_document(&mut document)?;
        if let Value::Object(fields) = &mut document {
            fields.insert("artistId".to_string(), json!(entry.artist_id));
            fields.insert("eventId".to_string(), json!(entry.event_id));
            fields.insert("timestamp".to_string(), json!(entry.timestamp));
            fields.insert("version".to_string(), json!(previous_version + 1));
        }

        self.store.write_document(&path, document).await?;
        Ok(())
    }

    /// Save a snapshot on the blocking pool. Callers hold `entries`, so
    /// snapshots reach the backend in mutation order.
    async fn persist(&self, entries: &[QueuedUpdate]) {
        let Some(persistence) = self.persistence.clone() else {
            return;
        };
        let snapshot = entries.to_vec();
        match tokio::task::spawn_blocking(move || persistence.save_queue(&snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => tracing::warn!(error = %error, "Failed to persist retry queue"),
            Err(error) => tracing::warn!(error = %error, "Retry queue persistence task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::{PerformanceStatus, StatusUpdate};
    use crate::store::MemoryDocumentStore;

    fn config() -> QueueConfig {
        QueueConfig {
            drain_interval: Duration::from_millis(20),
            batch_size: 10,
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter: Duration::ZERO,
        }
    }

    fn queue_with(store: Arc<MemoryDocumentStore>, config: QueueConfig) -> RetryQueue {
        let adapter = StoreAdapter::new(store, true, Duration::from_secs(1));
        RetryQueue::new(adapter, config, Arc::new(SyncMetrics::default()))
    }

    fn request(artist: &str, status: PerformanceStatus) -> EnqueueRequest {
        let priority = Priority::for_status(&status);
        EnqueueRequest::new(artist, "event-1", StatusUpdate::status(status), priority)
    }

    #[tokio::test]
    async fn high_priority_drains_first() {
        let store = Arc::new(MemoryDocumentStore::new());
        let queue = queue_with(
            store.clone(),
            QueueConfig {
                batch_size: 1,
                ..config()
            },
        );

        queue.enqueue(request("low", PerformanceStatus::Neutral)).await;
        queue
            .enqueue(request("high", PerformanceStatus::CurrentlyOnStage))
            .await;
        queue
            .enqueue(request("normal", PerformanceStatus::Completed))
            .await;

        let order: Vec<String> = queue
            .pending()
            .await
            .into_iter()
            .map(|entry| entry.artist_id)
            .collect();
        assert_eq!(order, vec!["high", "normal", "low"]);

        let report = queue.drain_now().await;
        let applied: Vec<(&str, &str)> = report.applied().collect();
        assert_eq!(applied, vec![("high", "event-1")]);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn fifo_within_a_tier() {
        let store = Arc::new(MemoryDocumentStore::new());
        let queue = queue_with(store, config());
        let first = queue.enqueue(request("a", PerformanceStatus::Neutral)).await;
        let second = queue.enqueue(request("b", PerformanceStatus::Neutral)).await;

        let ids: Vec<String> = queue.pending().await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[tokio::test]
    async fn drain_merges_into_existing_document() {
        let store = Arc::new(MemoryDocumentStore::new());
        let path = status_path("event-1", "artist-1");
        store
            .insert(
                &path,
                json!({ "performanceOrder": 4, "notes": "keep me", "version": 2 }),
            )
            .await;
        let queue = queue_with(store.clone(), config());

        queue
            .enqueue(request("artist-1", PerformanceStatus::NextOnStage))
            .await;
        let report = queue.drain_now().await;
        assert_eq!(report.applied_count(), 1);

        let stored = store.get(&path).await.unwrap();
        assert_eq!(stored["performanceStatus"], "next_on_stage");
        assert_eq!(stored["performanceOrder"], 4);
        assert_eq!(stored["notes"], "keep me");
        assert_eq!(stored["version"], 3);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn drain_stamps_the_record_write_time() {
        let store = Arc::new(MemoryDocumentStore::new());
        let queue = queue_with(store.clone(), config());
        let written = Utc::now() - chrono::Duration::seconds(30);

        queue
            .enqueue(request("artist-1", PerformanceStatus::Completed).written_at(written))
            .await;
        assert_eq!(queue.pending().await[0].timestamp, written);
        queue.drain_now().await;

        let stored = store
            .get(&status_path("event-1", "artist-1"))
            .await
            .unwrap();
        let stamped: chrono::DateTime<Utc> =
            serde_json::from_value(stored["timestamp"].clone()).unwrap();
        assert_eq!(stamped, written);
    }

    #[tokio::test]
    async fn file_persistence_follows_every_mutation() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("queue.json");
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_available(false);
        let queue = RetryQueue::with_persistence(
            StoreAdapter::new(store, true, Duration::from_secs(1)),
            config(),
            Arc::new(SyncMetrics::default()),
            Arc::new(FileQueuePersistence::new(&file)),
        );

        let id = queue.enqueue(request("a", PerformanceStatus::Neutral)).await;
        queue
            .enqueue(request("b", PerformanceStatus::NextOnDeck))
            .await;
        let saved: Vec<QueuedUpdate> =
            serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].artist_id, "b");

        queue.drain_now().await;
        let saved: Vec<QueuedUpdate> =
            serde_json::from_str(&std::fs::read_to_string(&file).unwrap()).unwrap();
        assert!(saved.iter().all(|entry| entry.retry_count == 1));

        assert!(queue.remove(&id).await.is_some());
        assert_eq!(queue.clear().await, 1);
        assert!(!file.exists());
    }

    #[tokio::test]
    async fn failed_writes_are_attempted_exactly_max_retries_times() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_available(false);
        let metrics = Arc::new(SyncMetrics::default());
        let adapter = StoreAdapter::new(store.clone(), true, Duration::from_secs(1));
        let queue = RetryQueue::new(adapter, config(), metrics.clone());
        queue
            .enqueue(request("artist-1", PerformanceStatus::Completed))
            .await;

        let mut now = 1_000_000;
        let first = queue.drain_at(now).await;
        assert_eq!(first.retrying_count(), 1);
        let next = queue.pending().await[0].next_retry_at.unwrap();
        assert_eq!(next, now + 100);

        // Not yet due.
        assert!(queue.drain_at(now + 50).await.is_empty());

        now += 100;
        let second = queue.drain_at(now).await;
        assert_eq!(
            second.outcomes,
            vec![DrainOutcome::Retrying {
                queue_id: queue.pending().await[0].id.clone(),
                artist_id: "artist-1".to_string(),
                attempt: 2,
                delay: Duration::from_millis(200),
            }]
        );

        now += 200;
        let third = queue.drain_at(now).await;
        assert_eq!(third.dropped_count(), 1);
        assert!(queue.is_empty().await);
        assert!(queue.drain_at(now + 10_000).await.is_empty());

        assert_eq!(store.read_count(), 3);
        let stats = queue.stats().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(metrics.snapshot().queue_failed, 1);
    }

    #[tokio::test]
    async fn retry_resets_budget_and_jumps_the_tier() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_available(false);
        let queue = queue_with(store.clone(), config());
        let first = queue.enqueue(request("a", PerformanceStatus::Neutral)).await;
        let second = queue.enqueue(request("b", PerformanceStatus::Neutral)).await;
        queue.drain_at(0).await;

        assert!(queue.retry(&second).await);
        let pending = queue.pending().await;
        assert_eq!(pending[0].id, second);
        assert_eq!(pending[0].retry_count, 0);
        assert_eq!(pending[0].next_retry_at, None);
        assert_eq!(pending[1].id, first);
        assert!(!queue.retry("missing").await);
    }

    #[tokio::test]
    async fn only_ready_entries_are_drained_up_to_batch_size() {
        let store = Arc::new(MemoryDocumentStore::new());
        let queue = queue_with(
            store.clone(),
            QueueConfig {
                batch_size: 2,
                ..config()
            },
        );
        for artist in ["a", "b", "c"] {
            queue.enqueue(request(artist, PerformanceStatus::Neutral)).await;
        }

        assert_eq!(queue.drain_now().await.applied_count(), 2);
        assert_eq!(queue.drain_now().await.applied_count(), 1);
        assert_eq!(store.write_count(), 3);
    }

    #[tokio::test]
    async fn enqueue_is_not_blocked_by_a_slow_drain() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_latency(Duration::from_millis(150)).await;
        let queue = Arc::new(queue_with(store, config()));
        queue.enqueue(request("a", PerformanceStatus::Neutral)).await;

        let draining = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.drain_now().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let enqueue = queue.enqueue(request("b", PerformanceStatus::Neutral));
        tokio::time::timeout(Duration::from_millis(50), enqueue)
            .await
            .unwrap();

        let report = draining.await.unwrap();
        assert_eq!(report.applied_count(), 1);
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn persisted_entries_are_restored() {
        let store = Arc::new(MemoryDocumentStore::new());
        let persistence = Arc::new(MemoryQueuePersistence::new());
        let adapter = StoreAdapter::new(store, true, Duration::from_secs(1));

        let queue = RetryQueue::with_persistence(
            adapter.clone(),
            config(),
            Arc::new(SyncMetrics::default()),
            persistence.clone(),
        );
        queue.enqueue(request("a", PerformanceStatus::Neutral)).await;
        queue
            .enqueue(request("b", PerformanceStatus::NextOnDeck))
            .await;
        assert_eq!(persistence.snapshot().len(), 2);
        drop(queue);

        let restored = RetryQueue::with_persistence(
            adapter,
            config(),
            Arc::new(SyncMetrics::default()),
            persistence.clone(),
        );
        let artists: Vec<String> = restored
            .pending()
            .await
            .into_iter()
            .map(|entry| entry.artist_id)
            .collect();
        assert_eq!(artists, vec!["b", "a"]);

        restored.drain_now().await;
        assert!(persistence.snapshot().is_empty());
    }

    #[tokio::test]
    async fn background_loop_drains_and_reports() {
        let store = Arc::new(MemoryDocumentStore::new());
        let queue = queue_with(store.clone(), config());
        let mut reports = queue.subscribe_reports();

        queue.start();
        queue.start();
        assert!(queue.is_running());
        queue.enqueue(request("a", PerformanceStatus::Neutral)).await;

        let report = tokio::time::timeout(Duration::from_secs(2), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.applied_count(), 1);

        queue.stop().await;
        assert!(!queue.is_running());
        assert!(store.get(&status_path("event-1", "a")).await.is_some());
    }
}
