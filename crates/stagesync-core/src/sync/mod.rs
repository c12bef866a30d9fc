//! Cache-sync orchestrator.
//!
//! [`StatusSyncService`] is the façade callers use: cache-first reads with a
//! store fallback, optimistic writes that are queued for durability and
//! fanned out over the real-time channel, cache warm-up and full resync.
//! One instance serves one event at a time and owns its background tasks;
//! [`StatusSyncService::destroy`] stops all of them.

mod conflict_log;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cache::{BatchOutcome, StatusCache};
use crate::channel::{ChannelEvent, RealtimeChannel, Transport};
use crate::config::SyncConfig;
use crate::conflict::Resolution;
use crate::metrics::{Metric, MetricsSnapshot, SyncMetrics};
use crate::models::{ConflictRecord, EnqueueRequest, Priority, StatusRecord, StatusUpdate};
use crate::queue::{DrainReport, QueuePersistence, RetryQueue};
use crate::state::ServiceState;
use crate::store::{DocumentStore, StoreAdapter};
use crate::{Error, Result};

pub use conflict_log::ConflictLog;

struct Session {
    event_id: String,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Everything the background listeners need, shared with the façade.
struct Core {
    cache: Arc<StatusCache>,
    store: StoreAdapter,
    queue: Arc<RetryQueue>,
    channel: Arc<RealtimeChannel>,
    conflicts: Arc<ConflictLog>,
    metrics: Arc<SyncMetrics>,
}

pub struct StatusSyncService {
    config: SyncConfig,
    core: Arc<Core>,
    state: watch::Sender<ServiceState>,
    session: Mutex<Option<Session>>,
}

impl StatusSyncService {
    pub fn new(
        config: SyncConfig,
        store: Arc<dyn DocumentStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self::assemble(config, store, transport, None)
    }

    /// Service whose retry queue survives restarts through `persistence`.
    pub fn with_queue_persistence(
        config: SyncConfig,
        store: Arc<dyn DocumentStore>,
        transport: Arc<dyn Transport>,
        persistence: Arc<dyn QueuePersistence>,
    ) -> Self {
        Self::assemble(config, store, transport, Some(persistence))
    }

    fn assemble(
        config: SyncConfig,
        store: Arc<dyn DocumentStore>,
        transport: Arc<dyn Transport>,
        persistence: Option<Arc<dyn QueuePersistence>>,
    ) -> Self {
        let metrics = Arc::new(SyncMetrics::default());
        let store = StoreAdapter::new(store, config.store_enabled, config.store_timeout);
        let queue = match persistence {
            Some(persistence) => RetryQueue::with_persistence(
                store.clone(),
                config.queue.clone(),
                Arc::clone(&metrics),
                persistence,
            ),
            None => RetryQueue::new(store.clone(), config.queue.clone(), Arc::clone(&metrics)),
        };
        let channel = RealtimeChannel::new(transport, config.channel.clone(), Arc::clone(&metrics));
        let (state, _) = watch::channel(ServiceState::Uninitialized);

        Self {
            config,
            core: Arc::new(Core {
                cache: Arc::new(StatusCache::new()),
                store,
                queue: Arc::new(queue),
                channel: Arc::new(channel),
                conflicts: Arc::new(ConflictLog::new()),
                metrics,
            }),
            state,
            session: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    pub fn cache(&self) -> &StatusCache {
        &self.core.cache
    }

    pub fn queue(&self) -> &RetryQueue {
        &self.core.queue
    }

    pub fn channel(&self) -> &RealtimeChannel {
        &self.core.channel
    }

    pub fn conflicts(&self) -> &ConflictLog {
        &self.core.conflicts
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Event the service is currently serving.
    pub async fn event_id(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|session| session.event_id.clone())
    }

    /// Connect the channel, start the drain loop and, unless disabled,
    /// warm the cache for `event_id`. Store or channel trouble does not fail
    /// initialization; the service starts degraded and recovers in the
    /// background.
    pub async fn initialize(&self, event_id: &str) -> Result<()> {
        let event_id = event_id.trim();
        if event_id.is_empty() {
            return Err(Error::InvalidRecord("eventId must not be empty".to_string()));
        }

        let mut session = self.session.lock().await;
        match self.state() {
            ServiceState::Destroyed => {
                return Err(Error::NotInitialized(ServiceState::Destroyed.to_string()));
            }
            ServiceState::Ready
                if session
                    .as_ref()
                    .is_some_and(|session| session.event_id == event_id) =>
            {
                return Ok(());
            }
            _ => {}
        }

        self.state.send_replace(ServiceState::Initializing);
        tracing::info!(event_id, "Initializing status sync");

        if let Some(previous) = session.take() {
            tracing::info!(
                from = %previous.event_id,
                to = event_id,
                "Switching event; dropping cached statuses"
            );
            stop_tasks(previous).await;
            self.core.cache.clear();
        }

        let cancel = CancellationToken::new();
        // Subscribe before anything can be published.
        let channel_events = self.core.channel.subscribe();
        let drain_reports = self.core.queue.subscribe_reports();
        let tasks = vec![
            tokio::spawn(Arc::clone(&self.core).listen_channel(
                event_id.to_string(),
                channel_events,
                cancel.clone(),
            )),
            tokio::spawn(Arc::clone(&self.core).listen_drains(drain_reports, cancel.clone())),
        ];

        self.core.channel.connect(event_id).await;
        self.core.queue.start();

        if self.config.warm_start {
            if let Err(error) = self.core.warmup(event_id, None).await {
                tracing::warn!(event_id, error = %error, "Cache warm-up failed; continuing cold");
            }
        }

        *session = Some(Session {
            event_id: event_id.to_string(),
            cancel,
            tasks,
        });
        self.state.send_replace(ServiceState::Ready);
        tracing::info!(event_id, cached = self.core.cache.len(), "Status sync ready");
        Ok(())
    }

    /// Cache-first read; on a miss the store is consulted and the cache
    /// filled. `None` when neither knows the artist.
    pub async fn get_artist_status(
        &self,
        artist_id: &str,
        event_id: &str,
    ) -> Result<Option<StatusRecord>> {
        self.ensure_ready()?;
        if let Some(record) = self
            .core
            .cache
            .get(artist_id)
            .filter(|record| record.event_id == event_id)
        {
            self.core.metrics.record(Metric::CacheHit);
            tracing::debug!(artist_id, "Cache hit");
            return Ok(Some(record));
        }

        self.core.metrics.record(Metric::CacheMiss);
        tracing::debug!(artist_id, event_id, "Cache miss; reading store");
        let Some(record) = self.core.store.read_status(event_id, artist_id).await? else {
            return Ok(None);
        };
        // The cache holds one record per artist; one from another event stays put.
        let held_for_other_event = self
            .core
            .cache
            .get(artist_id)
            .is_some_and(|cached| cached.event_id != event_id);
        if held_for_other_event {
            return Ok(Some(record));
        }
        self.core.cache.fill(record.clone())?;
        Ok(Some(
            self.core
                .cache
                .get(artist_id)
                .filter(|cached| cached.event_id == event_id)
                .unwrap_or(record),
        ))
    }

    /// Optimistic write: the cache changes immediately, durability and
    /// fan-out follow in the background. Store trouble never fails this call.
    pub async fn update_artist_status(
        &self,
        artist_id: &str,
        event_id: &str,
        update: StatusUpdate,
    ) -> Result<Resolution> {
        self.ensure_ready()?;
        let update = if update.event_id.is_some() {
            update
        } else {
            update.with_event(event_id)
        };

        let before = self.core.cache.get(artist_id);
        let resolution = match self.core.cache.update(artist_id, &update) {
            Ok(resolution) => resolution,
            Err(error) => {
                self.core.metrics.record(Metric::UpdateFailed);
                tracing::warn!(artist_id, event_id, error = %error, "Status update rejected");
                return Err(error);
            }
        };
        self.core.metrics.record(Metric::UpdateSucceeded);

        if before.as_ref() == Some(&resolution.record) {
            return Ok(resolution);
        }
        self.core.after_local_write(&resolution).await;
        Ok(resolution)
    }

    /// Apply several updates in order; each entry succeeds or fails alone.
    pub async fn batch_update_statuses(
        &self,
        event_id: &str,
        updates: Vec<(String, StatusUpdate)>,
    ) -> Result<Vec<BatchOutcome>> {
        self.ensure_ready()?;
        let mut outcomes = Vec::with_capacity(updates.len());
        for (artist_id, update) in updates {
            let result = self.update_artist_status(&artist_id, event_id, update).await;
            outcomes.push(BatchOutcome { artist_id, result });
        }
        Ok(outcomes)
    }

    /// Populate the cache from the store without overwriting newer entries.
    /// Returns how many records were filled.
    pub async fn warmup_cache(&self, event_id: &str, date: Option<NaiveDate>) -> Result<usize> {
        self.core.warmup(event_id, date).await
    }

    /// Throw away the cache and rebuild it from the store.
    pub async fn full_sync_from_storage(
        &self,
        event_id: &str,
        date: Option<NaiveDate>,
    ) -> Result<usize> {
        self.ensure_ready()?;
        tracing::info!(event_id, ?date, "Full resync from storage");
        self.core.cache.clear();
        self.core.warmup(event_id, date).await
    }

    /// Publish the cached snapshot of an event to every connected client.
    pub fn broadcast_snapshot(&self, event_id: &str) -> bool {
        let records = self.core.cache.entries_for_event(event_id, None);
        self.core.channel.broadcast_snapshot(event_id, records)
    }

    pub fn subscribe_conflicts(&self) -> broadcast::Receiver<ConflictRecord> {
        self.core.conflicts.subscribe()
    }

    pub fn unresolved_conflicts(&self, event_id: Option<&str>) -> Vec<ConflictRecord> {
        self.core.conflicts.unresolved(event_id)
    }

    /// Settle a logged conflict with an operator-chosen value. The value is
    /// force-written at a new version even if a higher version is cached.
    pub async fn resolve_conflict_manually(
        &self,
        conflict_id: &str,
        value: Value,
        user_id: &str,
    ) -> Result<Resolution> {
        self.ensure_ready()?;
        let conflict = self
            .core
            .conflicts
            .get(conflict_id)
            .ok_or_else(|| Error::UnknownConflict(conflict_id.to_string()))?;
        let update = StatusUpdate::for_field(conflict.tracked_field(), &value)?
            .with_event(conflict.event_id.clone());

        let resolution = self.core.cache.force(&conflict.artist_id, &update)?;
        self.core.conflicts.mark_resolved(conflict_id, value, user_id)?;
        tracing::info!(
            conflict_id,
            artist_id = %conflict.artist_id,
            user_id,
            version = resolution.record.version,
            "Conflict resolved manually"
        );
        self.core.after_local_write(&resolution).await;
        Ok(resolution)
    }

    /// Forget conflicts older than `max_age`.
    pub fn cleanup_conflicts(&self, max_age: Duration) -> usize {
        self.core.conflicts.cleanup_older_than(max_age, Utc::now())
    }

    /// Flush the retry queue once and mark confirmed entries clean.
    pub async fn drain_now(&self) -> DrainReport {
        let report = self.core.queue.drain_now().await;
        self.core.mark_confirmed(&report).await;
        report
    }

    /// Stop every background loop and disconnect. Safe to call repeatedly.
    pub async fn destroy(&self) {
        let mut session = self.session.lock().await;
        if self.state() == ServiceState::Destroyed {
            return;
        }
        self.state.send_replace(ServiceState::Destroyed);

        if let Some(session) = session.take() {
            stop_tasks(session).await;
        }
        self.core.queue.stop().await;
        self.core.channel.disconnect().await;

        let pending = self.core.queue.len().await;
        if pending > 0 {
            tracing::warn!(pending, "Destroyed with durable writes still queued");
        }
        tracing::info!("Status sync destroyed");
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            ServiceState::Ready => Ok(()),
            state => Err(Error::NotInitialized(state.to_string())),
        }
    }
}

async fn stop_tasks(session: Session) {
    session.cancel.cancel();
    for task in session.tasks {
        if let Err(error) = task.await {
            tracing::warn!(error = %error, "Sync listener ended abnormally");
        }
    }
}

impl Core {
    /// Conflict logging, queueing and fan-out for a record just changed
    /// locally.
    async fn after_local_write(&self, resolution: &Resolution) {
        let record = &resolution.record;
        if resolution.has_conflicts() {
            self.metrics
                .add(Metric::ConflictDetected, resolution.conflicts.len() as u64);
            self.conflicts
                .record(&record.event_id, &record.artist_id, resolution);
        }

        let priority = Priority::for_status(&record.performance_status);
        let queue_id = self
            .queue
            .enqueue(
                EnqueueRequest::new(
                    record.artist_id.clone(),
                    record.event_id.clone(),
                    record.as_update(),
                    priority,
                )
                .written_at(record.timestamp),
            )
            .await;
        tracing::debug!(
            artist_id = %record.artist_id,
            queue_id = %queue_id,
            version = record.version,
            "Queued durable write"
        );

        if self.channel.is_connected() {
            self.channel.broadcast_status(record);
        }
    }

    async fn warmup(&self, event_id: &str, date: Option<NaiveDate>) -> Result<usize> {
        let started = Instant::now();
        let records = self.store.list_statuses(event_id).await?;
        let mut filled = 0;
        for record in records {
            if date.is_some() && record.performance_date != date {
                continue;
            }
            match self.cache.fill(record) {
                Ok(true) => filled += 1,
                Ok(false) => {}
                Err(error) => tracing::warn!(error = %error, "Skipping invalid stored status"),
            }
        }
        self.metrics.record_sync_duration(started.elapsed());
        tracing::info!(event_id, filled, "Cache warm-up finished");
        Ok(filled)
    }

    fn apply_remote(&self, event_id: &str, record: StatusRecord) {
        if record.event_id != event_id {
            return;
        }
        let artist_id = record.artist_id.clone();
        match self.cache.apply_remote(record) {
            Ok(resolution) if resolution.has_conflicts() => {
                self.metrics
                    .add(Metric::ConflictDetected, resolution.conflicts.len() as u64);
                self.conflicts.record(event_id, &artist_id, &resolution);
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(artist_id = %artist_id, error = %error, "Ignoring invalid remote status");
            }
        }
    }

    async fn listen_channel(
        self: Arc<Self>,
        event_id: String,
        mut events: broadcast::Receiver<ChannelEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(ChannelEvent::StatusUpdate(record)) => self.apply_remote(&event_id, record),
                Ok(ChannelEvent::BulkSync(records)) => {
                    for mut record in records.into_iter().filter(|record| record.event_id == event_id) {
                        record.dirty = false;
                        if let Err(error) = self.cache.set(record) {
                            tracing::warn!(error = %error, "Ignoring invalid snapshot entry");
                        }
                    }
                }
                Ok(ChannelEvent::FallbackPoll) => self.refresh_from_store(&event_id).await,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Channel listener lagged; refreshing from store");
                    self.refresh_from_store(&event_id).await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Pull newer records from the store while the channel cannot deliver
    /// them.
    async fn refresh_from_store(&self, event_id: &str) {
        match self.store.list_statuses(event_id).await {
            Ok(records) => {
                let mut refreshed = 0_usize;
                for record in records {
                    if matches!(self.cache.fill(record), Ok(true)) {
                        refreshed += 1;
                    }
                }
                tracing::debug!(event_id, refreshed, "Fallback refresh finished");
            }
            Err(error) => {
                tracing::warn!(event_id, error = %error, "Fallback refresh failed");
            }
        }
    }

    async fn listen_drains(
        self: Arc<Self>,
        mut reports: broadcast::Receiver<DrainReport>,
        cancel: CancellationToken,
    ) {
        loop {
            let report = tokio::select! {
                () = cancel.cancelled() => break,
                report = reports.recv() => report,
            };
            match report {
                Ok(report) => self.mark_confirmed(&report).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Drain listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Clear the dirty bit of artists with nothing left in the queue.
    async fn mark_confirmed(&self, report: &DrainReport) {
        for (artist_id, _) in report.applied() {
            if !self.queue.has_pending_for(artist_id).await && self.cache.mark_clean(artist_id) {
                tracing::debug!(artist_id, "Status confirmed durable");
            }
        }
    }
}

impl Drop for StatusSyncService {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.cancel.cancel();
        }
    }
}
