//! Counters and timers produced at the subsystem boundaries.
//!
//! Each increment is also emitted as a `tracing` event carrying a `metric`
//! field, so an external performance monitor can consume them from the log
//! stream; [`SyncMetrics::snapshot`] serves in-process consumers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    CacheHit,
    CacheMiss,
    UpdateSucceeded,
    UpdateFailed,
    ConflictDetected,
    QueueDrained,
    QueueRetried,
    QueueFailed,
    MessageSent,
    MessageReceived,
    MessageDropped,
}

impl Metric {
    pub const fn label(self) -> &'static str {
        match self {
            Self::CacheHit => "cache_hit",
            Self::CacheMiss => "cache_miss",
            Self::UpdateSucceeded => "update_success",
            Self::UpdateFailed => "update_failure",
            Self::ConflictDetected => "conflict_count",
            Self::QueueDrained => "queue_drained",
            Self::QueueRetried => "queue_retried",
            Self::QueueFailed => "queue_failed",
            Self::MessageSent => "message_sent",
            Self::MessageReceived => "message_received",
            Self::MessageDropped => "message_dropped",
        }
    }
}

#[derive(Debug, Default)]
pub struct SyncMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    updates_succeeded: AtomicU64,
    updates_failed: AtomicU64,
    conflicts: AtomicU64,
    queue_drained: AtomicU64,
    queue_retried: AtomicU64,
    queue_failed: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    messages_dropped: AtomicU64,
    last_sync_duration_ms: AtomicU64,
    last_latency_ms: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub updates_succeeded: u64,
    pub updates_failed: u64,
    pub conflicts: u64,
    pub queue_drained: u64,
    pub queue_retried: u64,
    pub queue_failed: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub messages_dropped: u64,
    pub last_sync_duration_ms: u64,
    pub last_latency_ms: u64,
}

impl MetricsSnapshot {
    /// Fraction of reads served from cache, if any reads happened.
    #[allow(clippy::cast_precision_loss)]
    pub fn cache_hit_ratio(&self) -> Option<f64> {
        let total = self.cache_hits + self.cache_misses;
        (total > 0).then(|| self.cache_hits as f64 / total as f64)
    }
}

impl SyncMetrics {
    pub fn record(&self, metric: Metric) {
        self.add(metric, 1);
    }

    pub fn add(&self, metric: Metric, count: u64) {
        if count == 0 {
            return;
        }
        self.counter(metric).fetch_add(count, Ordering::Relaxed);
        tracing::trace!(metric = metric.label(), count, "metric");
    }

    /// Timer for warm-up and full resync runs.
    pub fn record_sync_duration(&self, duration: Duration) {
        let millis = duration_millis(duration);
        self.last_sync_duration_ms.store(millis, Ordering::Relaxed);
        tracing::debug!(metric = "sync_duration", duration_ms = millis, "metric");
    }

    /// Round-trip time of the last answered heartbeat.
    pub fn record_latency(&self, latency: Duration) {
        let millis = duration_millis(latency);
        self.last_latency_ms.store(millis, Ordering::Relaxed);
        tracing::trace!(metric = "channel_latency", latency_ms = millis, "metric");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            updates_succeeded: self.updates_succeeded.load(Ordering::Relaxed),
            updates_failed: self.updates_failed.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            queue_drained: self.queue_drained.load(Ordering::Relaxed),
            queue_retried: self.queue_retried.load(Ordering::Relaxed),
            queue_failed: self.queue_failed.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            last_sync_duration_ms: self.last_sync_duration_ms.load(Ordering::Relaxed),
            last_latency_ms: self.last_latency_ms.load(Ordering::Relaxed),
        }
    }

    const fn counter(&self, metric: Metric) -> &AtomicU64 {
        match metric {
            Metric::CacheHit => &self.cache_hits,
            Metric::CacheMiss => &self.cache_misses,
            Metric::UpdateSucceeded => &self.updates_succeeded,
            Metric::UpdateFailed => &self.updates_failed,
            Metric::ConflictDetected => &self.conflicts,
            Metric::QueueDrained => &self.queue_drained,
            Metric::QueueRetried => &self.queue_retried,
            Metric::QueueFailed => &self.queue_failed,
            Metric::MessageSent => &self.messages_sent,
            Metric::MessageReceived => &self.messages_received,
            Metric::MessageDropped => &self.messages_dropped,
        }
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_recorded_counters() {
        let metrics = SyncMetrics::default();
        metrics.record(Metric::CacheHit);
        metrics.record(Metric::CacheHit);
        metrics.record(Metric::CacheMiss);
        metrics.add(Metric::ConflictDetected, 3);
        metrics.record_sync_duration(Duration::from_millis(42));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 2);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.conflicts, 3);
        assert_eq!(snapshot.last_sync_duration_ms, 42);
    }

    #[test]
    fn hit_ratio_is_none_without_reads() {
        assert_eq!(MetricsSnapshot::default().cache_hit_ratio(), None);

        let snapshot = MetricsSnapshot {
            cache_hits: 3,
            cache_misses: 1,
            ..MetricsSnapshot::default()
        };
        assert_eq!(snapshot.cache_hit_ratio(), Some(0.75));
    }
}
