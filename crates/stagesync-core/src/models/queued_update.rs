//! Pending durable write model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::{PerformanceStatus, StatusUpdate};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Drain priority of a queued write. Declaration order is drain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    /// Stage transitions must land first; a finished set can wait a little.
    #[must_use]
    pub const fn for_status(status: &PerformanceStatus) -> Self {
        if status.is_stage_transition() {
            Self::High
        } else if matches!(status, PerformanceStatus::Completed) {
            Self::Normal
        } else {
            Self::Low
        }
    }
}

/// A write waiting to be applied to the durable store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedUpdate {
    pub id: String,
    pub artist_id: String,
    pub event_id: String,
    pub updates: StatusUpdate,
    /// Write time stamped on the store document
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub priority: Priority,
    /// Unix ms; unset until the first failed attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<i64>,
}

impl QueuedUpdate {
    #[must_use]
    pub fn is_ready(&self, now_ms: i64) -> bool {
        self.next_retry_at.map_or(true, |at| at <= now_ms)
    }

    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Caller-side description of a write to enqueue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueRequest {
    pub artist_id: String,
    pub event_id: String,
    pub updates: StatusUpdate,
    pub priority: Priority,
    pub max_retries: Option<u32>,
    /// Write time of the record being persisted; defaults to enqueue time
    pub written_at: Option<DateTime<Utc>>,
}

impl EnqueueRequest {
    #[must_use]
    pub fn new(
        artist_id: impl Into<String>,
        event_id: impl Into<String>,
        updates: StatusUpdate,
        priority: Priority,
    ) -> Self {
        Self {
            artist_id: artist_id.into(),
            event_id: event_id.into(),
            updates,
            priority,
            max_retries: None,
            written_at: None,
        }
    }

    #[must_use]
    pub const fn written_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.written_at = Some(timestamp);
        self
    }
}
