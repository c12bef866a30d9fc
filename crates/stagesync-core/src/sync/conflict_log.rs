//! Audit trail of detected conflicts.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::conflict::Resolution;
use crate::models::{ConflictRecord, ResolutionStrategy};
use crate::{Error, Result};

const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug)]
pub struct ConflictLog {
    records: DashMap<String, ConflictRecord>,
    notifications: broadcast::Sender<ConflictRecord>,
}

impl Default for ConflictLog {
    fn default() -> Self {
        let (notifications, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            records: DashMap::new(),
            notifications,
        }
    }
}

impl ConflictLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one entry per field conflict in `resolution` and notify
    /// subscribers.
    pub fn record(
        &self,
        event_id: &str,
        artist_id: &str,
        resolution: &Resolution,
    ) -> Vec<ConflictRecord> {
        resolution
            .conflicts
            .iter()
            .map(|conflict| {
                let record =
                    ConflictRecord::from_field(event_id, artist_id, conflict, resolution.strategy);
                tracing::warn!(
                    conflict_id = %record.id,
                    event_id,
                    artist_id,
                    conflict = %conflict.describe(),
                    "Conflict detected"
                );
                self.records.insert(record.id.clone(), record.clone());
                let _ = self.notifications.send(record.clone());
                record
            })
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConflictRecord> {
        self.notifications.subscribe()
    }

    pub fn get(&self, conflict_id: &str) -> Option<ConflictRecord> {
        self.records.get(conflict_id).map(|entry| entry.value().clone())
    }

    /// Conflicts awaiting review, oldest first.
    pub fn unresolved(&self, event_id: Option<&str>) -> Vec<ConflictRecord> {
        let mut records: Vec<ConflictRecord> = self
            .records
            .iter()
            .filter(|entry| !entry.resolved)
            .filter(|entry| event_id.map_or(true, |event_id| entry.event_id == event_id))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Close a conflict with an operator's choice.
    pub fn mark_resolved(
        &self,
        conflict_id: &str,
        resolved_value: Value,
        user_id: &str,
    ) -> Result<ConflictRecord> {
        let mut entry = self
            .records
            .get_mut(conflict_id)
            .ok_or_else(|| Error::UnknownConflict(conflict_id.to_string()))?;
        entry.resolved = true;
        entry.resolved_value = resolved_value;
        entry.strategy = ResolutionStrategy::Manual;
        entry.resolving_user_id = Some(user_id.to_string());
        Ok(entry.value().clone())
    }

    /// Drop conflicts older than `max_age` relative to `now`. Returns how
    /// many were removed.
    pub fn cleanup_older_than(&self, max_age: Duration, now: DateTime<Utc>) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = now - max_age;
        let before = self.records.len();
        self.records.retain(|_, record| record.timestamp >= cutoff);
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            tracing::info!(removed, "Cleaned up old conflict records");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
