//! Sync conflict model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::status::TrackedField;

/// Which part of an artist's status two writers disagreed on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    Status,
    Order,
    /// Assignment of the artist to a show date
    Assignment,
}

impl From<TrackedField> for ConflictType {
    fn from(field: TrackedField) -> Self {
        match field {
            TrackedField::PerformanceStatus => Self::Status,
            TrackedField::PerformanceOrder => Self::Order,
            TrackedField::PerformanceDate => Self::Assignment,
        }
    }
}

/// How a resolved value was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    Timestamp,
    Version,
    Manual,
}

impl ResolutionStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timestamp => "timestamp",
            Self::Version => "version",
            Self::Manual => "manual",
        }
    }
}

/// One field-level disagreement found while merging two versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConflict {
    pub field: TrackedField,
    /// Value held by the cached record
    pub local_value: Value,
    /// Value carried by the competing write
    pub remote_value: Value,
    /// Value kept by the merge
    pub resolved_value: Value,
}

impl FieldConflict {
    /// Human-readable one-liner, e.g. for a stage manager notification.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{}: local {} vs remote {} -> kept {}",
            self.field.name(),
            self.local_value,
            self.remote_value,
            self.resolved_value
        )
    }
}

/// Audit entry for a detected conflict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub id: String,
    pub event_id: String,
    pub artist_id: String,
    pub conflict_type: ConflictType,
    pub local_value: Value,
    pub remote_value: Value,
    pub resolved_value: Value,
    pub strategy: ResolutionStrategy,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolving_user_id: Option<String>,
}

impl ConflictRecord {
    /// Record an automatically resolved field conflict.
    #[must_use]
    pub fn from_field(
        event_id: &str,
        artist_id: &str,
        conflict: &FieldConflict,
        strategy: ResolutionStrategy,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            event_id: event_id.to_string(),
            artist_id: artist_id.to_string(),
            conflict_type: conflict.field.into(),
            local_value: conflict.local_value.clone(),
            remote_value: conflict.remote_value.clone(),
            resolved_value: conflict.resolved_value.clone(),
            strategy,
            timestamp: Utc::now(),
            resolved: false,
            resolving_user_id: None,
        }
    }

    #[must_use]
    pub const fn tracked_field(&self) -> TrackedField {
        match self.conflict_type {
            ConflictType::Status => TrackedField::PerformanceStatus,
            ConflictType::Order => TrackedField::PerformanceOrder,
            ConflictType::Assignment => TrackedField::PerformanceDate,
        }
    }
}
