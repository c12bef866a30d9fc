//! Conflict resolution between competing versions of a status record.
//!
//! Everything here is a pure function of its inputs: no clock reads, no I/O.
//! Given the same `(existing, candidate)` pair the outcome is always the same.

use std::cmp::Ordering;

use serde::Serialize;

use crate::models::{FieldConflict, ResolutionStrategy, StatusRecord, StatusUpdate, TrackedField};

/// Outcome of resolving a write against the cached record
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub record: StatusRecord,
    pub conflicts: Vec<FieldConflict>,
    pub strategy: ResolutionStrategy,
}

impl Resolution {
    #[must_use]
    pub const fn unchanged(record: StatusRecord) -> Self {
        Self {
            record,
            conflicts: Vec::new(),
            strategy: ResolutionStrategy::Version,
        }
    }

    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    /// Conflict lines suitable for showing to a human.
    #[must_use]
    pub fn describe_conflicts(&self) -> Vec<String> {
        self.conflicts.iter().map(FieldConflict::describe).collect()
    }
}

/// Decide which version of a record survives.
///
/// * Stale candidate (version and timestamp both not newer): `existing` wins
///   untouched, strategy `version`.
/// * Direct successor (newer version, timestamp not older): the candidate is
///   taken as-is, strategy `version`. This is the normal local-write path.
/// * Anything else is a concurrent write: each differing tracked field goes
///   to whichever side has the later timestamp, every disagreement is
///   reported, and the merged version is `max(versions) + 1`, strategy
///   `timestamp`.
#[must_use]
pub fn resolve(existing: &StatusRecord, candidate: &StatusRecord) -> Resolution {
    let version_newer = candidate.version > existing.version;
    let time_order = candidate.timestamp.cmp(&existing.timestamp);

    if !version_newer && time_order != Ordering::Greater {
        return Resolution::unchanged(existing.clone());
    }

    if version_newer && time_order != Ordering::Less {
        return Resolution {
            record: candidate.clone(),
            conflicts: Vec::new(),
            strategy: ResolutionStrategy::Version,
        };
    }

    // Remaining cases have strictly different timestamps.
    let candidate_is_later = time_order == Ordering::Greater;
    let mut merged = existing.clone();
    let mut conflicts = Vec::new();

    for field in TrackedField::ALL {
        if !existing.field_differs(candidate, field) {
            continue;
        }
        if candidate_is_later {
            merged.take_field(field, candidate);
        }
        conflicts.push(FieldConflict {
            field,
            local_value: existing.field_value(field),
            remote_value: candidate.field_value(field),
            resolved_value: merged.field_value(field),
        });
    }

    merged.version = existing.version.max(candidate.version) + 1;
    merged.timestamp = existing.timestamp.max(candidate.timestamp);
    merged.dirty = true;

    Resolution {
        record: merged,
        conflicts,
        strategy: ResolutionStrategy::Timestamp,
    }
}

/// Explicit operator override: the chosen values win regardless of version,
/// and the result is stamped one version above whatever is cached.
#[must_use]
pub fn manual_override(existing: &StatusRecord, chosen: &StatusUpdate) -> StatusRecord {
    let mut record = existing.merged_with(chosen);
    record.version = existing.version + 1;
    record.dirty = true;
    record
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, NaiveDate, Utc};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::models::PerformanceStatus;

    fn base_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-05-01T20:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn record(version: u64, offset_ms: i64) -> StatusRecord {
        StatusRecord {
            artist_id: "artist-y".to_string(),
            event_id: "event-1".to_string(),
            performance_status: PerformanceStatus::NextOnDeck,
            performance_order: Some(2),
            performance_date: NaiveDate::from_ymd_opt(2026, 5, 1),
            timestamp: base_time() + Duration::milliseconds(offset_ms),
            version,
            dirty: false,
        }
    }

    #[test]
    fn stale_candidate_keeps_existing() {
        let existing = record(3, 0);
        let mut candidate = record(2, -500);
        candidate.performance_status = PerformanceStatus::Completed;

        let resolution = resolve(&existing, &candidate);
        assert_eq!(resolution.record, existing);
        assert!(resolution.conflicts.is_empty());
        assert_eq!(resolution.strategy, ResolutionStrategy::Version);
    }

    #[test]
    fn identical_version_and_time_is_not_a_conflict() {
        let existing = record(3, 0);
        let resolution = resolve(&existing, &existing.clone());
        assert_eq!(resolution, Resolution::unchanged(existing));
    }

    #[test]
    fn successor_is_taken_as_is() {
        let existing = record(3, 0);
        let mut candidate = record(4, 100);
        candidate.performance_status = PerformanceStatus::CurrentlyOnStage;
        candidate.dirty = true;

        let resolution = resolve(&existing, &candidate);
        assert_eq!(resolution.record, candidate);
        assert!(!resolution.has_conflicts());
        assert_eq!(resolution.strategy, ResolutionStrategy::Version);
    }

    #[test]
    fn concurrent_same_version_merges_per_field() {
        let mut existing = record(3, 0);
        existing.performance_status = PerformanceStatus::CurrentlyOnStage;
        let mut candidate = record(3, 1_000);
        candidate.performance_status = PerformanceStatus::CurrentlyOnStage;
        candidate.performance_order = Some(7);

        let resolution = resolve(&existing, &candidate);
        assert_eq!(
            resolution.record.performance_status,
            PerformanceStatus::CurrentlyOnStage
        );
        assert_eq!(resolution.record.performance_order, Some(7));
        assert_eq!(resolution.record.version, 4);
        assert_eq!(resolution.record.timestamp, candidate.timestamp);
        assert!(resolution.record.dirty);
        assert_eq!(resolution.strategy, ResolutionStrategy::Timestamp);
        assert_eq!(
            resolution.conflicts,
            vec![FieldConflict {
                field: TrackedField::PerformanceOrder,
                local_value: json!(2),
                remote_value: json!(7),
                resolved_value: json!(7),
            }]
        );
    }

    #[test]
    fn newer_version_with_older_timestamp_keeps_later_fields() {
        let mut existing = record(3, 1_000);
        existing.performance_status = PerformanceStatus::Completed;
        let mut candidate = record(5, 0);
        candidate.performance_status = PerformanceStatus::NextOnStage;
        candidate.performance_order = Some(9);

        let resolution = resolve(&existing, &candidate);
        assert_eq!(resolution.record.performance_status, PerformanceStatus::Completed);
        assert_eq!(resolution.record.performance_order, Some(2));
        assert_eq!(resolution.record.version, 6);
        assert_eq!(resolution.conflicts.len(), 2);
        assert!(resolution
            .conflicts
            .iter()
            .all(|conflict| conflict.resolved_value == conflict.local_value));
    }

    #[test]
    fn resolution_is_deterministic() {
        let existing = record(3, 0);
        let mut candidate = record(2, 50);
        candidate.performance_date = None;
        candidate.performance_order = None;

        let first = resolve(&existing, &candidate);
        let second = resolve(&existing, &candidate);
        assert_eq!(first, second);
        assert_eq!(
            first.describe_conflicts(),
            vec![
                "performanceOrder: local 2 vs remote null -> kept null".to_string(),
                "performanceDate: local \"2026-05-01\" vs remote null -> kept null".to_string(),
            ]
        );
    }

    #[test]
    fn manual_override_bumps_past_cached_version() {
        let existing = record(8, 0);
        let record = manual_override(
            &existing,
            &StatusUpdate::status(PerformanceStatus::Neutral).with_order(None),
        );
        assert_eq!(record.version, 9);
        assert_eq!(record.performance_status, PerformanceStatus::Neutral);
        assert_eq!(record.performance_order, None);
        assert!(record.dirty);
    }
}
