//! Local status cache and its coordinator.
//!
//! Records live in a sharded concurrent map keyed by artist id. Every
//! mutation of one artist goes through that key's map entry, so writes to the
//! same artist are serialized while different artists proceed independently.
//! Nothing here performs I/O.

use chrono::NaiveDate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::conflict::{self, Resolution};
use crate::models::{ResolutionStrategy, StatusRecord, StatusUpdate};
use crate::util::timestamp_after;
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct StatusCache {
    entries: DashMap<String, StatusRecord>,
}

/// Per-entry outcome of [`StatusCache::batch_update`]
#[derive(Debug)]
pub struct BatchOutcome {
    pub artist_id: String,
    pub result: Result<Resolution>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, artist_id: &str) -> Option<StatusRecord> {
        self.entries.get(artist_id).map(|entry| entry.value().clone())
    }

    /// Validate and overwrite unconditionally.
    pub fn set(&self, record: StatusRecord) -> Result<()> {
        record.validate()?;
        tracing::debug!(
            artist_id = %record.artist_id,
            version = record.version,
            "Cache set"
        );
        self.entries.insert(record.artist_id.clone(), record);
        Ok(())
    }

    /// Apply a local partial update.
    ///
    /// Creates the record at version 1 when the artist is not cached yet.
    /// Updates that change no tracked field return the cached record
    /// untouched, without a version bump.
    pub fn update(&self, artist_id: &str, update: &StatusUpdate) -> Result<Resolution> {
        let artist_id = normalize_artist_id(artist_id)?;

        match self.entries.entry(artist_id.to_string()) {
            Entry::Vacant(slot) => {
                let record = StatusRecord::from_update(artist_id, update)?;
                tracing::debug!(artist_id, "Cache created record from update");
                slot.insert(record.clone());
                Ok(Resolution::unchanged(record))
            }
            Entry::Occupied(mut slot) => {
                let resolution = {
                    let existing = slot.get();
                    if !existing.is_significant(update) {
                        tracing::trace!(artist_id, "Skipped insignificant update");
                        return Ok(Resolution::unchanged(existing.clone()));
                    }

                    let mut candidate = existing.merged_with(update);
                    candidate.version = existing.version + 1;
                    candidate.timestamp = timestamp_after(existing.timestamp);
                    candidate.dirty = true;
                    candidate.validate()?;
                    conflict::resolve(existing, &candidate)
                };
                tracing::debug!(
                    artist_id,
                    version = resolution.record.version,
                    "Cache updated record"
                );
                slot.insert(resolution.record.clone());
                Ok(resolution)
            }
        }
    }

    /// Apply each update in order; one failure does not stop the rest.
    pub fn batch_update(&self, updates: &[(String, StatusUpdate)]) -> Vec<BatchOutcome> {
        updates
            .iter()
            .map(|(artist_id, update)| BatchOutcome {
                artist_id: artist_id.clone(),
                result: self.update(artist_id, update),
            })
            .collect()
    }

    /// Reconcile a full record written by another client.
    ///
    /// The conflict policy decides between the cached record and the incoming
    /// one; with nothing cached the incoming record is taken as-is. Incoming
    /// records land clean; a merged record stays dirty only while a local
    /// write is pending.
    pub fn apply_remote(&self, mut record: StatusRecord) -> Result<Resolution> {
        record.validate()?;
        record.dirty = false;

        match self.entries.entry(record.artist_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(Resolution::unchanged(record))
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get();
                let mut resolution = conflict::resolve(existing, &record);
                if resolution.strategy == ResolutionStrategy::Timestamp {
                    resolution.record.dirty = existing.dirty;
                }
                if resolution.record != *existing {
                    slot.insert(resolution.record.clone());
                }
                Ok(resolution)
            }
        }
    }

    /// Fill from the durable store unless the cached record is at least as
    /// new: a higher version, or the same version written no earlier.
    /// Returns whether the record was stored.
    pub fn fill(&self, mut record: StatusRecord) -> Result<bool> {
        record.validate()?;
        record.dirty = false;

        match self.entries.entry(record.artist_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(true)
            }
            Entry::Occupied(mut slot) => {
                let cached = slot.get();
                let newer = record.version > cached.version
                    || (record.version == cached.version && record.timestamp > cached.timestamp);
                if !newer {
                    return Ok(false);
                }
                slot.insert(record);
                Ok(true)
            }
        }
    }

    /// Operator override: the chosen values win even over a higher version.
    pub fn force(&self, artist_id: &str, chosen: &StatusUpdate) -> Result<Resolution> {
        let artist_id = normalize_artist_id(artist_id)?;

        match self.entries.entry(artist_id.to_string()) {
            Entry::Vacant(slot) => {
                let record = StatusRecord::from_update(artist_id, chosen)?;
                slot.insert(record.clone());
                Ok(Resolution {
                    record,
                    conflicts: Vec::new(),
                    strategy: ResolutionStrategy::Manual,
                })
            }
            Entry::Occupied(mut slot) => {
                let mut record = conflict::manual_override(slot.get(), chosen);
                record.timestamp = timestamp_after(slot.get().timestamp);
                record.validate()?;
                slot.insert(record.clone());
                Ok(Resolution {
                    record,
                    conflicts: Vec::new(),
                    strategy: ResolutionStrategy::Manual,
                })
            }
        }
    }

    pub fn mark_dirty(&self, artist_id: &str) -> bool {
        self.set_dirty(artist_id, true)
    }

    pub fn mark_clean(&self, artist_id: &str) -> bool {
        self.set_dirty(artist_id, false)
    }

    pub fn dirty_entries(&self) -> Vec<StatusRecord> {
        self.entries
            .iter()
            .filter(|entry| entry.dirty)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Cached records for one event, optionally limited to a show date,
    /// in running order.
    pub fn entries_for_event(&self, event_id: &str, date: Option<NaiveDate>) -> Vec<StatusRecord> {
        let mut records: Vec<StatusRecord> = self
            .entries
            .iter()
            .filter(|entry| entry.event_id == event_id)
            .filter(|entry| date.map_or(true, |date| entry.performance_date == Some(date)))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| {
            a.performance_order
                .unwrap_or(i32::MAX)
                .cmp(&b.performance_order.unwrap_or(i32::MAX))
                .then_with(|| a.artist_id.cmp(&b.artist_id))
        });
        records
    }

    pub fn evict(&self, artist_id: &str) -> Option<StatusRecord> {
        self.entries.remove(artist_id).map(|(_, record)| record)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn set_dirty(&self, artist_id: &str, dirty: bool) -> bool {
        self.entries.get_mut(artist_id).is_some_and(|mut entry| {
            entry.dirty = dirty;
            true
        })
    }
}

fn normalize_artist_id(artist_id: &str) -> Result<&str> {
    let artist_id = artist_id.trim();
    if artist_id.is_empty() {
        return Err(Error::InvalidRecord("artistId must not be empty".to_string()));
    }
    Ok(artist_id)
}
