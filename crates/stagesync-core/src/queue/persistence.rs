//! Pluggable storage for pending queue entries, so writes accepted while the
//! durable store was down survive a restart.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::models::QueuedUpdate;
use crate::Result;

/// Implementations may block; the queue calls `save_queue` from the
/// blocking thread pool and `load_queue` once at construction.
pub trait QueuePersistence: Send + Sync {
    fn load_queue(&self) -> Result<Vec<QueuedUpdate>>;
    fn save_queue(&self, entries: &[QueuedUpdate]) -> Result<()>;
    fn clear_queue(&self) -> Result<()>;
}

/// Queue snapshot stored as one pretty-printed JSON array.
#[derive(Debug, Clone)]
pub struct FileQueuePersistence {
    path: PathBuf,
}

impl FileQueuePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl QueuePersistence for FileQueuePersistence {
    fn load_queue(&self) -> Result<Vec<QueuedUpdate>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn save_queue(&self, entries: &[QueuedUpdate]) -> Result<()> {
        if entries.is_empty() {
            return self.clear_queue();
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(entries)?;
        let staging = self.path.with_extension("tmp");
        std::fs::write(&staging, content)?;
        std::fs::rename(&staging, &self.path)?;
        Ok(())
    }

    fn clear_queue(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

/// Keeps the last saved snapshot in memory. Clones share the snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueuePersistence {
    entries: Arc<Mutex<Vec<QueuedUpdate>>>,
}

impl MemoryQueuePersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<QueuedUpdate> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

impl QueuePersistence for MemoryQueuePersistence {
    fn load_queue(&self) -> Result<Vec<QueuedUpdate>> {
        Ok(self.snapshot())
    }

    fn save_queue(&self, entries: &[QueuedUpdate]) -> Result<()> {
        if let Ok(mut saved) = self.entries.lock() {
            *saved = entries.to_vec();
        }
        Ok(())
    }

    fn clear_queue(&self) -> Result<()> {
        if let Ok(mut saved) = self.entries.lock() {
            saved.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::models::{PerformanceStatus, Priority, StatusUpdate};

    fn entry(id: &str) -> QueuedUpdate {
        QueuedUpdate {
            id: id.to_string(),
            artist_id: "artist-1".to_string(),
            event_id: "event-1".to_string(),
            updates: StatusUpdate::status(PerformanceStatus::NextOnDeck),
            timestamp: Utc::now(),
            retry_count: 1,
            max_retries: 3,
            priority: Priority::High,
            next_retry_at: Some(1_700_000_000_000),
        }
    }

    #[test]
    fn file_persistence_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FileQueuePersistence::new(dir.path().join("state/queue.json"));

        assert!(persistence.load_queue().unwrap().is_empty());
        let entries = vec![entry("q1"), entry("q2")];
        persistence.save_queue(&entries).unwrap();
        assert_eq!(persistence.load_queue().unwrap(), entries);
    }

    #[test]
    fn saving_empty_queue_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let persistence = FileQueuePersistence::new(dir.path().join("queue.json"));
        persistence.save_queue(&[entry("q1")]).unwrap();
        assert!(persistence.path().exists());

        persistence.save_queue(&[]).unwrap();
        assert!(!persistence.path().exists());
        persistence.clear_queue().unwrap();
    }

    #[test]
    fn memory_persistence_clones_share_state() {
        let persistence = MemoryQueuePersistence::new();
        let other = persistence.clone();
        persistence.save_queue(&[entry("q1")]).unwrap();
        assert_eq!(other.load_queue().unwrap().len(), 1);
        other.clear_queue().unwrap();
        assert!(persistence.snapshot().is_empty());
    }
}
