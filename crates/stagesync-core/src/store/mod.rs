//! Durable document store boundary.
//!
//! The backing store is an opaque JSON blob store keyed by path. It may be
//! slow or unreachable; every call made through [`StoreAdapter`] is bounded
//! by a timeout and any failure means "unavailable", never "not found".

mod file;
mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::models::StatusRecord;

pub use file::FileDocumentStore;
pub use memory::MemoryDocumentStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unavailable(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed document at {path}: {message}")]
    Malformed { path: String, message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read_document(&self, path: &str) -> StoreResult<Option<Value>>;

    async fn write_document(&self, path: &str, document: Value) -> StoreResult<()>;

    /// Paths of all documents whose path starts with `prefix`.
    async fn list_documents(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

/// Path of an artist's status document.
pub fn status_path(event_id: &str, artist_id: &str) -> String {
    format!("events/{event_id}/artists/{artist_id}/status")
}

/// Prefix under which all status documents of an event live.
pub fn event_prefix(event_id: &str) -> String {
    format!("events/{event_id}/artists/")
}

/// Artist id encoded in a status document path.
pub fn artist_from_path(path: &str) -> Option<&str> {
    let rest = path.split_once("/artists/")?.1;
    let artist_id = rest.strip_suffix("/status")?;
    (!artist_id.is_empty() && !artist_id.contains('/')).then_some(artist_id)
}

/// Timeout-bounded access to a [`DocumentStore`].
///
/// With `enabled == false` the adapter never calls the store: reads find
/// nothing, lists are empty, and writes succeed locally. This is the
/// offline/preview capability, chosen at construction time.
#[derive(Clone)]
pub struct StoreAdapter {
    inner: Arc<dyn DocumentStore>,
    enabled: bool,
    timeout: Duration,
}

impl StoreAdapter {
    pub fn new(inner: Arc<dyn DocumentStore>, enabled: bool, timeout: Duration) -> Self {
        Self {
            inner,
            enabled,
            timeout,
        }
    }

    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn read_document(&self, path: &str) -> StoreResult<Option<Value>> {
        if !self.enabled {
            return Ok(None);
        }
        self.bounded(self.inner.read_document(path)).await
    }

    pub async fn write_document(&self, path: &str, document: Value) -> StoreResult<()> {
        if !self.enabled {
            tracing::debug!(path, "Store disabled; skipped write");
            return Ok(());
        }
        self.bounded(self.inner.write_document(path, document)).await
    }

    pub async fn list_documents(&self, prefix: &str) -> StoreResult<Vec<String>> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.bounded(self.inner.list_documents(prefix)).await
    }

    pub async fn read_status(
        &self,
        event_id: &str,
        artist_id: &str,
    ) -> StoreResult<Option<StatusRecord>> {
        let path = status_path(event_id, artist_id);
        let Some(document) = self.read_document(&path).await? else {
            return Ok(None);
        };
        StatusRecord::from_document(artist_id, event_id, document)
            .map(Some)
            .map_err(|error| StoreError::Malformed {
                path,
                message: error.to_string(),
            })
    }

    /// All parseable status records stored for an event. Malformed documents
    /// are logged and skipped so one bad entry cannot block a warm-up.
    pub async fn list_statuses(&self, event_id: &str) -> StoreResult<Vec<StatusRecord>> {
        let paths = self.list_documents(&event_prefix(event_id)).await?;
        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(artist_id) = artist_from_path(&path) else {
                continue;
            };
            match self.read_status(event_id, artist_id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(StoreError::Malformed { path, message }) => {
                    tracing::warn!(path, error = %message, "Skipping malformed status document");
                }
                Err(error) => return Err(error),
            }
        }
        Ok(records)
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn artist_is_parsed_from_status_path() {
        let path = status_path("event-1", "artist-9");
        assert_eq!(artist_from_path(&path), Some("artist-9"));
        assert_eq!(artist_from_path("events/e/artists/a/notes"), None);
        assert_eq!(artist_from_path("events/e/artists//status"), None);
    }

    #[tokio::test]
    async fn disabled_adapter_never_touches_store() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .insert(&status_path("e", "a"), json!({ "performanceStatus": "neutral" }))
            .await;
        let adapter = StoreAdapter::new(store.clone(), false, Duration::from_secs(1));

        assert!(adapter.read_status("e", "a").await.unwrap().is_none());
        adapter
            .write_document("events/e/artists/b/status", json!({}))
            .await
            .unwrap();
        assert!(adapter.list_documents("events/").await.unwrap().is_empty());
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn slow_store_calls_time_out() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.set_latency(Duration::from_millis(200)).await;
        let adapter = StoreAdapter::new(store, true, Duration::from_millis(20));

        let err = adapter.read_document("anything").await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(_)));
    }

    #[tokio::test]
    async fn list_statuses_skips_malformed_documents() {
        let store = Arc::new(MemoryDocumentStore::new());
        store
            .insert(
                &status_path("e", "good"),
                json!({ "performanceStatus": "completed", "version": 2 }),
            )
            .await;
        store
            .insert(&status_path("e", "bad"), json!({ "version": "two" }))
            .await;
        let adapter = StoreAdapter::new(store, true, Duration::from_secs(1));

        let records = adapter.list_statuses("e").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].artist_id, "good");
        assert_eq!(records[0].version, 2);
    }
}
