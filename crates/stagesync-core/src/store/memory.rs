//! In-process document store with an availability switch, used by tests and
//! single-process demos.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{DocumentStore, StoreError, StoreResult};

#[derive(Debug)]
pub struct MemoryDocumentStore {
    documents: Mutex<BTreeMap<String, Value>>,
    available: AtomicBool,
    latency: Mutex<Duration>,
    reads: AtomicUsize,
    writes: AtomicUsize,
    lists: AtomicUsize,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self {
            documents: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            latency: Mutex::new(Duration::ZERO),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        }
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document without counting it as a store call.
    pub async fn insert(&self, path: &str, document: Value) {
        self.documents.lock().await.insert(path.to_string(), document);
    }

    /// Inspect a document without counting it as a store call.
    pub async fn get(&self, path: &str) -> Option<Value> {
        self.documents.lock().await.get(path).cloned()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn set_latency(&self, latency: Duration) {
        *self.latency.lock().await = latency;
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.read_count() + self.write_count() + self.lists.load(Ordering::SeqCst)
    }

    async fn simulate_network(&self) -> StoreResult<()> {
        let latency = *self.latency.lock().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store is offline".to_string()))
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn read_document(&self, path: &str) -> StoreResult<Option<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;
        Ok(self.documents.lock().await.get(path).cloned())
    }

    async fn write_document(&self, path: &str, document: Value) -> StoreResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;
        self.documents.lock().await.insert(path.to_string(), document);
        Ok(())
    }

    async fn list_documents(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        self.simulate_network().await?;
        Ok(self
            .documents
            .lock()
            .await
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect())
    }
}
