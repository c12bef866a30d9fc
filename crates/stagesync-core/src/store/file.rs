//! Document store backed by a directory of JSON files.
//!
//! A document at `events/e/artists/a/status` lives at
//! `<root>/events/e/artists/a/status.json`.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use super::{DocumentStore, StoreError, StoreResult};

const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FileDocumentStore {
    root: PathBuf,
}

impl FileDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_for(&self, path: &str) -> StoreResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)));
        if path.trim().is_empty() || escapes {
            return Err(StoreError::Malformed {
                path: path.to_string(),
                message: "document paths must be relative and stay inside the store".to_string(),
            });
        }
        Ok(self.root.join(relative).with_extension(EXTENSION))
    }

    fn document_path(&self, file: &Path) -> Option<String> {
        if file.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
            return None;
        }
        let relative = file.strip_prefix(&self.root).ok()?.with_extension("");
        let parts: Vec<&str> = relative
            .components()
            .map(|component| component.as_os_str().to_str())
            .collect::<Option<_>>()?;
        Some(parts.join("/"))
    }
}

#[async_trait]
impl DocumentStore for FileDocumentStore {
    async fn read_document(&self, path: &str) -> StoreResult<Option<Value>> {
        let file = self.file_for(path)?;
        let content = match tokio::fs::read_to_string(&file).await {
            Ok(content) => content,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|error| StoreError::Malformed {
                path: path.to_string(),
                message: error.to_string(),
            })
    }

    async fn write_document(&self, path: &str, document: Value) -> StoreResult<()> {
        let file = self.file_for(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content =
            serde_json::to_string_pretty(&document).map_err(|error| StoreError::Malformed {
                path: path.to_string(),
                message: error.to_string(),
            })?;

        // Write-then-rename so readers never observe a half-written file.
        let staging = file.with_extension("json.tmp");
        tokio::fs::write(&staging, content).await?;
        tokio::fs::rename(&staging, &file).await?;
        Ok(())
    }

    async fn list_documents(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut paths = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(error) if error.kind() == ErrorKind::NotFound => continue,
                Err(error) => return Err(error.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(file);
                } else if let Some(path) = self.document_path(&file) {
                    if path.starts_with(prefix) {
                        paths.push(path);
                    }
                }
            }
        }
        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn documents_round_trip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::new(dir.path());
        let path = "events/e1/artists/a1/status";

        assert_eq!(store.read_document(path).await.unwrap(), None);
        store
            .write_document(path, json!({ "performanceStatus": "completed" }))
            .await
            .unwrap();

        assert!(dir.path().join("events/e1/artists/a1/status.json").exists());
        assert_eq!(
            store.read_document(path).await.unwrap(),
            Some(json!({ "performanceStatus": "completed" }))
        );
    }

    #[tokio::test]
    async fn list_walks_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::new(dir.path());
        for path in [
            "events/e1/artists/b/status",
            "events/e1/artists/a/status",
            "events/e2/artists/c/status",
        ] {
            store.write_document(path, json!({})).await.unwrap();
        }

        let listed = store.list_documents("events/e1/").await.unwrap();
        assert_eq!(
            listed,
            vec![
                "events/e1/artists/a/status".to_string(),
                "events/e1/artists/b/status".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn missing_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::new(dir.path().join("absent"));
        assert!(store.list_documents("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn paths_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileDocumentStore::new(dir.path());
        let err = store.read_document("../outside").await.unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[tokio::test]
    async fn corrupt_file_is_malformed_not_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/broken.json"), "{ nope").unwrap();
        let store = FileDocumentStore::new(dir.path());

        let err = store.read_document("docs/broken").await.unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }
}
