use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info};

use crate::error::DocumentError;
use crate::generate_doc_id;
use crate::reader::FileReader;

/// Supplies plain text content by document id.
///
/// Implementations must be safe for concurrent reads: batch extraction calls
/// `get_text` from several tasks at once.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn get_text(&self, document_id: &str) -> Result<String, DocumentError>;
}

/// Directory-backed documents with an id -> path index built once at open.
pub struct DocumentStore {
    root: PathBuf,
    index: DashMap<String, PathBuf>,
}

impl DocumentStore {
    /// Scan `root` once and index every text file in it.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, DocumentError> {
        let root = root.into();
        let store = Self {
            root,
            index: DashMap::new(),
        };

        for path in FileReader::list_directory(&store.root).await? {
            store.insert_path(path);
        }

        info!(
            root = %store.root.display(),
            documents = store.index.len(),
            "Document store opened"
        );
        Ok(store)
    }

    /// Register a file that was added after the store was opened.
    pub fn register(&self, path: &Path) -> Result<String, DocumentError> {
        if !path.is_file() {
            return Err(DocumentError::NotFound(path.display().to_string()));
        }
        if !FileReader::is_text_file(path) {
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            return Err(DocumentError::Unsupported(extension.to_string()));
        }
        Ok(self.insert_path(path.to_path_buf()))
    }

    fn insert_path(&self, path: PathBuf) -> String {
        let doc_id = generate_doc_id(&path.to_string_lossy());
        debug!(document_id = %doc_id, path = %path.display(), "Indexed document");
        self.index.insert(doc_id.clone(), path);
        doc_id
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.index.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn path_of(&self, document_id: &str) -> Option<PathBuf> {
        self.index.get(document_id).map(|r| r.value().clone())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[async_trait]
impl DocumentSource for DocumentStore {
    async fn get_text(&self, document_id: &str) -> Result<String, DocumentError> {
        let path = self
            .path_of(document_id)
            .ok_or_else(|| DocumentError::NotFound(document_id.to_string()))?;
        FileReader::read_file(&path).await
    }
}

/// In-process documents, keyed by caller-chosen ids.
#[derive(Default)]
pub struct MemoryDocuments {
    docs: RwLock<HashMap<String, String>>,
}

impl MemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(self, document_id: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(document_id, text);
        self
    }

    pub fn insert(&self, document_id: impl Into<String>, text: impl Into<String>) {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.insert(document_id.into(), text.into());
    }
}

#[async_trait]
impl DocumentSource for MemoryDocuments {
    async fn get_text(&self, document_id: &str) -> Result<String, DocumentError> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        docs.get(document_id)
            .cloned()
            .ok_or_else(|| DocumentError::NotFound(document_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_indexes_directory_once() {
        let dir = tempfile::tempdir().unwrap();
        let manual = dir.path().join("pump_manual.txt");
        std::fs::write(&manual, "Check the pump seal weekly.").unwrap();

        let store = DocumentStore::open(dir.path()).await.unwrap();
        assert_eq!(store.len(), 1);

        let doc_id = generate_doc_id(&manual.to_string_lossy());
        let text = store.get_text(&doc_id).await.unwrap();
        assert_eq!(text, "Check the pump seal weekly.");
    }

    #[tokio::test]
    async fn store_reports_missing_documents() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).await.unwrap();

        let err = store.get_text("nope").await.unwrap_err();
        assert!(matches!(err, DocumentError::NotFound(id) if id == "nope"));
    }

    #[tokio::test]
    async fn register_adds_late_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DocumentStore::open(dir.path()).await.unwrap();
        assert!(store.is_empty());

        let late = dir.path().join("late.md");
        std::fs::write(&late, "# Valve inspection").unwrap();
        let doc_id = store.register(&late).unwrap();

        assert_eq!(store.get_text(&doc_id).await.unwrap(), "# Valve inspection");
    }

    #[tokio::test]
    async fn memory_documents_round_trip() {
        let docs = MemoryDocuments::new().with_document("d1", "motor overheats");
        assert_eq!(docs.get_text("d1").await.unwrap(), "motor overheats");
        assert!(docs.get_text("d2").await.is_err());
    }
}
