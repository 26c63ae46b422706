//! Persisted graphs: one `kg_<id>.json` file per graph in a flat directory.

use dashmap::DashMap;
use extract::KnowledgeGraph;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::StoreError;

const FILE_PREFIX: &str = "kg_";
const FILE_SUFFIX: &str = ".json";

pub struct GraphStore {
    root: PathBuf,
    index: DashMap<String, PathBuf>,
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn graph_id_of(path: &Path) -> Option<String> {
    let file_name = path.file_name()?.to_str()?;
    let id = file_name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    (!id.is_empty()).then(|| id.to_string())
}

impl GraphStore {
    /// Create `root` if needed and index the graph files already in it.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| io_error(&root, e))?;

        let index = DashMap::new();
        let mut entries = fs::read_dir(&root).await.map_err(|e| io_error(&root, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&root, e))? {
            let path = entry.path();
            if let Some(id) = graph_id_of(&path) {
                index.insert(id, path);
            }
        }

        info!(root = %root.display(), graphs = index.len(), "Graph store opened");
        Ok(Self { root, index })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, graph_id: &str) -> PathBuf {
        self.root.join(format!("{FILE_PREFIX}{graph_id}{FILE_SUFFIX}"))
    }

    /// Write `graph`, replacing any earlier version with the same id.
    pub async fn save(&self, graph: &KnowledgeGraph) -> Result<PathBuf, StoreError> {
        let path = self.path_for(&graph.id);
        let json = graph.to_json_pretty().map_err(|source| StoreError::Serde {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(&path, json).await.map_err(|e| io_error(&path, e))?;

        debug!(graph_id = %graph.id, path = %path.display(), "Saved graph");
        self.index.insert(graph.id.clone(), path.clone());
        Ok(path)
    }

    pub async fn load(&self, graph_id: &str) -> Result<KnowledgeGraph, StoreError> {
        let path = self
            .index
            .get(graph_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(graph_id.to_string()))?;

        let json = fs::read_to_string(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        KnowledgeGraph::from_json(&json).map_err(|source| StoreError::Serde {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load every graph in `ids`, or every stored graph when `ids` is `None`.
    /// Unreadable graphs are skipped.
    pub async fn load_many(&self, ids: Option<&[String]>) -> Vec<KnowledgeGraph> {
        let ids = match ids {
            Some(ids) => ids.to_vec(),
            None => self.list_ids(),
        };

        let mut graphs = Vec::with_capacity(ids.len());
        for id in &ids {
            match self.load(id).await {
                Ok(graph) => graphs.push(graph),
                Err(e) => warn!(graph_id = %id, error = %e, "Skipping unreadable graph"),
            }
        }
        graphs
    }

    pub fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.index.iter().map(|entry| entry.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, graph_id: &str) -> bool {
        self.index.contains_key(graph_id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub async fn remove(&self, graph_id: &str) -> Result<(), StoreError> {
        let (_, path) = self
            .index
            .remove(graph_id)
            .ok_or_else(|| StoreError::NotFound(graph_id.to_string()))?;
        fs::remove_file(&path).await.map_err(|e| io_error(&path, e))?;
        info!(graph_id, "Removed graph");
        Ok(())
    }
}
