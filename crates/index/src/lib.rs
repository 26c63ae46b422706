pub mod error;
pub mod neo4j_index;
pub mod store;

pub use error::{PersistenceError, StoreError};
pub use neo4j_index::{
    DatabaseStats, GraphSink, Neo4jIndexer, Params, UpsertStatement, split_statements, upsert_graph,
    upsert_statements, write_script,
};
pub use store::GraphStore;

use extract::KnowledgeGraph;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Persists graphs to the local store and, when configured, mirrors them
/// into a graph database.
pub struct Indexer {
    store: Arc<GraphStore>,
    sink: Option<Arc<dyn GraphSink>>,
}

impl Indexer {
    pub fn new(store: Arc<GraphStore>, sink: Option<Arc<dyn GraphSink>>) -> Self {
        Self { store, sink }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn has_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// Save `graph` and upsert it into the sink, if any. The local copy is
    /// written first, so a sink failure leaves the graph queryable.
    pub async fn index_graph(&self, graph: &KnowledgeGraph) -> Result<IndexReport, PersistenceError> {
        self.store.save(graph).await?;

        let statements = match &self.sink {
            Some(sink) => upsert_graph(sink.as_ref(), graph).await?,
            None => 0,
        };

        info!(
            graph_id = %graph.id,
            entities = graph.entities.len(),
            relations = graph.relations.len(),
            statements,
            "Graph indexed"
        );
        Ok(IndexReport {
            graph_id: graph.id.clone(),
            statements,
        })
    }

    /// Run a raw Cypher script against the sink. Without a sink nothing runs.
    pub async fn run_script(&self, script: &str) -> Result<usize, PersistenceError> {
        match &self.sink {
            Some(sink) => write_script(sink.as_ref(), script).await,
            None => Ok(0),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub graph_id: String,
    /// Statements sent to the graph database; zero without a sink.
    pub statements: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use extract::{Entity, EntityType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink(AtomicUsize);

    #[async_trait]
    impl GraphSink for CountingSink {
        async fn upsert(&self, _statement: &str, _params: &Params) -> Result<(), PersistenceError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Offline;

    #[async_trait]
    impl GraphSink for Offline {
        async fn upsert(&self, _statement: &str, _params: &Params) -> Result<(), PersistenceError> {
            Err(PersistenceError::Rejected("connection refused".to_string()))
        }
    }

    fn graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new("g1", "g1");
        graph.add_entity(Entity::new("a", "A", EntityType::Tool));
        graph
    }

    #[tokio::test]
    async fn indexes_into_store_and_sink() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GraphStore::open(dir.path()).await.unwrap());
        let sink = Arc::new(CountingSink::default());
        let indexer = Indexer::new(store.clone(), Some(sink.clone() as Arc<dyn GraphSink>));

        let report = indexer.index_graph(&graph()).await.unwrap();
        assert_eq!(report.statements, 1);
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
        assert!(store.contains("g1"));
    }

    #[tokio::test]
    async fn sink_failure_keeps_local_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GraphStore::open(dir.path()).await.unwrap());
        let indexer = Indexer::new(store.clone(), Some(Arc::new(Offline) as Arc<dyn GraphSink>));

        let err = indexer.index_graph(&graph()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Statement { index: 0, .. }));
        assert!(store.contains("g1"));
    }

    #[tokio::test]
    async fn without_sink_scripts_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(GraphStore::open(dir.path()).await.unwrap());
        let indexer = Indexer::new(store, None);
        assert_eq!(indexer.run_script("RETURN 1;").await.unwrap(), 0);
        assert!(!indexer.has_sink());
    }
}
