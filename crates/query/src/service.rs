use chrono::{DateTime, Utc};
use extract::{EntityType, KnowledgeGraph, LlmTransport, RelationType};
use index::GraphStore;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::info;

use crate::engine::{QueryEngine, QueryRow};
use crate::error::QueryError;
use crate::llm::QueryTranslator;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_text: Option<String>,
    pub generated_query: String,
    pub results: Vec<QueryRow>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub query_text: String,
    pub generated_query: String,
    pub result_count: usize,
    pub timestamp: DateTime<Utc>,
}

/// Answers queries against the persisted graphs.
pub struct QueryService {
    store: Arc<GraphStore>,
    translator: QueryTranslator,
    engine: QueryEngine,
    history: Mutex<VecDeque<HistoryEntry>>,
    history_limit: usize,
}

impl QueryService {
    pub fn new(store: Arc<GraphStore>, transport: Arc<dyn LlmTransport>) -> Self {
        Self {
            store,
            translator: QueryTranslator::new(transport),
            engine: QueryEngine::new(),
            history: Mutex::new(VecDeque::new()),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub async fn query_natural_language(
        &self,
        text: &str,
        graph_ids: Option<&[String]>,
        max_results: usize,
    ) -> Result<QueryResponse, QueryError> {
        let generated = self.translator.natural_language_to_query(text).await?;
        let results = self.execute(&generated, graph_ids, max_results).await;

        self.record(HistoryEntry {
            query_text: text.to_string(),
            generated_query: generated.clone(),
            result_count: results.len(),
            timestamp: Utc::now(),
        });

        Ok(QueryResponse {
            query_text: Some(text.to_string()),
            count: results.len(),
            generated_query: generated,
            results,
        })
    }

    pub async fn query(&self, query: &str, graph_ids: Option<&[String]>, max_results: usize) -> QueryResponse {
        let results = self.execute(query, graph_ids, max_results).await;
        QueryResponse {
            query_text: None,
            generated_query: query.to_string(),
            count: results.len(),
            results,
        }
    }

    /// Run `query` over every selected graph and concatenate the rows.
    async fn execute(&self, query: &str, graph_ids: Option<&[String]>, max_results: usize) -> Vec<QueryRow> {
        let graphs = self.store.load_many(graph_ids).await;
        let mut rows = Vec::new();
        for graph in &graphs {
            if rows.len() >= max_results {
                break;
            }
            rows.extend(self.engine.execute(graph, query, max_results));
        }
        rows.truncate(max_results);

        info!(query, graphs = graphs.len(), rows = rows.len(), "Query answered");
        rows
    }

    pub async fn find_entity_by_id(&self, entity_id: &str, graph_ids: Option<&[String]>) -> Option<QueryRow> {
        let graphs = self.store.load_many(graph_ids).await;
        graphs
            .iter()
            .find_map(|graph: &KnowledgeGraph| graph.entity_by_id(entity_id))
            .and_then(QueryRow::from_serializable)
    }

    pub async fn find_entities_by_type(
        &self,
        entity_type: EntityType,
        graph_ids: Option<&[String]>,
        max_results: usize,
    ) -> Vec<QueryRow> {
        let query = format!("MATCH (e:{entity_type}) RETURN e LIMIT {max_results}");
        self.execute(&query, graph_ids, max_results).await
    }

    pub async fn find_relations_by_type(
        &self,
        relation_type: RelationType,
        graph_ids: Option<&[String]>,
        max_results: usize,
    ) -> Vec<QueryRow> {
        let query = format!("MATCH (a)-[r:{relation_type}]->(b) RETURN r LIMIT {max_results}");
        self.execute(&query, graph_ids, max_results).await
    }

    /// Relations that may lie on a path between two entities. This is every
    /// relation of the selected graphs, capped at ten rows.
    pub async fn find_path_between(
        &self,
        source_id: &str,
        target_id: &str,
        max_depth: usize,
        graph_ids: Option<&[String]>,
    ) -> Vec<QueryRow> {
        let query = format!(
            "MATCH path = shortestPath((a {{id: '{source_id}'}})-[*1..{max_depth}]-(b {{id: '{target_id}'}})) RETURN path"
        );
        self.execute(&query, graph_ids, 10).await
    }

    fn record(&self, entry: HistoryEntry) {
        let mut history = self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        history.push_back(entry);
        while history.len() > self.history_limit {
            history.pop_front();
        }
    }

    /// The most recent `limit` entries, oldest first.
    pub fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        let history = self.history.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub fn clear_history(&self) {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        info!("Query history cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use extract::{ChatRequest, ChatResponse, Entity, Relation, TransportError};

    struct Fixed(&'static str);

    #[async_trait]
    impl LlmTransport for Fixed {
        async fn complete(&self, _request: ChatRequest) -> Result<ChatResponse, TransportError> {
            Ok(ChatResponse::from_text(self.0))
        }
    }

    async fn service(dir: &std::path::Path, reply: &'static str) -> QueryService {
        let store = Arc::new(GraphStore::open(dir).await.unwrap());

        let mut a = KnowledgeGraph::new("a", "a");
        a.add_entity(Entity::new("p1", "Pump 1", EntityType::Equipment));
        a.add_entity(Entity::new("s1", "Seal 1", EntityType::Component));
        a.add_relation(Relation::new("r1", RelationType::PartOf, "s1", "p1"));

        let mut b = KnowledgeGraph::new("b", "b");
        b.add_entity(Entity::new("p2", "Pump 2", EntityType::Equipment));
        b.add_entity(Entity::new("p3", "Pump 3", EntityType::Equipment));

        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();
        QueryService::new(store, Arc::new(Fixed(reply)))
    }

    #[tokio::test]
    async fn results_span_graphs_and_are_capped() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), "").await;

        let response = svc.query("MATCH (n:equipment) RETURN n", None, 10).await;
        let ids: Vec<_> = response.results.iter().filter_map(QueryRow::id).collect();
        assert_eq!(ids, vec!["p1", "p2", "p3"]);

        let response = svc.query("MATCH (n:equipment) RETURN n", None, 2).await;
        assert_eq!(response.count, 2);

        let only_b = vec!["b".to_string()];
        let response = svc.query("MATCH (n:equipment) RETURN n", Some(&only_b), 10).await;
        assert_eq!(response.count, 2);
    }

    #[tokio::test]
    async fn natural_language_queries_are_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), "MATCH (a)-[r:part_of]->(b) RETURN r").await;

        let response = svc.query_natural_language("what is part of what?", None, 10).await.unwrap();
        assert_eq!(response.count, 1);
        assert_eq!(response.query_text.as_deref(), Some("what is part of what?"));

        let history = svc.history(20);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].generated_query, "MATCH (a)-[r:part_of]->(b) RETURN r");
        assert_eq!(history[0].result_count, 1);

        svc.clear_history();
        assert!(svc.history(20).is_empty());
    }

    #[tokio::test]
    async fn history_keeps_the_most_recent_entries() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), "RETURN 1").await.with_history_limit(3);

        for i in 0..5 {
            svc.query_natural_language(&format!("q{i}"), None, 10).await.unwrap();
        }
        let texts: Vec<_> = svc.history(10).into_iter().map(|h| h.query_text).collect();
        assert_eq!(texts, vec!["q2", "q3", "q4"]);
        assert_eq!(svc.history(1)[0].query_text, "q4");
    }

    #[tokio::test]
    async fn finders_use_the_engine() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), "").await;

        let row = svc.find_entity_by_id("p3", None).await.unwrap();
        assert_eq!(row.id(), Some("p3"));
        assert!(svc.find_entity_by_id("ghost", None).await.is_none());

        assert_eq!(svc.find_entities_by_type(EntityType::Component, None, 10).await.len(), 1);
        assert_eq!(svc.find_relations_by_type(RelationType::PartOf, None, 10).await.len(), 1);
        assert_eq!(svc.find_path_between("s1", "p1", 3, None).await.len(), 1);
    }
}
