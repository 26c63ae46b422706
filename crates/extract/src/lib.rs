pub mod config;
pub mod error;
pub mod llm;
pub mod merge;
pub mod parser;
pub mod prompt;
pub mod retry;
pub mod schema;
pub mod taxonomy;

pub use config::{ConfigError, ExtractionConfig};
pub use error::{ExtractionError, TransportError};
pub use llm::{ChatCompletionClient, ChatMessage, ChatRequest, ChatResponse, LlmTransport, OllamaClient};
pub use merge::{MergeOptions, MergeReport, merge, merge_all, merge_with_report};
pub use retry::{RetryPolicy, RetryingTransport};
pub use schema::{Entity, EntityType, GraphStats, KnowledgeGraph, Relation, RelationType};

use chrono::Utc;
use ingest::DocumentSource;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use crate::parser::{ParsedResponse, RawRecord};
use crate::taxonomy::{normalize_entity_type, normalize_relation_type};

/// Turns documents into knowledge graphs through one LLM call each.
#[derive(Clone)]
pub struct Extractor {
    transport: Arc<dyn LlmTransport>,
    documents: Arc<dyn DocumentSource>,
    config: ExtractionConfig,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Includes degraded graphs; check [`KnowledgeGraph::is_degraded`].
    pub graphs: HashMap<String, KnowledgeGraph>,
    pub failures: Vec<BatchFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub document_id: String,
    pub reason: String,
}

impl BatchOutcome {
    pub fn degraded_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .graphs
            .iter()
            .filter(|(_, graph)| graph.is_degraded())
            .map(|(id, _)| id.as_str())
            .collect();
        ids.sort_unstable();
        ids
    }
}

impl Extractor {
    pub fn new(
        transport: Arc<dyn LlmTransport>,
        documents: Arc<dyn DocumentSource>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            transport,
            documents,
            config,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    pub async fn extract(&self, document_id: &str) -> Result<KnowledgeGraph, ExtractionError> {
        let content = self
            .documents
            .get_text(document_id)
            .await
            .map_err(|source| ExtractionError::ContentUnavailable {
                document_id: document_id.to_string(),
                source,
            })?;

        Ok(self.extract_from_text(document_id, &content).await)
    }

    /// Never fails: transport, timeout and parse problems produce a degraded
    /// graph carrying the error text in `metadata.error`.
    pub async fn extract_from_text(&self, document_id: &str, content: &str) -> KnowledgeGraph {
        let start = Instant::now();

        let parsed = match self.request_extraction(content).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(document_id, error = %e, "Extraction degraded");
                return KnowledgeGraph::degraded(document_id, e.to_string());
            }
        };

        let graph = build_graph(document_id, parsed);
        info!(
            document_id,
            entities = graph.entities.len(),
            relations = graph.relations.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Extracted knowledge graph"
        );
        graph
    }

    async fn request_extraction(&self, content: &str) -> Result<ParsedResponse, ExtractionError> {
        let user_prompt = match &self.config.custom_prompt {
            Some(instructions) => prompt::build_custom_prompt(instructions, content),
            None => prompt::build_extraction_prompt(content),
        };
        let request = ChatRequest::new(
            vec![
                ChatMessage::system(prompt::EXTRACTION_SYSTEM_PROMPT),
                ChatMessage::user(user_prompt),
            ],
            self.config.temperature,
            self.config.max_tokens,
        )
        .with_json_output();

        // Bounds the whole transport call, retries included.
        let timeout_secs = self.config.timeout_secs;
        let response = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.transport.complete(request),
        )
        .await
        .map_err(|_| ExtractionError::Timeout(timeout_secs))??;

        let reply = response
            .content()
            .ok_or_else(|| ExtractionError::Parse(TransportError::EmptyResponse.to_string()))?;

        parser::try_parse(reply)
            .ok_or_else(|| ExtractionError::Parse("no JSON object in model response".to_string()))
    }

    /// Extract every document on its own task, at most `concurrency`
    /// (clamped to 1..=10) at a time.
    pub async fn extract_batch(&self, document_ids: &[String], concurrency: usize) -> BatchOutcome {
        let permits = config::clamp_concurrency(concurrency);
        let semaphore = Arc::new(Semaphore::new(permits));
        info!(documents = document_ids.len(), concurrency = permits, "Starting batch extraction");

        let mut handles = Vec::with_capacity(document_ids.len());
        for document_id in document_ids {
            let extractor = self.clone();
            let semaphore = Arc::clone(&semaphore);
            let id = document_id.clone();
            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| e.to_string())?;
                extractor.extract(&id).await.map_err(|e| e.to_string())
            });
            handles.push((document_id.clone(), handle));
        }

        let mut outcome = BatchOutcome::default();
        for (document_id, handle) in handles {
            let reason = match handle.await {
                Ok(Ok(graph)) => {
                    outcome.graphs.insert(document_id, graph);
                    continue;
                }
                Ok(Err(reason)) => reason,
                Err(join_error) => format!("extraction task aborted: {join_error}"),
            };
            error!(document_id = %document_id, reason = %reason, "Document extraction failed");
            outcome.failures.push(BatchFailure { document_id, reason });
        }

        info!(
            succeeded = outcome.graphs.len(),
            failed = outcome.failures.len(),
            "Batch extraction finished"
        );
        outcome
    }
}

fn build_graph(document_id: &str, parsed: ParsedResponse) -> KnowledgeGraph {
    let mut graph = KnowledgeGraph::new(
        format!("kg_{}_{}", document_id, Utc::now().timestamp()),
        format!("knowledge_graph_{document_id}"),
    );

    for record in &parsed.entities {
        match build_entity(record, document_id) {
            Some(entity) => graph.add_entity(entity),
            None => debug!(document_id, "Skipping entity record without id or name"),
        }
    }
    for record in &parsed.relations {
        match build_relation(record, document_id) {
            Some(relation) => graph.add_relation(relation),
            None => debug!(document_id, "Skipping relation record without endpoints"),
        }
    }

    graph.metadata.insert(
        "source_document".to_string(),
        Value::String(document_id.to_string()),
    );
    graph.metadata.insert(
        "cypher_statements".to_string(),
        Value::from(parsed.cypher_statements),
    );
    graph
}

fn text_field(record: &RawRecord, key: &str) -> Option<String> {
    let text = match record.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Keep scalars, flatten nested values to compact JSON text, drop nulls.
fn scalar_properties(record: &RawRecord) -> Map<String, Value> {
    let Some(Value::Object(raw)) = record.get("properties") else {
        return Map::new();
    };
    raw.iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::Null => return None,
                Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
                scalar => scalar.clone(),
            };
            Some((key.clone(), value))
        })
        .collect()
}

fn build_entity(record: &RawRecord, document_id: &str) -> Option<Entity> {
    let (id, name) = match (text_field(record, "id"), text_field(record, "name")) {
        (Some(id), Some(name)) => (id, name),
        (Some(id), None) => (id.clone(), id),
        (None, Some(name)) => (name.clone(), name),
        (None, None) => return None,
    };
    let entity_type = record
        .get("type")
        .and_then(Value::as_str)
        .map(normalize_entity_type)
        .unwrap_or(EntityType::Other);

    let mut entity = Entity::new(id, name, entity_type).with_source_document(document_id);
    entity.description = text_field(record, "description");
    entity.source_table = text_field(record, "source_table");
    entity.properties = scalar_properties(record);
    entity.normalize_name();
    Some(entity)
}

fn build_relation(record: &RawRecord, document_id: &str) -> Option<Relation> {
    let source = text_field(record, "source")?;
    let target = text_field(record, "target")?;
    let relation_type = record
        .get("type")
        .and_then(Value::as_str)
        .map(|raw| raw.parse().unwrap_or_else(|_| normalize_relation_type(raw)))
        .unwrap_or(RelationType::Other);
    let id = text_field(record, "id")
        .unwrap_or_else(|| format!("{source}-{target}-{}", relation_type.as_str()));

    let mut relation = Relation::new(id, relation_type, source, target);
    relation.description = text_field(record, "description");
    relation.source_table = text_field(record, "source_table");
    relation.source_document = Some(document_id.to_string());
    relation.properties = scalar_properties(record);
    Some(relation)
}
