use async_trait::async_trait;
use extract::schema::property_key;
use extract::{EntityType, KnowledgeGraph};
use neo4rs::{BoltType, Graph, Query};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::PersistenceError;

pub type Params = Map<String, Value>;

/// Write-only view of a graph database. Statements are expected to be
/// idempotent (`MERGE`), so replaying a graph is safe.
#[async_trait]
pub trait GraphSink: Send + Sync {
    async fn upsert(&self, statement: &str, params: &Params) -> Result<(), PersistenceError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpsertStatement {
    pub statement: String,
    pub params: Params,
}

fn set_clause(alias: &str, base: &[(&str, Value)], properties: &Map<String, Value>, params: &mut Params) -> String {
    let mut assignments = Vec::new();
    for (field, value) in base {
        assignments.push(format!("{alias}.{field} = ${field}"));
        params.insert((*field).to_string(), value.clone());
    }
    for (key, value) in properties {
        if value.is_null() {
            continue;
        }
        let key = property_key(key);
        let param = format!("p_{key}");
        assignments.push(format!("{alias}.`{key}` = ${param}"));
        params.insert(param, value.clone());
    }

    if assignments.is_empty() {
        String::new()
    } else {
        format!(" SET {}", assignments.join(", "))
    }
}

fn optional(field: &'static str, value: &Option<String>) -> Option<(&'static str, Value)> {
    value.as_ref().map(|v| (field, Value::String(v.clone())))
}

/// One `MERGE` per entity (labelled with its type tag, keyed by `id`) then
/// one `MATCH ... MERGE` per relation.
pub fn upsert_statements(graph: &KnowledgeGraph) -> Vec<UpsertStatement> {
    let mut statements = Vec::with_capacity(graph.entities.len() + graph.relations.len());

    for entity in &graph.entities {
        let mut params = Params::new();
        params.insert("id".to_string(), Value::String(entity.id.clone()));

        let base: Vec<(&str, Value)> = [
            Some(("name", Value::String(entity.name.clone()))),
            optional("description", &entity.description),
            optional("source_document", &entity.source_document),
        ]
        .into_iter()
        .flatten()
        .collect();
        let set = set_clause("e", &base, &entity.properties, &mut params);

        statements.push(UpsertStatement {
            statement: format!("MERGE (e:{} {{id: $id}}){set}", entity.entity_type.as_str()),
            params,
        });
    }

    for relation in &graph.relations {
        let mut params = Params::new();
        params.insert("id".to_string(), Value::String(relation.id.clone()));
        params.insert("source".to_string(), Value::String(relation.source.clone()));
        params.insert("target".to_string(), Value::String(relation.target.clone()));

        let base: Vec<(&str, Value)> = [optional("description", &relation.description)]
            .into_iter()
            .flatten()
            .collect();
        let set = set_clause("r", &base, &relation.properties, &mut params);

        statements.push(UpsertStatement {
            statement: format!(
                "MATCH (a {{id: $source}}) MATCH (b {{id: $target}}) MERGE (a)-[r:{} {{id: $id}}]->(b){set}",
                relation.relation_type.as_str()
            ),
            params,
        });
    }

    statements
}

/// Split a Cypher script into statements. A statement ends at a line whose
/// last character is `;`. Blank lines and `--` / `//` comment lines are
/// dropped.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in script.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") || trimmed.starts_with("//") {
            continue;
        }
        match trimmed.strip_suffix(';') {
            Some(last) => {
                current.push(last);
                let statement = current.join("\n").trim().to_string();
                if !statement.is_empty() {
                    statements.push(statement);
                }
                current.clear();
            }
            None => current.push(trimmed),
        }
    }

    let tail = current.join("\n");
    if !tail.trim().is_empty() {
        statements.push(tail.trim().to_string());
    }
    statements
}

async fn run_all<'a, I>(sink: &dyn GraphSink, statements: I) -> Result<usize, PersistenceError>
where
    I: IntoIterator<Item = (&'a str, &'a Params)>,
{
    let mut executed = 0;
    for (index, (statement, params)) in statements.into_iter().enumerate() {
        if let Err(e) = sink.upsert(statement, params).await {
            warn!(index, statement, error = %e, "Statement failed, aborting");
            return Err(PersistenceError::Statement {
                index,
                statement: statement.to_string(),
                source: Box::new(e),
            });
        }
        executed += 1;
    }
    Ok(executed)
}

/// Execute a script statement by statement, stopping at the first failure.
/// Returns the number of statements executed.
pub async fn write_script(sink: &dyn GraphSink, script: &str) -> Result<usize, PersistenceError> {
    let statements = split_statements(script);
    let empty = Params::new();
    let pairs: Vec<(&str, &Params)> = statements.iter().map(|s| (s.as_str(), &empty)).collect();
    let executed = run_all(sink, pairs).await?;
    info!(statements = executed, "Cypher script executed");
    Ok(executed)
}

pub async fn upsert_graph(sink: &dyn GraphSink, graph: &KnowledgeGraph) -> Result<usize, PersistenceError> {
    let statements = upsert_statements(graph);
    let pairs: Vec<(&str, &Params)> =
        statements.iter().map(|s| (s.statement.as_str(), &s.params)).collect();
    let executed = run_all(sink, pairs).await?;
    info!(graph_id = %graph.id, statements = executed, "Graph upserted");
    Ok(executed)
}

fn to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => BoltType::from(s.clone()),
        other => BoltType::from(other.to_string()),
    }
}

pub struct Neo4jIndexer {
    graph: Graph,
}

impl Neo4jIndexer {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, PersistenceError> {
        let graph = Graph::new(uri, user, password).await?;
        info!(uri, "Connected to Neo4j");
        Ok(Self::new(graph))
    }

    /// Create an `id` index for every entity label.
    pub async fn init_schema(&self) -> Result<(), PersistenceError> {
        for entity_type in EntityType::ALL {
            let label = entity_type.as_str();
            let query = Query::new(format!(
                "CREATE INDEX {label}_id_index IF NOT EXISTS FOR (n:{label}) ON (n.id)"
            ));
            self.graph.run(query).await?;
        }
        debug!(labels = EntityType::ALL.len(), "Neo4j indexes ensured");
        Ok(())
    }

    pub async fn get_stats(&self) -> Result<DatabaseStats, PersistenceError> {
        let entity_count = self.count("MATCH (n) RETURN count(n) AS count").await?;
        let relation_count = self.count("MATCH ()-[r]->() RETURN count(r) AS count").await?;
        Ok(DatabaseStats {
            entity_count,
            relation_count,
        })
    }

    async fn count(&self, cypher: &str) -> Result<usize, PersistenceError> {
        let mut result = self.graph.execute(Query::new(cypher.to_string())).await?;
        let count = match result.next().await? {
            Some(row) => row.get::<i64>("count").unwrap_or(0) as usize,
            None => 0,
        };
        Ok(count)
    }
}

#[async_trait]
impl GraphSink for Neo4jIndexer {
    async fn upsert(&self, statement: &str, params: &Params) -> Result<(), PersistenceError> {
        let query = params
            .iter()
            .fold(Query::new(statement.to_string()), |query, (key, value)| {
                query.param(key, to_bolt(value))
            });
        self.graph.run(query).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DatabaseStats {
    pub entity_count: usize,
    pub relation_count: usize,
}
