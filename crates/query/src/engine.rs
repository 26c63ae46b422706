//! In-memory matcher for a small subset of Cypher.
//!
//! Three shapes are recognized, tried in order:
//! - a single typed node with no relation arrow, `MATCH (n:equipment) RETURN n`,
//!   yields the entities of that type;
//! - a typed, directed relation, `MATCH (a)-[r:part_of]->(b) RETURN r`,
//!   yields the relations of that type;
//! - `shortestPath(...)` yields every relation of the graph. No path is
//!   computed; the result is a superset of any real shortest path.
//!
//! Anything else yields no rows. Results keep graph insertion order.

use extract::{EntityType, KnowledgeGraph, RelationType};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::{debug, warn};

static ENTITY_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bmatch\s*\(\s*\w*\s*:\s*(\w+)").expect("entity shape regex is valid")
});

static RELATION_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-\[\s*\w*\s*:\s*(\w+)[^\]]*\]->").expect("relation shape regex is valid")
});

static PATH_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bshortestpath\s*\(").expect("path shape regex is valid"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryShape {
    EntityType(String),
    RelationType(String),
    Path,
}

fn has_arrow(query: &str) -> bool {
    query.contains("->") || query.contains("<-") || query.contains("-[")
}

impl QueryShape {
    pub fn classify(query: &str) -> Option<Self> {
        if !has_arrow(query) {
            if let Some(caps) = ENTITY_SHAPE.captures(query) {
                return Some(Self::EntityType(caps[1].to_lowercase()));
            }
        }
        if let Some(caps) = RELATION_SHAPE.captures(query) {
            return Some(Self::RelationType(caps[1].to_lowercase()));
        }
        if PATH_SHAPE.is_match(query) {
            return Some(Self::Path);
        }
        None
    }
}

/// A formatted result row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryRow {
    Entity {
        id: Value,
        name: Value,
        #[serde(rename = "type")]
        entity_type: Value,
        description: Value,
        properties: Value,
    },
    Relation {
        id: Value,
        #[serde(rename = "type")]
        relation_type: Value,
        source: Value,
        target: Value,
        description: Value,
        properties: Value,
    },
    Other {
        data: Value,
    },
}

fn take(record: &mut Map<String, Value>, key: &str) -> Value {
    record.remove(key).unwrap_or(Value::Null)
}

fn take_properties(record: &mut Map<String, Value>) -> Value {
    record
        .remove("properties")
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Map::new()))
}

impl QueryRow {
    /// Classify a serialized record: `source` + `target` make a relation row,
    /// `name` + `type` an entity row.
    pub fn from_record(record: Value) -> Self {
        let Value::Object(mut record) = record else {
            return Self::Other { data: record };
        };

        if record.contains_key("source") && record.contains_key("target") {
            return Self::Relation {
                id: take(&mut record, "id"),
                relation_type: take(&mut record, "type"),
                source: take(&mut record, "source"),
                target: take(&mut record, "target"),
                description: take(&mut record, "description"),
                properties: take_properties(&mut record),
            };
        }

        if record.contains_key("name") && record.contains_key("type") {
            return Self::Entity {
                id: take(&mut record, "id"),
                name: take(&mut record, "name"),
                entity_type: take(&mut record, "type"),
                description: take(&mut record, "description"),
                properties: take_properties(&mut record),
            };
        }

        Self::Other {
            data: Value::Object(record),
        }
    }

    pub fn from_serializable<T: Serialize>(item: &T) -> Option<Self> {
        match serde_json::to_value(item) {
            Ok(value) => Some(Self::from_record(value)),
            Err(e) => {
                warn!(error = %e, "Failed to serialize query result");
                None
            }
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Entity { id, .. } | Self::Relation { id, .. } => id.as_str(),
            Self::Other { data } => data.get("id").and_then(Value::as_str),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryEngine;

impl QueryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn execute(&self, graph: &KnowledgeGraph, query: &str, max_results: usize) -> Vec<QueryRow> {
        let Some(shape) = QueryShape::classify(query) else {
            debug!(query, "Unsupported query shape");
            return Vec::new();
        };

        let rows: Vec<QueryRow> = match &shape {
            QueryShape::EntityType(tag) => match tag.parse::<EntityType>() {
                Ok(entity_type) => graph
                    .entities_of_type(entity_type)
                    .into_iter()
                    .take(max_results)
                    .filter_map(QueryRow::from_serializable)
                    .collect(),
                Err(_) => Vec::new(),
            },
            QueryShape::RelationType(tag) => match tag.parse::<RelationType>() {
                Ok(relation_type) => graph
                    .relations_of_type(relation_type)
                    .into_iter()
                    .take(max_results)
                    .filter_map(QueryRow::from_serializable)
                    .collect(),
                Err(_) => Vec::new(),
            },
            QueryShape::Path => graph
                .relations
                .iter()
                .take(max_results)
                .filter_map(QueryRow::from_serializable)
                .collect(),
        };

        debug!(graph_id = %graph.id, shape = ?shape, rows = rows.len(), "Query executed");
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::{Entity, Relation};
    use serde_json::json;

    fn graph() -> KnowledgeGraph {
        let mut graph = KnowledgeGraph::new("g", "g");
        graph.add_entity(Entity::new("e1", "Feed Pump", EntityType::Equipment));
        graph.add_entity(Entity::new("e2", "Seal", EntityType::Component));
        graph.add_entity(Entity::new("e3", "Valve", EntityType::Equipment).with_description("gate"));
        graph.add_relation(Relation::new("r1", RelationType::PartOf, "e2", "e1"));
        graph.add_relation(Relation::new("r2", RelationType::ConnectsTo, "e3", "e1"));
        graph
    }

    fn ids(rows: &[QueryRow]) -> Vec<&str> {
        rows.iter().filter_map(QueryRow::id).collect()
    }

    #[test]
    fn entity_type_query_returns_matching_entities() {
        let mut graph = KnowledgeGraph::new("g", "g");
        graph.add_entity(Entity::new("e1", "E1", EntityType::Equipment));
        graph.add_entity(Entity::new("e2", "E2", EntityType::Component));

        let rows = QueryEngine::new().execute(&graph, "MATCH (n:equipment) RETURN n", 10);
        assert_eq!(rows.len(), 1);
        match &rows[0] {
            QueryRow::Entity { id, entity_type, .. } => {
                assert_eq!(id, "e1");
                assert_eq!(entity_type, "equipment");
            }
            other => panic!("expected entity row, got {other:?}"),
        }
    }

    #[test]
    fn entity_rows_keep_order_and_respect_the_cap() {
        let engine = QueryEngine::new();
        let rows = engine.execute(&graph(), "match (e:Equipment {id: 'x'}) return e", 10);
        assert_eq!(ids(&rows), vec!["e1", "e3"]);

        let rows = engine.execute(&graph(), "MATCH (e:equipment) RETURN e LIMIT 1", 1);
        assert_eq!(ids(&rows), vec!["e1"]);
    }

    #[test]
    fn relation_type_query_returns_matching_relations() {
        let rows = QueryEngine::new().execute(&graph(), "MATCH (a:component)-[r:part_of]->(b) RETURN r", 10);
        assert_eq!(ids(&rows), vec!["r1"]);
        match &rows[0] {
            QueryRow::Relation { source, target, .. } => {
                assert_eq!(source, "e2");
                assert_eq!(target, "e1");
            }
            other => panic!("expected relation row, got {other:?}"),
        }
    }

    #[test]
    fn shortest_path_over_approximates_with_every_relation() {
        let query = "MATCH path = shortestPath((a {id: 'e2'})-[*1..3]-(b {id: 'e3'})) RETURN path";
        assert_eq!(QueryShape::classify(query), Some(QueryShape::Path));
        let rows = QueryEngine::new().execute(&graph(), query, 10);
        assert_eq!(ids(&rows), vec!["r1", "r2"]);
    }

    #[test]
    fn unsupported_or_unknown_queries_return_nothing() {
        let engine = QueryEngine::new();
        for query in [
            "RETURN 1",
            "MATCH (n) RETURN n",
            "MATCH (n:spaceship) RETURN n",
            "MATCH ()-[r:works_for]->() RETURN r",
            "",
        ] {
            assert!(engine.execute(&graph(), query, 10).is_empty(), "{query:?}");
        }
    }

    #[test]
    fn records_are_classified_by_their_fields() {
        let relation = QueryRow::from_record(json!({"id": "r", "type": "causes", "source": "a", "target": "b"}));
        assert!(matches!(relation, QueryRow::Relation { .. }));

        let entity = QueryRow::from_record(json!({"id": "e", "name": "E", "type": "tool"}));
        match entity {
            QueryRow::Entity { properties, description, .. } => {
                assert_eq!(properties, json!({}));
                assert!(description.is_null());
            }
            other => panic!("expected entity row, got {other:?}"),
        }

        let other = QueryRow::from_record(json!({"count": 3}));
        assert_eq!(other, QueryRow::Other { data: json!({"count": 3}) });
    }

    #[test]
    fn rows_serialize_with_a_kind_tag() {
        let row = QueryRow::from_record(json!({"id": "e", "name": "E", "type": "tool"}));
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["kind"], "entity");
        assert_eq!(value["type"], "tool");
    }
}
