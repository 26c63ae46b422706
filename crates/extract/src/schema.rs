use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Scalar-valued properties attached to entities and relations.
pub type Properties = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown type tag: {0}")]
pub struct UnknownTag(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Equipment,
    Component,
    Procedure,
    Standard,
    Material,
    Condition,
    Error,
    Cause,
    Solution,
    Maintenance,
    Inspection,
    Person,
    Tool,
    Location,
    Time,
    Other,
}

impl EntityType {
    pub const ALL: [EntityType; 16] = [
        Self::Equipment,
        Self::Component,
        Self::Procedure,
        Self::Standard,
        Self::Material,
        Self::Condition,
        Self::Error,
        Self::Cause,
        Self::Solution,
        Self::Maintenance,
        Self::Inspection,
        Self::Person,
        Self::Tool,
        Self::Location,
        Self::Time,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equipment => "equipment",
            Self::Component => "component",
            Self::Procedure => "procedure",
            Self::Standard => "standard",
            Self::Material => "material",
            Self::Condition => "condition",
            Self::Error => "error",
            Self::Cause => "cause",
            Self::Solution => "solution",
            Self::Maintenance => "maintenance",
            Self::Inspection => "inspection",
            Self::Person => "person",
            Self::Tool => "tool",
            Self::Location => "location",
            Self::Time => "time",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parse: only the canonical tag is accepted. Use
/// [`crate::taxonomy::normalize_entity_type`] for model output.
impl FromStr for EntityType {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTag(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    PartOf,
    UsedIn,
    RelatedTo,
    Causes,
    IsSolutionFor,
    Requires,
    ResultsIn,
    CheckedBy,
    MaintainedBy,
    Follows,
    DependsOn,
    CompiledBy,
    CreatedBy,
    OperatedBy,
    LocatedIn,
    Contains,
    BelongsTo,
    ConnectsTo,
    Replaces,
    Improves,
    Prevents,
    Other,
}

impl RelationType {
    pub const ALL: [RelationType; 22] = [
        Self::PartOf,
        Self::UsedIn,
        Self::RelatedTo,
        Self::Causes,
        Self::IsSolutionFor,
        Self::Requires,
        Self::ResultsIn,
        Self::CheckedBy,
        Self::MaintainedBy,
        Self::Follows,
        Self::DependsOn,
        Self::CompiledBy,
        Self::CreatedBy,
        Self::OperatedBy,
        Self::LocatedIn,
        Self::Contains,
        Self::BelongsTo,
        Self::ConnectsTo,
        Self::Replaces,
        Self::Improves,
        Self::Prevents,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PartOf => "part_of",
            Self::UsedIn => "used_in",
            Self::RelatedTo => "related_to",
            Self::Causes => "causes",
            Self::IsSolutionFor => "is_solution_for",
            Self::Requires => "requires",
            Self::ResultsIn => "results_in",
            Self::CheckedBy => "checked_by",
            Self::MaintainedBy => "maintained_by",
            Self::Follows => "follows",
            Self::DependsOn => "depends_on",
            Self::CompiledBy => "compiled_by",
            Self::CreatedBy => "created_by",
            Self::OperatedBy => "operated_by",
            Self::LocatedIn => "located_in",
            Self::Contains => "contains",
            Self::BelongsTo => "belongs_to",
            Self::ConnectsTo => "connects_to",
            Self::Replaces => "replaces",
            Self::Improves => "improves",
            Self::Prevents => "prevents",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = UnknownTag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownTag(s.to_string()))
    }
}

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_document: Option<String>,
    #[serde(default)]
    pub source_table: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    /// Cached by [`Entity::normalize_name`]; never set it by hand.
    #[serde(default)]
    pub normalized_name: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: EntityType) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            entity_type,
            description: None,
            source_document: None,
            source_table: None,
            properties: Properties::new(),
            normalized_name: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_source_document(mut self, document_id: impl Into<String>) -> Self {
        self.source_document = Some(document_id.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Normalized name, computed on first call and cached.
    pub fn normalize_name(&mut self) -> &str {
        if self.normalized_name.is_none() {
            self.normalized_name = Some(normalize_name(&self.name));
        }
        self.normalized_name.as_deref().unwrap_or_default()
    }

    /// Normalized name without touching the cache.
    pub fn normalized_key(&self) -> Cow<'_, str> {
        match &self.normalized_name {
            Some(cached) => Cow::Borrowed(cached.as_str()),
            None => Cow::Owned(normalize_name(&self.name)),
        }
    }

    /// Deduplication identity: `(normalized_name, type)`.
    pub fn identity(&self) -> (Cow<'_, str>, EntityType) {
        (self.normalized_key(), self.entity_type)
    }

    /// Stable content hash of the identity, independent of `id`.
    pub fn get_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.normalized_key().as_bytes());
        hasher.update(b"_");
        hasher.update(self.entity_type.as_str().as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn has_description(&self) -> bool {
        self.description.as_deref().is_some_and(|d| !d.is_empty())
    }

    pub fn to_cypher(&self) -> String {
        format!(
            "CREATE (e:{} {{id: {}, name: {}{}}})",
            self.entity_type,
            quote(&self.id),
            quote(&self.name),
            property_literals(&self.properties)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    #[serde(rename = "type")]
    pub relation_type: RelationType,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub source_document: Option<String>,
    #[serde(default)]
    pub source_table: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Relation {
    pub fn new(
        id: impl Into<String>,
        relation_type: RelationType,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            relation_type,
            source: source.into(),
            target: target.into(),
            description: None,
            properties: Properties::new(),
            source_document: None,
            source_table: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Deduplication key used by the merger: `(type, source, target)`.
    pub fn triple(&self) -> (RelationType, &str, &str) {
        (self.relation_type, self.source.as_str(), self.target.as_str())
    }

    pub fn touches(&self, entity_id: &str) -> bool {
        self.source == entity_id || self.target == entity_id
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Creation statement over the already-bound variables `e1` and `e2`.
    pub fn to_cypher(&self) -> String {
        format!(
            "CREATE (e1)-[:{} {{id: {}{}}}]->(e2)",
            self.relation_type,
            quote(&self.id),
            property_literals(&self.properties)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub relations: Vec<Relation>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl KnowledgeGraph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            created_at: now,
            updated_at: now,
            entities: Vec::new(),
            relations: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Empty graph standing in for a failed extraction.
    pub fn degraded(document_id: &str, error: impl Into<String>) -> Self {
        let mut graph = Self::new(
            format!("error_{document_id}"),
            format!("error_graph_{document_id}"),
        );
        graph
            .metadata
            .insert("source_document".to_string(), Value::String(document_id.to_string()));
        graph
            .metadata
            .insert("error".to_string(), Value::String(error.into()));
        graph
    }

    /// The `metadata.error` note of a degraded graph.
    pub fn error(&self) -> Option<&str> {
        self.metadata.get("error").and_then(Value::as_str)
    }

    pub fn is_degraded(&self) -> bool {
        self.error().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }

    pub fn add_entity(&mut self, entity: Entity) {
        self.entities.push(entity);
        self.touch();
    }

    pub fn add_relation(&mut self, relation: Relation) {
        self.relations.push(relation);
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn entity_by_id(&self, entity_id: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.id == entity_id)
    }

    pub fn relations_touching(&self, entity_id: &str) -> Vec<&Relation> {
        self.relations.iter().filter(|r| r.touches(entity_id)).collect()
    }

    pub fn entities_of_type(&self, entity_type: EntityType) -> Vec<&Entity> {
        self.entities
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .collect()
    }

    pub fn relations_of_type(&self, relation_type: RelationType) -> Vec<&Relation> {
        self.relations
            .iter()
            .filter(|r| r.relation_type == relation_type)
            .collect()
    }

    /// Entity statements first, then relation statements. Endpoints are not
    /// checked against the entities in the batch.
    pub fn to_cypher(&self) -> Vec<String> {
        self.entities
            .iter()
            .map(Entity::to_cypher)
            .chain(self.relations.iter().map(Relation::to_cypher))
            .collect()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn stats(&self) -> GraphStats {
        let mut entity_types = BTreeMap::new();
        for entity in &self.entities {
            *entity_types.entry(entity.entity_type.to_string()).or_insert(0) += 1;
        }
        let mut relation_types = BTreeMap::new();
        for relation in &self.relations {
            *relation_types.entry(relation.relation_type.to_string()).or_insert(0) += 1;
        }

        GraphStats {
            graph_id: self.id.clone(),
            entities: self.entities.len(),
            relations: self.relations.len(),
            entity_types,
            relation_types,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub graph_id: String,
    pub entities: usize,
    pub relations: usize,
    pub entity_types: BTreeMap<String, usize>,
    pub relation_types: BTreeMap<String, usize>,
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Property keys end up in statement text, so only `[A-Za-z0-9_]` survives.
pub fn property_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn property_literals(properties: &Properties) -> String {
    properties
        .iter()
        .map(|(key, value)| {
            let key = property_key(key);
            match value {
                Value::String(s) => format!(", `{key}`: {}", quote(s)),
                other => format!(", `{key}`: {other}"),
            }
        })
        .collect()
}
