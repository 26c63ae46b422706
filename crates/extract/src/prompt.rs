use crate::schema::{EntityType, RelationType};

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are a knowledge graph engineer. You extract structured \
entities and relations from maintenance documents and express them as Neo4j Cypher statements.";

fn entity_type_list() -> String {
    EntityType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn relation_type_list() -> String {
    RelationType::ALL
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn build_extraction_prompt(content: &str) -> String {
    format!(
        r#"Extract a knowledge graph from the following maintenance document.

INSTRUCTIONS:
1. Identify the key entities (equipment, components, procedures, faults, causes, solutions, people, tools, ...)
2. Identify directed relations between those entities
3. Record important properties of entities and relations (values, units, intervals)
4. Generate Cypher MERGE statements that would create the same graph
5. Output ONLY valid JSON, nothing else

ENTITY TYPES (lowercase only):
{entity_types}

RELATION TYPES (lowercase only):
{relation_types}

SCHEMA:
{{
  "entities": [
    {{"id": "unique id (the entity name is fine)", "name": "entity name", "type": "one of the entity types", "description": "brief description", "properties": {{"key": "value"}}}}
  ],
  "relations": [
    {{"from": "source entity id", "to": "target entity id", "type": "one of the relation types", "properties": {{"key": "value"}}}}
  ],
  "cypher_statements": [
    "MERGE (a:equipment {{name: 'Feed Pump'}}) ON CREATE SET a += {{power_kw: 15}};"
  ]
}}

RULES:
- If the same entity appears under different names, normalize it to one name and one id
- Relations are directed; "from" and "to" must reference entity ids
- Numbers stay numbers, strings are quoted
- Prefer MERGE over CREATE in the Cypher statements
- Extract only the key information; skip minor details
- Output ONLY the JSON object, no explanations

TEXT:
{content}

JSON OUTPUT:"#,
        entity_types = entity_type_list(),
        relation_types = relation_type_list(),
        content = content,
    )
}

/// Custom instructions replace the built-in header; the document text is
/// always appended.
pub fn build_custom_prompt(instructions: &str, content: &str) -> String {
    format!("{instructions}\n\nTEXT:\n{content}\n\nJSON OUTPUT:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_embeds_taxonomy_and_content() {
        let prompt = build_extraction_prompt("Replace the shaft seal every 2000 hours.");
        assert!(prompt.contains("maintenance, inspection, person, tool, location, time, other"));
        assert!(prompt.contains("is_solution_for"));
        assert!(prompt.contains("Replace the shaft seal every 2000 hours."));
        assert!(prompt.trim_end().ends_with("JSON OUTPUT:"));
    }

    #[test]
    fn custom_prompt_keeps_content() {
        let prompt = build_custom_prompt("Only list tools.", "Use a torque wrench.");
        assert!(prompt.starts_with("Only list tools."));
        assert!(prompt.contains("Use a torque wrench."));
    }
}
