//! Maps free-form type strings emitted by the model onto the closed
//! entity/relation taxonomy. Every function here is total: anything that is
//! not recognized becomes `other`.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::schema::{EntityType, RelationType};

const ENTITY_SYNONYMS: &[(EntityType, &[&str])] = &[
    (
        EntityType::Person,
        &["person", "people", "worker", "operator", "technician", "engineer"],
    ),
    (EntityType::Tool, &["tool", "tools", "instrument", "device"]),
    (
        EntityType::Equipment,
        &["equipment", "machine", "motor", "pump", "valve", "belt", "conveyor"],
    ),
    (EntityType::Component, &["component", "part", "assembly"]),
    (
        EntityType::Procedure,
        &["procedure", "process", "operation", "step"],
    ),
    (
        EntityType::Material,
        &["material", "substance", "oil", "lubricant"],
    ),
    (
        EntityType::Location,
        &["location", "place", "position", "site"],
    ),
    (EntityType::Time, &["time", "date", "period", "duration"]),
    (EntityType::Other, &["other", "unknown"]),
];

const RELATION_SYNONYMS: &[(&str, RelationType)] = &[
    ("located", RelationType::LocatedIn),
    ("belongs", RelationType::BelongsTo),
    ("connects", RelationType::ConnectsTo),
    ("unknown", RelationType::Other),
];

/// Past-tense verbs that name a `<verb>_by` relation.
const BY_SUFFIX_VERBS: &[&str] = &["compiled", "created", "operated", "maintained", "checked"];

static ENTITY_TABLE: LazyLock<HashMap<String, EntityType>> = LazyLock::new(|| {
    let mut table = HashMap::new();
    for (entity_type, words) in ENTITY_SYNONYMS {
        for word in *words {
            table.insert((*word).to_string(), *entity_type);
            table.insert(capitalize(word), *entity_type);
        }
    }
    table
});

static RELATION_TABLE: LazyLock<HashMap<&'static str, RelationType>> = LazyLock::new(|| {
    let mut table: HashMap<&'static str, RelationType> =
        RelationType::ALL.iter().map(|t| (t.as_str(), *t)).collect();
    table.extend(RELATION_SYNONYMS.iter().copied());
    table
});

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn normalize_entity_type(raw: &str) -> EntityType {
    if let Some(entity_type) = ENTITY_TABLE.get(raw) {
        return *entity_type;
    }

    let lowered = raw.trim().to_lowercase();
    if let Some(entity_type) = ENTITY_TABLE.get(&lowered) {
        return *entity_type;
    }

    lowered.parse().unwrap_or(EntityType::Other)
}

pub fn normalize_relation_type(raw: &str) -> RelationType {
    if let Some(relation_type) = RELATION_TABLE.get(raw) {
        return *relation_type;
    }

    let folded = raw.trim().to_lowercase().replace([' ', '-'], "_");
    if let Some(relation_type) = RELATION_TABLE.get(folded.as_str()) {
        return *relation_type;
    }

    if BY_SUFFIX_VERBS.contains(&folded.as_str()) {
        if let Ok(relation_type) = format!("{folded}_by").parse() {
            return relation_type;
        }
    }

    RelationType::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_synonyms_and_capitalized_variants_agree() {
        for (expected, words) in ENTITY_SYNONYMS {
            for word in *words {
                assert_eq!(normalize_entity_type(word), *expected, "{word}");
                assert_eq!(normalize_entity_type(&capitalize(word)), *expected, "{word}");
            }
        }
    }

    #[test]
    fn entity_canonical_tags_map_to_themselves() {
        for t in EntityType::ALL {
            assert_eq!(normalize_entity_type(t.as_str()), t);
            assert_eq!(normalize_entity_type(&t.as_str().to_uppercase()), t);
        }
    }

    #[test]
    fn entity_lookup_trims_and_lowercases() {
        assert_eq!(normalize_entity_type("  PUMP "), EntityType::Equipment);
        assert_eq!(normalize_entity_type("Technician"), EntityType::Person);
        assert_eq!(normalize_entity_type("Inspection"), EntityType::Inspection);
    }

    #[test]
    fn unrecognized_entity_types_fall_back_to_other() {
        for raw in ["", "   ", "ORGANIZATION", "spaceship", "pumps!"] {
            assert_eq!(normalize_entity_type(raw), EntityType::Other, "{raw:?}");
        }
    }

    #[test]
    fn relation_canonical_and_upper_snake_forms() {
        for t in RelationType::ALL {
            assert_eq!(normalize_relation_type(t.as_str()), t);
            assert_eq!(normalize_relation_type(&t.as_str().to_uppercase()), t);
        }
        assert_eq!(normalize_relation_type("Part Of"), RelationType::PartOf);
        assert_eq!(normalize_relation_type("depends-on"), RelationType::DependsOn);
    }

    #[test]
    fn relation_verbs_gain_by_suffix() {
        assert_eq!(normalize_relation_type("COMPILED"), RelationType::CompiledBy);
        assert_eq!(normalize_relation_type("created"), RelationType::CreatedBy);
        assert_eq!(normalize_relation_type("Operated"), RelationType::OperatedBy);
        assert_eq!(normalize_relation_type("maintained"), RelationType::MaintainedBy);
    }

    #[test]
    fn relation_stems_map_to_their_tag() {
        assert_eq!(normalize_relation_type("LOCATED"), RelationType::LocatedIn);
        assert_eq!(normalize_relation_type("belongs"), RelationType::BelongsTo);
        assert_eq!(normalize_relation_type("Connects"), RelationType::ConnectsTo);
    }

    #[test]
    fn unrecognized_relation_types_fall_back_to_other() {
        for raw in ["", "WORKS_FOR", "founded", "unknown"] {
            assert_eq!(normalize_relation_type(raw), RelationType::Other, "{raw:?}");
        }
    }
}
