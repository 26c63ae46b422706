//! Identity-resolving merge of knowledge graphs.
//!
//! Entities are matched on `(normalized_name, type)`; relations on
//! `(type, source, target)` after their endpoints are rewritten to the ids
//! of the matched entities. Matching is a linear scan over the accumulated
//! result, which is fine for graphs of up to a few thousand nodes.

use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::schema::{Entity, KnowledgeGraph, Relation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOptions {
    pub merge_entities: bool,
    pub merge_relations: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            merge_entities: true,
            merge_relations: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub entities_matched: usize,
    pub entities_added: usize,
    pub relations_added: usize,
    pub relations_skipped: usize,
    /// Relation endpoints that named no entity of the merged-in graph.
    /// They are kept as-is and may dangle.
    pub unmapped_endpoints: usize,
}

/// Merge `other` into a copy of `base`. Neither input is modified.
pub fn merge(base: &KnowledgeGraph, other: &KnowledgeGraph, options: MergeOptions) -> KnowledgeGraph {
    merge_with_report(base, other, options).0
}

pub fn merge_with_report(
    base: &KnowledgeGraph,
    other: &KnowledgeGraph,
    options: MergeOptions,
) -> (KnowledgeGraph, MergeReport) {
    let mut merged = base.clone();
    let mut report = MergeReport::default();
    let mut id_map: HashMap<&str, String> = HashMap::new();

    for entity in &other.entities {
        let found = if options.merge_entities {
            merged
                .entities
                .iter_mut()
                .find(|existing| existing.identity() == entity.identity())
        } else {
            None
        };

        match found {
            Some(existing) => {
                absorb(existing, entity);
                id_map.insert(entity.id.as_str(), existing.id.clone());
                report.entities_matched += 1;
            }
            None => {
                merged.add_entity(entity.clone());
                id_map.insert(entity.id.as_str(), entity.id.clone());
                report.entities_added += 1;
            }
        }
    }

    if options.merge_relations {
        for relation in &other.relations {
            let source = resolve(&id_map, &relation.source, &mut report);
            let target = resolve(&id_map, &relation.target, &mut report);

            let exists = merged
                .relations
                .iter()
                .any(|r| r.triple() == (relation.relation_type, source.as_str(), target.as_str()));
            if exists {
                report.relations_skipped += 1;
                continue;
            }

            let mut rewritten = Relation::new(relation.id.clone(), relation.relation_type, source, target);
            rewritten.description = relation.description.clone();
            rewritten.properties = relation.properties.clone();
            rewritten.source_document = relation.source_document.clone();
            rewritten.source_table = relation.source_table.clone();
            merged.add_relation(rewritten);
            report.relations_added += 1;
        }
    }

    debug!(
        base = %base.id,
        other = %other.id,
        entities_matched = report.entities_matched,
        entities_added = report.entities_added,
        relations_added = report.relations_added,
        relations_skipped = report.relations_skipped,
        unmapped_endpoints = report.unmapped_endpoints,
        "Merged knowledge graphs"
    );
    (merged, report)
}

/// Left fold of [`merge`] over `graphs`; `None` when `graphs` is empty.
pub fn merge_all(graphs: &[KnowledgeGraph], options: MergeOptions) -> Option<KnowledgeGraph> {
    let (first, rest) = graphs.split_first()?;
    let mut merged = rest
        .iter()
        .fold(first.clone(), |acc, graph| merge(&acc, graph, options));

    merged.id = format!("merged_{}", Uuid::new_v4().simple());
    merged.name = format!("merged_graph_{}", graphs.len());
    merged.touch();
    Some(merged)
}

fn absorb(existing: &mut Entity, incoming: &Entity) {
    if !existing.has_description() && incoming.description.is_some() {
        existing.description = incoming.description.clone();
    }
    for (key, value) in &incoming.properties {
        existing.properties.insert(key.clone(), value.clone());
    }
    if is_blank(&existing.source_document) {
        existing.source_document = incoming.source_document.clone();
    }
    if is_blank(&existing.source_table) {
        existing.source_table = incoming.source_table.clone();
    }
    existing.touch();
}

fn is_blank(field: &Option<String>) -> bool {
    field.as_deref().is_none_or(str::is_empty)
}

fn resolve(id_map: &HashMap<&str, String>, endpoint: &str, report: &mut MergeReport) -> String {
    match id_map.get(endpoint) {
        Some(mapped) => mapped.clone(),
        None => {
            report.unmapped_endpoints += 1;
            endpoint.to_string()
        }
    }
}
