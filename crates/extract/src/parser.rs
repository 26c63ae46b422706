//! Recovers the structured payload from a model reply.
//!
//! Models wrap JSON in prose and markdown fences, and sometimes emit several
//! objects or a truncated one. Strategies, first success wins:
//! 1. the whole reply is a JSON object;
//! 2. balanced `{...}` spans found by a string-aware brace scan;
//! 3. the inner content of fenced code blocks.
//!
//! [`parse`] never fails: an unusable reply yields [`ParsedResponse::default`].
//! [`try_parse`] reports that case as `None` instead.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::taxonomy::normalize_relation_type;

pub type RawRecord = Map<String, Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParsedResponse {
    pub entities: Vec<RawRecord>,
    /// Already normalized: `source`/`target` endpoints, an `id`, canonical `type`.
    pub relations: Vec<RawRecord>,
    pub cypher_statements: Vec<String>,
}

impl ParsedResponse {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty() && self.cypher_statements.is_empty()
    }
}

pub fn parse(raw_text: &str) -> ParsedResponse {
    try_parse(raw_text).unwrap_or_default()
}

pub fn try_parse(raw_text: &str) -> Option<ParsedResponse> {
    let preview: String = raw_text.chars().take(500).collect();
    debug!(length = raw_text.len(), preview = %preview, "Parsing model response");

    let Some(payload) = extract_payload(raw_text) else {
        warn!(length = raw_text.len(), "No JSON object could be recovered from model response");
        return None;
    };

    let response = ParsedResponse {
        entities: records(&payload, "entities"),
        relations: records(&payload, "relations")
            .into_iter()
            .map(normalize_relation_record)
            .collect(),
        cypher_statements: payload
            .get("cypher_statements")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    };

    info!(
        entities = response.entities.len(),
        relations = response.relations.len(),
        statements = response.cypher_statements.len(),
        "Parsed model response"
    );
    Some(response)
}

/// Locate the first JSON object in `text` using the strategies above.
pub fn extract_payload(text: &str) -> Option<RawRecord> {
    if let Some(object) = parse_object(text.trim()) {
        return Some(object);
    }

    if let Some(object) = balanced_objects(text).find_map(parse_object) {
        debug!("Recovered JSON object by brace matching");
        return Some(object);
    }

    if let Some(object) = fenced_blocks(text).into_iter().find_map(parse_object) {
        debug!("Recovered JSON object from fenced block");
        return Some(object);
    }

    None
}

fn parse_object(candidate: &str) -> Option<RawRecord> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Balanced `{...}` spans opening at each `{` of `text`, in order of the
/// opening brace. Outer objects therefore come before the objects nested in
/// them, and a stray `{` in prose does not hide the objects after it.
/// Braces inside JSON strings are ignored.
pub fn balanced_objects(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .filter(|&(_, ch)| ch == '{')
        .filter_map(move |(start, _)| balanced_span(&text[start..]))
}

/// The object opening at the first byte of `text`, if it ever closes.
fn balanced_span(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=idx]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Inner content of every ```` ``` ```` fenced block; the opening fence may
/// carry a language tag.
pub fn fenced_blocks(text: &str) -> Vec<&str> {
    const FENCE: &str = "```";
    let mut blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find(FENCE) {
        let after_fence = &rest[open + FENCE.len()..];
        // Skip the language tag up to the end of the opening line.
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];

        let Some(close) = body.find(FENCE) else {
            break;
        };
        blocks.push(&body[..close]);
        rest = &body[close + FENCE.len()..];
    }

    blocks
}

fn records(payload: &RawRecord, key: &str) -> Vec<RawRecord> {
    payload
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .collect()
        })
        .unwrap_or_default()
}

fn endpoint(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Rewrite `from`/`to` into `source`/`target`, default the id to
/// `"{source}-{target}-{type}"` and map `type` onto the taxonomy.
pub fn normalize_relation_record(mut record: RawRecord) -> RawRecord {
    let raw_type = record
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("other")
        .to_string();

    let from = endpoint(record.get("from"));
    let to = endpoint(record.get("to"));
    if let (Some(from), Some(to)) = (from, to) {
        record.remove("from");
        record.remove("to");
        record.insert("source".to_string(), Value::String(from));
        record.insert("target".to_string(), Value::String(to));
    }

    let has_id = record
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.is_empty());
    if !has_id {
        if let (Some(source), Some(target)) =
            (endpoint(record.get("source")), endpoint(record.get("target")))
        {
            record.insert(
                "id".to_string(),
                Value::String(format!("{source}-{target}-{raw_type}")),
            );
        }
    }

    record.insert(
        "type".to_string(),
        Value::String(normalize_relation_type(&raw_type).as_str().to_string()),
    );
    record
}
