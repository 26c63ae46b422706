use extract::{ChatMessage, ChatRequest, EntityType, LlmTransport, RelationType, TransportError};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::QueryError;

pub const QUERY_SYSTEM_PROMPT: &str =
    "You are a Cypher assistant. You translate natural-language questions into Cypher queries.";

const QUERY_VERBS: [&str; 4] = ["MATCH", "CREATE", "MERGE", "RETURN"];

pub fn build_query_prompt(question: &str) -> String {
    let entity_types: Vec<&str> = EntityType::ALL.iter().map(|t| t.as_str()).collect();
    let relation_types: Vec<&str> = RelationType::ALL.iter().map(|t| t.as_str()).collect();
    format!(
        "Translate the following question into a single Cypher query.\n\n\
         QUESTION: {question}\n\n\
         Node labels: {}\n\
         Relationship types: {}\n\n\
         Return only the Cypher query, without explanation.",
        entity_types.join(", "),
        relation_types.join(", "),
    )
}

/// First line that starts with a query verb, or the whole trimmed reply.
pub fn extract_query(reply: &str) -> String {
    reply
        .lines()
        .map(str::trim)
        .find(|line| {
            let upper = line.to_ascii_uppercase();
            QUERY_VERBS.iter().any(|verb| upper.starts_with(verb))
        })
        .unwrap_or_else(|| reply.trim())
        .to_string()
}

/// Natural language to Cypher through an LLM transport.
#[derive(Clone)]
pub struct QueryTranslator {
    transport: Arc<dyn LlmTransport>,
}

impl QueryTranslator {
    pub fn new(transport: Arc<dyn LlmTransport>) -> Self {
        Self { transport }
    }

    pub async fn natural_language_to_query(&self, question: &str) -> Result<String, QueryError> {
        let request = ChatRequest::new(
            vec![
                ChatMessage::system(QUERY_SYSTEM_PROMPT),
                ChatMessage::user(build_query_prompt(question)),
            ],
            0.2,
            Some(1000),
        );

        let response = self.transport.complete(request).await?;
        let reply = response.content().ok_or(TransportError::EmptyResponse)?;
        debug!(reply, "Query translation reply");

        let query = extract_query(reply);
        info!(question, query = %query, "Translated question to Cypher");
        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use extract::ChatResponse;

    #[test]
    fn picks_first_line_starting_with_a_verb() {
        let reply = "Here is the query:\n```cypher\nmatch (n:equipment) return n\n```";
        assert_eq!(extract_query(reply), "match (n:equipment) return n");

        let reply = "  MERGE (a:tool {id: 'x'})\nMATCH (n) RETURN n";
        assert_eq!(extract_query(reply), "MERGE (a:tool {id: 'x'})");
    }

    #[test]
    fn falls_back_to_trimmed_reply() {
        assert_eq!(extract_query("  I cannot answer that.  \n"), "I cannot answer that.");
    }

    #[test]
    fn prompt_lists_the_taxonomy() {
        let prompt = build_query_prompt("Which pumps need seals?");
        assert!(prompt.contains("Which pumps need seals?"));
        assert!(prompt.contains("equipment"));
        assert!(prompt.contains("is_solution_for"));
    }

    struct Canned(&'static str);

    #[async_trait]
    impl LlmTransport for Canned {
        async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, TransportError> {
            assert_eq!(request.temperature, 0.2);
            assert_eq!(request.max_tokens, Some(1000));
            assert!(!request.json_output, "query translation wants plain text");
            Ok(ChatResponse::from_text(self.0))
        }
    }

    #[tokio::test]
    async fn translates_through_the_transport() {
        let translator = QueryTranslator::new(Arc::new(Canned("Sure!\nMATCH (n:tool) RETURN n")));
        let query = translator.natural_language_to_query("list tools").await.unwrap();
        assert_eq!(query, "MATCH (n:tool) RETURN n");
    }
}
