use ingest::DocumentError;
use thiserror::Error;

/// Failures of an [`crate::llm::LlmTransport`] call.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("LLM endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode LLM response: {0}")]
    Decode(String),

    #[error("LLM response contained no choices")]
    EmptyResponse,

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The document collaborator could not supply text. Fatal for that document.
    #[error("Content unavailable for {document_id}: {source}")]
    ContentUnavailable {
        document_id: String,
        #[source]
        source: DocumentError,
    },

    #[error("LLM call failed: {0}")]
    Transport(#[from] TransportError),

    #[error("LLM call timed out after {0}s")]
    Timeout(u64),

    #[error("Failed to parse LLM response: {0}")]
    Parse(String),
}
