pub mod engine;
pub mod error;
pub mod llm;
pub mod service;

pub use engine::{QueryEngine, QueryRow, QueryShape};
pub use error::QueryError;
pub use llm::{QueryTranslator, extract_query};
pub use service::{HistoryEntry, QueryResponse, QueryService};
