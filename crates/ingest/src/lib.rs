pub mod error;
pub mod reader;
pub mod source;

pub use error::DocumentError;
pub use reader::FileReader;
pub use source::{DocumentSource, DocumentStore, MemoryDocuments};

use sha2::{Digest, Sha256};

/// Generate a stable document ID from file path
pub fn generate_doc_id(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}
