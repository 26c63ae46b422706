use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Graph not found: {0}")]
    NotFound(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed graph file {path}: {source}")]
    Serde {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    /// A statement of a script or upsert batch failed; later statements were
    /// not attempted.
    #[error("Statement {index} failed ({statement}): {source}")]
    Statement {
        index: usize,
        statement: String,
        #[source]
        source: Box<PersistenceError>,
    },

    #[error("Database error: {0}")]
    Database(#[from] neo4rs::Error),

    #[error("Sink rejected statement: {0}")]
    Rejected(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
