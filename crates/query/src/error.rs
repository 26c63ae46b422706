use extract::TransportError;
use index::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Query translation failed: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
