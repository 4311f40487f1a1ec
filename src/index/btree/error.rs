use thiserror::Error;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Index {0:?} not registered in the header page")]
    IndexNotFound(String),

    #[error("Invalid fanout: {0}")]
    InvalidFanout(String),

    #[error("Header page has no room for another index record")]
    HeaderSpaceExhausted,

    #[error("Corrupt node: {0}")]
    CorruptNode(String),

    #[error("Buffer pool error: {0}")]
    BufferPool(#[from] BufferPoolError),
}
