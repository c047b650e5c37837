#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("Block {index} is not available")]
    BlockNotAvailable { index: u64 },

    #[error("Request timed out waiting for block {index}")]
    RequestTimeout { index: u64 },

    #[error("Content store is closed")]
    Closed,

    #[error("Blob of {block_length} blocks at {block_offset} is out of range")]
    BadBlob { block_offset: u64, block_length: u64 },

    #[error("Bad length {length}, core holds {available}")]
    BadLength { length: u64, available: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BlobError>;
