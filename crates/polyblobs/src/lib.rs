//! Chunked content store
//!
//! Each writer keeps its file bytes in its own content core, an append-only
//! array of blocks. Blobs are addressed by [`BlobRef`]. Stores can be peered
//! so a reader fetches blocks it does not hold from a peer that has the core
//! open.

mod blob;
mod blobs;
mod error;
mod manifest;
mod pool;
mod store;
mod writer;

pub use blob::{BlobRef, Cleared, GetOptions, ReadRange};
pub use blobs::Blobs;
pub use error::{BlobError, Result};
pub use manifest::{
    BLOBS_NAMESPACE_INDEX, ContentKey, DEFAULT_NAMESPACE, Manifest, Signer, content_key, namespace,
};
pub use pool::{CorePool, LINGER_TIME};
pub use store::{ContentStore, CoreSession, PeerLink};
pub use writer::BlobWriter;

/// Default size of one content block
pub const BLOCK_SIZE: usize = 64 * 1024;
