//! Ordered key-value view
//!
//! The view is the materialized state a replica derives from the shared
//! operation log. Every committed mutation is appended to a mutation log, so
//! each put has a stable sequence number that can be looked up later with
//! `get_by_seq` even after the key was overwritten. Sequence 0 is reserved for
//! the header, which makes the first mutation sequence 1 and the version of an
//! empty view 1.

mod batch;
mod error;
mod memory;
mod range;
mod snapshot;
mod watch;

pub use batch::ViewBatch;
pub use error::{Result, ViewError};
pub use memory::MemoryView;
pub use range::{KeyRange, ScanOptions};
pub use snapshot::{DiffItem, Snapshot};
pub use watch::Watcher;

use async_trait::async_trait;
use bytes::Bytes;

/// A stored key and value together with the sequence it was written at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub seq: u64,
    pub key: Vec<u8>,
    pub value: Bytes,
}

/// One entry of the mutation log. `value == None` is a delete.
#[derive(Debug, Clone)]
pub(crate) struct Mutation {
    pub key: Vec<u8>,
    pub value: Option<Bytes>,
}

/// Read access shared by snapshots and open batches
#[async_trait]
pub trait View: Send + Sync {
    /// Length of the mutation log including the header
    fn version(&self) -> u64;

    async fn get(&self, key: &[u8]) -> Result<Option<Item>>;

    /// The put recorded at `seq`, if that mutation was a put
    async fn get_by_seq(&self, seq: u64) -> Result<Option<Item>>;

    async fn scan(&self, range: &KeyRange, options: ScanOptions) -> Result<Vec<Item>>;

    /// First item of `range`, or the last one when `reverse` is set
    async fn peek(&self, range: &KeyRange, reverse: bool) -> Result<Option<Item>> {
        let mut items = self
            .scan(range, ScanOptions { reverse, limit: Some(1) })
            .await?;
        Ok(items.pop())
    }
}
