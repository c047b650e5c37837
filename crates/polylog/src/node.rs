use crate::writer::{Head, WriterId};
use bytes::Bytes;

/// A node as stored in a writer's log
#[derive(Debug, Clone)]
pub(crate) struct LogNode {
    pub value: Bytes,
    /// Frontier the author had seen before appending the unit
    pub heads: Vec<Head>,
    /// Last node of an atomic append
    pub end: bool,
}

/// A node handed to the apply handler
#[derive(Debug, Clone)]
pub struct Node {
    pub source: WriterId,
    /// Index of the node in its writer's log
    pub seq: u64,
    /// Causal heads captured when the node was appended
    pub heads: Vec<Head>,
    /// Frontier of everything ordered before this node's unit
    pub merged: Vec<Head>,
    pub value: Bytes,
}
