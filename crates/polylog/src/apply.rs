use crate::error::Result;
use crate::node::Node;
use crate::system::System;
use async_trait::async_trait;
use polyview::ViewBatch;

/// Deterministic state machine driven by the ordered log
///
/// Called once per append unit, in linearized order. Everything written to
/// `view` is committed after the call returns. Replaying the same sequence of
/// units must always produce the same view.
#[async_trait]
pub trait Apply: Send + Sync {
    async fn apply(&self, nodes: &[Node], view: &mut ViewBatch, system: &mut System) -> Result<()>;

    /// Called once the writes of the last applied unit are committed
    async fn committed(&self) {}
}
