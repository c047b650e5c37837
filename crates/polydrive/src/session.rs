use crate::context::DriveContext;
use crate::error::{DriveError, Result};
use crate::messages::{Encode, Operation};
use polyview::Snapshot;
use std::sync::Arc;
use tokio::sync::Mutex;

/// How a drive handle reads and where its writes go
#[derive(Clone)]
pub(crate) enum Session {
    /// Reads the latest view, writes append to the log
    Live,
    /// Reads the latest view, writes are queued until flushed
    Batch(Arc<Mutex<Vec<Operation>>>),
    /// Reads a fixed version, cannot write
    Checkout(Snapshot),
}

impl Session {
    pub(crate) async fn snapshot(&self, ctx: &DriveContext) -> Snapshot {
        match self {
            Session::Live | Session::Batch(_) => ctx.base.view().snapshot().await,
            Session::Checkout(snapshot) => snapshot.clone(),
        }
    }

    pub(crate) async fn writable(&self, ctx: &DriveContext) -> bool {
        match self {
            Session::Live | Session::Batch(_) => !ctx.is_closed() && ctx.base.writable().await,
            Session::Checkout(_) => false,
        }
    }

    pub(crate) async fn dispatch(&self, ctx: &DriveContext, ops: Vec<Operation>) -> Result<()> {
        match self {
            Session::Live => append(ctx, ops).await,
            Session::Batch(queue) => {
                queue.lock().await.extend(ops);
                Ok(())
            }
            Session::Checkout(_) => Err(DriveError::SessionNotWritable),
        }
    }

    /// Append everything queued in a batch as one unit
    pub(crate) async fn flush(&self, ctx: &DriveContext) -> Result<()> {
        let Session::Batch(queue) = self else {
            return Err(DriveError::InvalidSession("flush needs a batch".to_string()));
        };
        let ops = std::mem::take(&mut *queue.lock().await);
        append(ctx, ops).await
    }
}

async fn append(ctx: &DriveContext, ops: Vec<Operation>) -> Result<()> {
    if ops.is_empty() {
        return Ok(());
    }
    let values = ops.iter().map(Encode::to_bytes).collect();
    ctx.base.append(values).await?;
    ctx.publish_update().await;
    Ok(())
}
