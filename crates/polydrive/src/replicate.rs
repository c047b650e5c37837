//! Connecting replicas
//!
//! A replication link peers two drives' content stores and runs the wakeup
//! protocol in both directions. Log nodes are exchanged explicitly with
//! [`Replication::sync`] or [`sync`].

use crate::context::DriveContext;
use crate::drive::Drive;
use crate::error::{DriveError, Result};
use crate::wakeup::{channel, spawn_responder};
use diagnostics::*;
use polyblobs::PeerLink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;

static NEXT_LINK: AtomicU64 = AtomicU64::new(1);

pub struct Replication {
    id: u64,
    link: PeerLink,
    a: Weak<DriveContext>,
    b: Weak<DriveContext>,
    responders: Vec<JoinHandle<()>>,
}

/// Connect two replicas of the same drive
pub async fn replicate(a: &Drive, b: &Drive) -> Result<Replication> {
    if a.key() != b.key() {
        return Err(DriveError::BadArgument(format!(
            "cannot replicate {} with {}",
            a.id(),
            b.id()
        )));
    }
    let id = NEXT_LINK.fetch_add(1, Ordering::Relaxed);
    let link = a.ctx.store.connect(&b.ctx.store).await;

    let (to_b, at_b) = channel();
    let (to_a, at_a) = channel();
    let responders = vec![
        spawn_responder(Arc::downgrade(&b.ctx), at_b),
        spawn_responder(Arc::downgrade(&a.ctx), at_a),
    ];
    a.ctx.peers.add(id, to_b).await;
    b.ctx.peers.add(id, to_a).await;

    debug!(
        "replicating {a} with {b}",
        a: a.local().to_hex(),
        b: b.local().to_hex()
    );
    Ok(Replication {
        id,
        link,
        a: Arc::downgrade(&a.ctx),
        b: Arc::downgrade(&b.ctx),
        responders,
    })
}

impl Replication {
    /// Exchange log nodes until both ends have everything the other has
    pub async fn sync(&self) -> Result<()> {
        let (Some(a), Some(b)) = (self.a.upgrade(), self.b.upgrade()) else {
            return Err(DriveError::StreamClosed);
        };
        sync_contexts(&[a, b]).await
    }

    pub async fn close(self) {
        self.link.close().await;
        for ctx in [&self.a, &self.b] {
            if let Some(ctx) = ctx.upgrade() {
                ctx.peers.remove(self.id).await;
            }
        }
        for responder in &self.responders {
            responder.abort();
        }
    }
}

async fn sync_contexts(contexts: &[Arc<DriveContext>]) -> Result<()> {
    loop {
        let mut changed = false;
        for to in contexts {
            for from in contexts {
                changed |= to.base.sync_from(&from.base).await?;
            }
        }
        for ctx in contexts {
            ctx.base.update().await?;
            ctx.publish_update().await;
        }
        if !changed {
            return Ok(());
        }
    }
}

/// Exchange log nodes between all `drives` and apply them, until no replica
/// learns anything new
pub async fn sync(drives: &[Drive]) -> Result<()> {
    let contexts: Vec<Arc<DriveContext>> = drives.iter().map(|d| Arc::clone(&d.ctx)).collect();
    sync_contexts(&contexts).await
}
