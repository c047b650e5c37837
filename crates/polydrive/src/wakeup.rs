//! Asking peers to open a writer's content core
//!
//! A read that misses blocks can ask every connected peer to open the
//! content core of the blob's author. A peer that holds the core open
//! serves its blocks, so the read can then block until they arrive. The
//! request is the 32 byte writer key, the reply a single boolean byte.

use crate::context::DriveContext;
use crate::messages::{Decode, Encode, WakeupRequest, WakeupResult};
use bytes::Bytes;
use diagnostics::*;
use futures::future::join_all;
use polylog::WriterId;
use std::sync::Weak;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 16;

type Request = (Bytes, oneshot::Sender<Bytes>);
pub(crate) type WakeupSender = mpsc::Sender<Request>;
pub(crate) type WakeupReceiver = mpsc::Receiver<Request>;

pub(crate) fn channel() -> (WakeupSender, WakeupReceiver) {
    mpsc::channel(CHANNEL_CAPACITY)
}

/// Outgoing request channels, one per replication link
#[derive(Default)]
pub(crate) struct WakeupPeers {
    peers: Mutex<Vec<(u64, WakeupSender)>>,
}

impl WakeupPeers {
    pub(crate) async fn add(&self, link: u64, sender: WakeupSender) {
        self.peers.lock().await.push((link, sender));
    }

    pub(crate) async fn remove(&self, link: u64) {
        self.peers.lock().await.retain(|(id, _)| *id != link);
    }

    pub(crate) async fn clear(&self) {
        self.peers.lock().await.clear();
    }

    async fn senders(&self) -> Vec<WakeupSender> {
        self.peers.lock().await.iter().map(|(_, s)| s.clone()).collect()
    }
}

/// Ask every peer in parallel. True if any of them opened the core.
pub(crate) async fn wakeup(ctx: &DriveContext, writer: &WriterId) -> bool {
    let peers = ctx.peers.senders().await;
    let request = WakeupRequest { writer: *writer }.to_bytes();
    let replies = join_all(peers.iter().map(|peer| ask(peer, request.clone()))).await;
    let woken = replies.into_iter().filter(|ok| *ok).count();
    debug!(
        "wakeup for {writer}: {woken} of {count} peers",
        writer: writer.to_hex(),
        woken,
        count: peers.len()
    );
    woken > 0
}

/// A failed or dropped exchange counts as a refusal
async fn ask(peer: &WakeupSender, request: Bytes) -> bool {
    let (reply, response) = oneshot::channel();
    if peer.send((request, reply)).await.is_err() {
        return false;
    }
    match response.await {
        Ok(bytes) => WakeupResult::from_bytes(&bytes).is_ok_and(|r| r.success),
        Err(_) => false,
    }
}

/// Answer requests arriving on one link until it or the drive goes away
pub(crate) fn spawn_responder(ctx: Weak<DriveContext>, mut requests: WakeupReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((request, reply)) = requests.recv().await {
            let Some(ctx) = ctx.upgrade() else { break };
            let success = respond(&ctx, &request).await;
            _ = reply.send(WakeupResult { success }.to_bytes());
        }
    })
}

async fn respond(ctx: &DriveContext, request: &[u8]) -> bool {
    let writer = match WakeupRequest::from_bytes(request) {
        Ok(request) => request.writer,
        Err(e) => {
            debug!("bad wakeup request: {error}", error: e.to_string());
            return false;
        }
    };
    match ctx.core(&writer).await {
        Ok(_) => {
            debug!("woke up core of {writer}", writer: writer.to_hex());
            true
        }
        Err(e) => {
            debug!("cannot wake up {writer}: {error}", writer: writer.to_hex(), error: e.to_string());
            false
        }
    }
}
