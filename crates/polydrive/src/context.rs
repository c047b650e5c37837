use crate::config::DriveConfig;
use crate::error::{DriveError, Result};
use crate::events::DriveEvent;
use crate::namespace::Namespace;
use crate::wakeup::WakeupPeers;
use diagnostics::*;
use polyblobs::{Blobs, ContentStore, CorePool, CoreSession, content_key};
use polylog::{Base, WriterId};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Everything a drive and all sessions derived from it share
pub(crate) struct DriveContext {
    pub(crate) config: DriveConfig,
    pub(crate) namespace: Namespace,
    pub(crate) base: Base,
    pub(crate) store: ContentStore,
    pub(crate) pool: Arc<CorePool>,
    pub(crate) events: broadcast::Sender<DriveEvent>,
    pub(crate) peers: WakeupPeers,
    sweeper: JoinHandle<()>,
    closed: AtomicBool,
}

impl DriveContext {
    pub(crate) fn new(
        config: DriveConfig,
        namespace: Namespace,
        base: Base,
        events: broadcast::Sender<DriveEvent>,
    ) -> Self {
        let pool = Arc::new(CorePool::new(config.linger()));
        let sweeper = CorePool::spawn_sweeper(&pool, config.sweep_interval());
        Self {
            config,
            namespace,
            base,
            store: ContentStore::new(),
            pool,
            events,
            peers: WakeupPeers::default(),
            sweeper,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn local(&self) -> WriterId {
        self.base.local()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DriveError::InvalidSession("drive is closed".to_string()));
        }
        Ok(())
    }

    /// Content core of `writer`, from the pool or freshly opened
    ///
    /// The local writer's core stays pooled until the pool is cleared. Other
    /// cores are closed after the linger time without use.
    pub(crate) async fn core(&self, writer: &WriterId) -> Result<CoreSession> {
        self.ensure_open()?;
        if let Some(session) = self.pool.get(writer).await {
            return Ok(session);
        }
        let session = self.store.open(content_key(writer)).await;
        let keep_open = *writer == self.local();
        self.pool.linger(*writer, session.clone(), keep_open).await;
        Ok(session)
    }

    /// Blob store of `source`, the local writer when `None`
    pub(crate) async fn blobs(&self, source: Option<&WriterId>) -> Result<Blobs> {
        let writer = source.copied().unwrap_or_else(|| self.local());
        Ok(Blobs::new(self.core(&writer).await?, self.config.block_size))
    }

    pub(crate) async fn publish_update(&self) {
        let version = self.base.view().version().await;
        _ = self.events.send(DriveEvent::Update { version });
    }

    pub(crate) async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sweeper.abort();
        self.base.close().await;
        self.peers.clear().await;
        self.pool.clear().await;
        info!("closed drive {key}", key: self.base.key().to_hex());
    }
}

impl Drop for DriveContext {
    fn drop(&mut self) {
        self.sweeper.abort();
    }
}
