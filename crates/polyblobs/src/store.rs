use crate::blob::GetOptions;
use crate::error::{BlobError, Result};
use crate::manifest::ContentKey;
use bytes::Bytes;
use diagnostics::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;

#[derive(Debug, Default)]
struct CoreData {
    blocks: Vec<Option<Bytes>>,
    /// Size of every block, kept when the block itself is cleared. Blocks
    /// never held locally count as zero.
    sizes: Vec<u64>,
    byte_length: u64,
}

/// One content core as held by a store
struct Core {
    key: ContentKey,
    data: RwLock<CoreData>,
    sessions: AtomicUsize,
}

struct StoreInner {
    cores: Mutex<HashMap<ContentKey, Arc<Core>>>,
    peers: Mutex<Vec<Weak<StoreInner>>>,
    changed: Notify,
}

impl StoreInner {
    async fn peers(&self) -> Vec<Arc<StoreInner>> {
        self.peers.lock().await.iter().filter_map(Weak::upgrade).collect()
    }

    /// Wake local waiters and the waiters of every peer
    async fn announce(&self) {
        self.changed.notify_waiters();
        for peer in self.peers().await {
            peer.changed.notify_waiters();
        }
    }
}

/// Per-replica set of content cores
#[derive(Clone)]
pub struct ContentStore {
    inner: Arc<StoreInner>,
}

impl Default for ContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                cores: Mutex::new(HashMap::new()),
                peers: Mutex::new(Vec::new()),
                changed: Notify::new(),
            }),
        }
    }

    /// Open a session on a core, creating it locally if needed. A store only
    /// serves a core to its peers while some session on it is open.
    pub async fn open(&self, key: ContentKey) -> CoreSession {
        let core = {
            let mut cores = self.inner.cores.lock().await;
            cores
                .entry(key)
                .or_insert_with(|| {
                    Arc::new(Core {
                        key,
                        data: RwLock::new(CoreData::default()),
                        sessions: AtomicUsize::new(0),
                    })
                })
                .clone()
        };
        _ = core.sessions.fetch_add(1, Ordering::SeqCst);
        self.inner.announce().await;
        CoreSession {
            store: self.clone(),
            core,
        }
    }

    /// Peer two stores in both directions
    pub async fn connect(&self, other: &ContentStore) -> PeerLink {
        self.inner.peers.lock().await.push(Arc::downgrade(&other.inner));
        other.inner.peers.lock().await.push(Arc::downgrade(&self.inner));
        self.inner.announce().await;
        PeerLink {
            a: Arc::downgrade(&self.inner),
            b: Arc::downgrade(&other.inner),
        }
    }

    /// Drop every block of every core
    pub async fn purge(&self) {
        let cores: Vec<Arc<Core>> = self.inner.cores.lock().await.values().cloned().collect();
        for core in cores {
            *core.data.write().await = CoreData::default();
        }
    }

    async fn fetch(&self, key: &ContentKey, index: u64) -> Option<(Bytes, u64)> {
        for peer in self.inner.peers().await {
            let core = peer.cores.lock().await.get(key).cloned();
            let Some(core) = core else { continue };
            if core.sessions.load(Ordering::SeqCst) == 0 {
                continue;
            }
            let data = core.data.read().await;
            if let Some(Some(block)) = data.blocks.get(index as usize) {
                return Some((block.clone(), data.byte_length));
            }
        }
        None
    }
}

/// Link between two peered stores
pub struct PeerLink {
    a: Weak<StoreInner>,
    b: Weak<StoreInner>,
}

impl PeerLink {
    pub async fn close(self) {
        if let (Some(a), Some(b)) = (self.a.upgrade(), self.b.upgrade()) {
            a.peers.lock().await.retain(|p| !Weak::ptr_eq(p, &self.b));
            b.peers.lock().await.retain(|p| !Weak::ptr_eq(p, &self.a));
        }
    }
}

/// An open session on a content core
///
/// Clones are new sessions. The core stops being served once every session
/// is dropped.
pub struct CoreSession {
    store: ContentStore,
    core: Arc<Core>,
}

impl Clone for CoreSession {
    fn clone(&self) -> Self {
        _ = self.core.sessions.fetch_add(1, Ordering::SeqCst);
        Self {
            store: self.store.clone(),
            core: self.core.clone(),
        }
    }
}

impl Drop for CoreSession {
    fn drop(&mut self) {
        _ = self.core.sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl CoreSession {
    pub fn key(&self) -> ContentKey {
        self.core.key
    }

    /// Number of open sessions on this core in this store
    pub fn sessions(&self) -> usize {
        self.core.sessions.load(Ordering::SeqCst)
    }

    pub async fn length(&self) -> u64 {
        self.core.data.read().await.blocks.len() as u64
    }

    pub async fn byte_length(&self) -> u64 {
        self.core.data.read().await.byte_length
    }

    pub async fn has(&self, index: u64) -> bool {
        let data = self.core.data.read().await;
        matches!(data.blocks.get(index as usize), Some(Some(_)))
    }

    /// Append blocks. Returns the block and byte offset of the first one.
    pub async fn append(&self, blocks: Vec<Bytes>) -> (u64, u64) {
        let offsets = {
            let mut data = self.core.data.write().await;
            let offsets = (data.blocks.len() as u64, data.byte_length);
            for block in blocks {
                data.byte_length += block.len() as u64;
                data.sizes.push(block.len() as u64);
                data.blocks.push(Some(block));
            }
            offsets
        };
        self.store.inner.announce().await;
        offsets
    }

    /// Read one block, fetching it from a serving peer if allowed
    pub async fn block(&self, index: u64, options: &GetOptions) -> Result<Bytes> {
        let deadline = options.timeout.map(|t| Instant::now() + t);
        loop {
            let notified = self.store.inner.changed.notified();
            tokio::pin!(notified);
            _ = notified.as_mut().enable();

            if let Some(Some(block)) = self.core.data.read().await.blocks.get(index as usize) {
                return Ok(block.clone());
            }
            if !options.wait {
                return Err(BlobError::BlockNotAvailable { index });
            }
            if let Some((block, byte_length)) = self.store.fetch(&self.core.key, index).await {
                self.store_block(index, block.clone(), byte_length).await;
                debug!("fetched block {index} of {key}", index, key: self.core.key.to_string());
                return Ok(block);
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(BlobError::RequestTimeout { index });
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn store_block(&self, index: u64, block: Bytes, byte_length: u64) {
        let mut data = self.core.data.write().await;
        let index = index as usize;
        if data.blocks.len() <= index {
            data.blocks.resize(index + 1, None);
            data.sizes.resize(index + 1, 0);
        }
        data.sizes[index] = block.len() as u64;
        data.blocks[index] = Some(block);
        data.byte_length = data.byte_length.max(byte_length);
    }

    /// Fetch every missing block in `[start, end)`
    pub async fn download(&self, start: u64, end: u64, options: &GetOptions) -> Result<()> {
        for index in start..end {
            _ = self.block(index, options).await?;
        }
        Ok(())
    }

    /// Drop the local copy of blocks in `[start, end)`. Returns how many
    /// blocks were actually held.
    pub async fn clear(&self, start: u64, end: u64) -> u64 {
        let mut data = self.core.data.write().await;
        let end = (end as usize).min(data.blocks.len());
        let start = (start as usize).min(end);
        let mut cleared = 0;
        for block in &mut data.blocks[start..end] {
            if block.take().is_some() {
                cleared += 1;
            }
        }
        cleared
    }

    /// Shrink the core to `length` blocks
    pub async fn truncate(&self, length: u64) -> Result<()> {
        let mut data = self.core.data.write().await;
        let available = data.blocks.len() as u64;
        if length > available {
            return Err(BlobError::BadLength { length, available });
        }
        data.blocks.truncate(length as usize);
        data.sizes.truncate(length as usize);
        data.byte_length = data.sizes.iter().sum();
        Ok(())
    }
}
