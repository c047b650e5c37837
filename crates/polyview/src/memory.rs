use crate::batch::ViewBatch;
use crate::error::{Result, ViewError};
use crate::range::KeyRange;
use crate::snapshot::{DiffItem, Snapshot};
use crate::watch::Watcher;
use crate::{Item, Mutation};
use diagnostics::*;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};

/// In-memory live view
///
/// Cloning shares the same underlying state. Writers go through
/// `batch()`/`flush()`; readers take snapshots.
#[derive(Clone)]
pub struct MemoryView {
    inner: Arc<ViewInner>,
}

struct ViewInner {
    current: RwLock<Snapshot>,
    changes: watch::Sender<u64>,
}

impl Default for MemoryView {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryView {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(1);
        Self {
            inner: Arc::new(ViewInner {
                current: RwLock::new(Snapshot::empty()),
                changes,
            }),
        }
    }

    pub async fn version(&self) -> u64 {
        self.inner.current.read().await.version
    }

    /// The latest committed state
    pub async fn snapshot(&self) -> Snapshot {
        self.inner.current.read().await.clone()
    }

    pub async fn batch(&self) -> ViewBatch {
        ViewBatch::new(self.clone(), self.snapshot().await)
    }

    /// State as of `version`
    pub async fn checkout(&self, version: u64) -> Result<Snapshot> {
        let current = self.snapshot().await;
        if version > current.version {
            return Err(ViewError::VersionOutOfRange {
                version,
                length: current.version,
            });
        }
        if version == current.version {
            return Ok(current);
        }
        Ok(Snapshot::replay(&current.log, version))
    }

    /// Changes in `range` between `version` and now
    pub async fn diff(&self, version: u64, range: &KeyRange) -> Result<Vec<DiffItem>> {
        let older = self.checkout(version).await?;
        Ok(self.snapshot().await.diff(&older, range))
    }

    /// Follow commits touching `range`
    pub async fn watch(&self, range: KeyRange) -> Watcher {
        let changes = self.inner.changes.subscribe();
        Watcher::new(self.clone(), range, changes, self.snapshot().await)
    }

    /// Drop every mutation at or after `version`
    pub async fn truncate(&self, version: u64) -> Result<()> {
        let mut current = self.inner.current.write().await;
        if version > current.version {
            return Err(ViewError::VersionOutOfRange {
                version,
                length: current.version,
            });
        }
        if version == current.version {
            return Ok(());
        }
        *current = Snapshot::replay(&current.log, version);
        let length = current.version;
        drop(current);
        debug!("view truncated to {length}", length);
        _ = self.inner.changes.send_replace(length);
        Ok(())
    }

    pub(crate) async fn commit(&self, base: u64, pending: Vec<Mutation>) -> Result<u64> {
        let mut current = self.inner.current.write().await;
        if current.version != base {
            return Err(ViewError::StaleBatch {
                base,
                current: current.version,
            });
        }
        if pending.is_empty() {
            return Ok(current.version);
        }

        let next = &mut *current;
        let log = Arc::make_mut(&mut next.log);
        let index = Arc::make_mut(&mut next.index);
        for mutation in pending {
            let seq = log.len() as u64 + 1;
            match &mutation.value {
                Some(value) => {
                    let item = Item {
                        seq,
                        key: mutation.key.clone(),
                        value: value.clone(),
                    };
                    _ = index.insert(mutation.key.clone(), item);
                }
                None => {
                    _ = index.remove(&mutation.key);
                }
            }
            log.push(mutation);
        }
        next.version = log.len() as u64 + 1;
        let version = next.version;
        drop(current);
        _ = self.inner.changes.send_replace(version);
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ScanOptions, View};
    use bytes::Bytes;

    async fn write(view: &MemoryView, key: &str, value: &str) -> u64 {
        let mut batch = view.batch().await;
        let seq = batch.put(key.as_bytes().to_vec(), Bytes::from(value.to_string()));
        _ = batch.flush().await.unwrap();
        seq
    }

    #[tokio::test]
    async fn test_sequences_start_after_header() {
        let view = MemoryView::new();
        assert_eq!(view.version().await, 1);
        assert_eq!(write(&view, "/a", "one").await, 1);
        assert_eq!(write(&view, "/a", "two").await, 2);

        let snap = view.snapshot().await;
        assert_eq!(snap.get(b"/a").await.unwrap().unwrap().value, Bytes::from("two"));
        // an overwritten put is still reachable by sequence
        assert_eq!(snap.get_by_seq(1).await.unwrap().unwrap().value, Bytes::from("one"));
        assert!(snap.get_by_seq(0).await.unwrap().is_none());
        assert!(snap.get_by_seq(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_checkout_and_diff() {
        let view = MemoryView::new();
        _ = write(&view, "/a", "1").await;
        _ = write(&view, "/b", "1").await;
        let old = view.version().await;
        _ = write(&view, "/b", "2").await;
        _ = write(&view, "/c", "1").await;

        let snap = view.checkout(old).await.unwrap();
        assert_eq!(snap.version(), old);
        assert!(snap.get(b"/c").await.unwrap().is_none());
        assert!(view.checkout(100).await.is_err());

        let changes = view.diff(old, &KeyRange::all()).await.unwrap();
        let keys: Vec<&[u8]> = changes.iter().map(|d| d.key.as_slice()).collect();
        assert_eq!(keys, vec![b"/b".as_slice(), b"/c".as_slice()]);
        assert!(changes[1].right.is_none());
        assert_eq!(changes[0].left.as_ref().unwrap().value, Bytes::from("2"));
    }

    #[tokio::test]
    async fn test_truncate_rewinds() {
        let view = MemoryView::new();
        _ = write(&view, "/a", "1").await;
        _ = write(&view, "/b", "1").await;
        view.truncate(2).await.unwrap();
        assert_eq!(view.version().await, 2);
        let items = view
            .snapshot()
            .await
            .scan(&KeyRange::all(), ScanOptions::default())
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert!(view.truncate(9).await.is_err());
    }

    #[tokio::test]
    async fn test_stale_batch_is_rejected() {
        let view = MemoryView::new();
        let mut first = view.batch().await;
        let mut second = view.batch().await;
        _ = first.put(b"x".to_vec(), Bytes::from("1"));
        _ = second.put(b"y".to_vec(), Bytes::from("1"));
        _ = first.flush().await.unwrap();
        assert!(matches!(
            second.flush().await,
            Err(ViewError::StaleBatch { base: 1, current: 2 })
        ));
    }
}
