use crate::memory::MemoryView;
use crate::range::KeyRange;
use crate::snapshot::Snapshot;
use tokio::sync::watch;

/// Yields `(current, previous)` snapshot pairs for commits that change a range
pub struct Watcher {
    view: MemoryView,
    range: KeyRange,
    changes: watch::Receiver<u64>,
    previous: Snapshot,
}

impl Watcher {
    pub(crate) fn new(
        view: MemoryView,
        range: KeyRange,
        changes: watch::Receiver<u64>,
        previous: Snapshot,
    ) -> Self {
        Self {
            view,
            range,
            changes,
            previous,
        }
    }

    /// Wait for the next change inside the range. Returns `None` once the
    /// view is gone.
    pub async fn next(&mut self) -> Option<(Snapshot, Snapshot)> {
        loop {
            self.changes.changed().await.ok()?;
            let current = self.view.snapshot().await;
            if current.diff(&self.previous, &self.range).is_empty() {
                self.previous = current;
                continue;
            }
            let previous = std::mem::replace(&mut self.previous, current.clone());
            return Some((current, previous));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::View;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_watch_skips_unrelated_changes() {
        let view = MemoryView::new();
        let mut watcher = view
            .watch(KeyRange::between(b"/dir/".to_vec(), b"/dir0".to_vec()))
            .await;

        let writer = view.clone();
        let task = tokio::spawn(async move {
            for key in ["/other", "/dir/file"] {
                let mut batch = writer.batch().await;
                _ = batch.put(key.as_bytes().to_vec(), Bytes::from("x"));
                _ = batch.flush().await.unwrap();
            }
        });

        let (current, previous) = watcher.next().await.unwrap();
        task.await.unwrap();
        assert_eq!(current.version(), 3);
        assert!(previous.version() < current.version());
        assert!(current.get(b"/dir/file").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_watch_waits_for_change() {
        let view = MemoryView::new();
        let mut watcher = view
            .watch(KeyRange::between(b"/dir/".to_vec(), b"/dir0".to_vec()))
            .await;
        let mut next = tokio_test::task::spawn(watcher.next());
        tokio_test::assert_pending!(next.poll());

        let mut batch = view.batch().await;
        _ = batch.put(b"/dir/a".to_vec(), Bytes::from("x"));
        _ = batch.flush().await.unwrap();
        assert!(next.is_woken());

        let (current, previous) = next.await.unwrap();
        assert_eq!(current.version(), 2);
        assert_eq!(previous.version(), 1);
    }
}
