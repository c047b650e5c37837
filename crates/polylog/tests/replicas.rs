use async_trait::async_trait;
use bytes::Bytes;
use polylog::{Apply, Base, Head, Node, Result, System, WriterId};
use polyview::{KeyRange, ScanOptions, View, ViewBatch};
use std::sync::Arc;

/// Records every node in apply order; "add:<hex>" adds a writer.
struct Recorder;

#[async_trait]
impl Apply for Recorder {
    async fn apply(&self, nodes: &[Node], view: &mut ViewBatch, system: &mut System) -> Result<()> {
        for node in nodes {
            let text = String::from_utf8_lossy(&node.value).to_string();
            if let Some(hex) = text.strip_prefix("add:") {
                _ = system.add_writer(WriterId::from_hex(hex)?, false);
            }
            let key = format!("{:08}", view.version()).into_bytes();
            _ = view.put(key, node.value.clone());
        }
        Ok(())
    }
}

async fn applied(base: &Base) -> Vec<String> {
    base.view()
        .snapshot()
        .await
        .scan(&KeyRange::all(), ScanOptions::default())
        .await
        .unwrap()
        .into_iter()
        .map(|item| String::from_utf8_lossy(&item.value).to_string())
        .collect()
}

fn value(s: &str) -> Bytes {
    Bytes::from(s.to_string())
}

#[tokio::test]
async fn test_join_and_become_writable() {
    let a = WriterId::random();
    let b = WriterId::random();
    let owner = Base::new(None, a, Arc::new(Recorder));
    let other = Base::new(Some(a), b, Arc::new(Recorder));

    assert!(owner.writable().await);
    assert!(!other.writable().await);
    assert!(other.append(vec![value("nope")]).await.is_err());

    owner.append(vec![value(&format!("add:{b}"))]).await.unwrap();
    assert!(other.sync_from(&owner).await.unwrap());
    other.update().await.unwrap();
    assert!(other.writable().await);
    assert_eq!(other.heads().await, vec![Head { writer: a, length: 1 }]);
    assert!(!other.sync_from(&owner).await.unwrap());
}

#[tokio::test]
async fn test_concurrent_units_converge_after_reorder() {
    // b sorts before a, so b's unit wins the tie once both are known
    let a = WriterId::from_bytes([2; 32]);
    let b = WriterId::from_bytes([1; 32]);
    let owner = Base::new(None, a, Arc::new(Recorder));
    let other = Base::new(Some(a), b, Arc::new(Recorder));

    owner.append(vec![value(&format!("add:{b}"))]).await.unwrap();
    _ = other.sync_from(&owner).await.unwrap();
    other.update().await.unwrap();

    owner.append(vec![value("a1")]).await.unwrap();
    other.append(vec![value("b1"), value("b2")]).await.unwrap();
    assert_eq!(applied(&owner).await[1..], ["a1".to_string()]);

    _ = owner.sync_from(&other).await.unwrap();
    _ = other.sync_from(&owner).await.unwrap();
    owner.update().await.unwrap();
    other.update().await.unwrap();

    let expected: Vec<String> = vec![format!("add:{b}"), "b1".into(), "b2".into(), "a1".into()];
    assert_eq!(applied(&owner).await, expected);
    assert_eq!(applied(&other).await, expected);
    assert_eq!(owner.heads().await, other.heads().await);
}

#[tokio::test]
async fn test_merged_frontier_excludes_own_unit() {
    struct Check;

    #[async_trait]
    impl Apply for Check {
        async fn apply(&self, nodes: &[Node], _view: &mut ViewBatch, _system: &mut System) -> Result<()> {
            for node in nodes {
                // a single writer appending in sequence has always seen everything
                assert_eq!(node.heads, node.merged);
            }
            Ok(())
        }
    }

    let base = Base::new(None, WriterId::random(), Arc::new(Check));
    base.append(vec![value("1"), value("2")]).await.unwrap();
    base.append(vec![value("3")]).await.unwrap();
    assert_eq!(base.heads().await[0].length, 3);
}

#[tokio::test]
async fn test_truncate_is_rederived_on_update() {
    let base = Base::new(None, WriterId::random(), Arc::new(Recorder));
    base.append(vec![value("1")]).await.unwrap();
    base.append(vec![value("2")]).await.unwrap();
    assert_eq!(base.view().version().await, 3);

    base.truncate(2).await.unwrap();
    assert_eq!(base.view().version().await, 2);
    assert!(base.truncate(10).await.is_err());

    base.update().await.unwrap();
    assert_eq!(applied(&base).await, vec!["1".to_string(), "2".to_string()]);
}

#[tokio::test]
async fn test_purge_closes() {
    let base = Base::new(None, WriterId::random(), Arc::new(Recorder));
    base.append(vec![value("1")]).await.unwrap();
    base.purge().await.unwrap();
    assert!(base.closed().await);
    assert!(applied(&base).await.is_empty());
    assert!(base.append(vec![value("2")]).await.is_err());
}

#[tokio::test]
async fn test_commit_follows_each_applied_unit() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Commits {
        applied: AtomicUsize,
        committed: AtomicUsize,
    }

    #[async_trait]
    impl Apply for Commits {
        async fn apply(&self, _nodes: &[Node], view: &mut ViewBatch, _system: &mut System) -> Result<()> {
            _ = view.put(b"unit".to_vec(), value("x"));
            // the previous unit is always committed before the next starts
            assert_eq!(
                self.applied.fetch_add(1, Ordering::SeqCst),
                self.committed.load(Ordering::SeqCst)
            );
            Ok(())
        }

        async fn committed(&self) {
            _ = self.committed.fetch_add(1, Ordering::SeqCst);
        }
    }

    let commits = Arc::new(Commits::default());
    let base = Base::new(None, WriterId::random(), commits.clone());
    base.append(vec![value("1"), value("2")]).await.unwrap();
    base.append(vec![value("3")]).await.unwrap();
    assert_eq!(commits.committed.load(Ordering::SeqCst), 2);

    base.truncate(2).await.unwrap();
    base.update().await.unwrap();
    assert_eq!(commits.applied.load(Ordering::SeqCst), 3);
    assert_eq!(commits.committed.load(Ordering::SeqCst), 3);
}
