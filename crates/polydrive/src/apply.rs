//! The merge engine: folds ordered log operations into the view
//!
//! Operations are applied best effort. A dropped operation is reported as an
//! [`OpOutcome`] and never aborts the rest of the batch.

use crate::conflict::is_conflict;
use crate::error::{DriveError, ErrorCode, Result};
use crate::keys::{conflict_key, files_key, history_key};
use crate::messages::{Decode, Encode, Entry, File, Operation, Version};
use crate::namespace::Namespace;
use crate::path::std_path;
use crate::tables;
use async_trait::async_trait;
use diagnostics::*;
use polylog::{Apply, Node, System, WriterId};
use polyview::{ScanOptions, ViewBatch};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// What became of one operation
#[derive(Debug)]
pub enum OpOutcome {
    Applied,
    /// Valid but without effect, like resolving a path with no history
    Ignored,
    /// Parked as a conflict record instead of being applied
    Conflict { path: String },
    Rejected(DriveError),
}

impl OpOutcome {
    fn reported(&self) -> Reported {
        match self {
            OpOutcome::Applied => Reported::Applied,
            OpOutcome::Ignored => Reported::Ignored,
            OpOutcome::Conflict { .. } => Reported::Conflict,
            OpOutcome::Rejected(e) => Reported::Rejected(e.code()),
        }
    }
}

/// Last outcome an observer was told about for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reported {
    Applied,
    Ignored,
    Conflict,
    Rejected(Option<ErrorCode>),
}

/// Receives the outcome of every applied operation once its unit is
/// committed. An operation applied again after a reorder is only reported
/// again if its outcome changed.
pub trait ApplyObserver: Send + Sync {
    fn observe(&self, node: &Node, outcome: &OpOutcome);
}

pub struct NoopObserver;

impl ApplyObserver for NoopObserver {
    fn observe(&self, _node: &Node, _outcome: &OpOutcome) {}
}

pub struct MergeEngine {
    namespace: Namespace,
    observer: Arc<dyn ApplyObserver>,
    /// Outcomes of the unit being applied, until it is committed
    pending: Mutex<Vec<(Node, OpOutcome)>>,
    reported: Mutex<HashMap<(WriterId, u64), Reported>>,
}

impl MergeEngine {
    pub fn new(namespace: Namespace, observer: Arc<dyn ApplyObserver>) -> Self {
        Self {
            namespace,
            observer,
            pending: Mutex::new(Vec::new()),
            reported: Mutex::new(HashMap::new()),
        }
    }

    fn check_permission(&self, source: &WriterId, owner: &WriterId, path: &str) -> Result<()> {
        if self.namespace.same(source, owner) {
            return Ok(());
        }
        Err(DriveError::PermissionDenied {
            path: path.to_string(),
            writer: source.to_hex(),
        })
    }

    async fn apply_node(&self, node: &Node, view: &mut ViewBatch, system: &mut System) -> Result<OpOutcome> {
        match Operation::from_bytes(&node.value)? {
            Operation::Writer {
                key,
                removed,
                indexer,
            } => {
                let changed = if removed {
                    system.remove_writer(key)
                } else {
                    system.add_writer(key, indexer)
                };
                Ok(if changed {
                    OpOutcome::Applied
                } else {
                    OpOutcome::Ignored
                })
            }
            Operation::Addition { path, file } => self.addition(node, canonical(path)?, file, view).await,
            Operation::Deletion { path } => self.deletion(node, canonical(path)?, view).await,
            Operation::Resolution { path, file } => self.resolution(node, canonical(path)?, file, view).await,
        }
    }

    /// Whether the write must be parked as a conflict. Parks it if so.
    async fn park_conflict(
        &self,
        node: &Node,
        path: &str,
        latest: Option<&Version>,
        entry: &Entry,
        view: &mut ViewBatch,
    ) -> Result<bool> {
        let has_conflicts = tables::has_conflicts(&*view, path).await?;
        if !is_conflict(has_conflicts, latest, &node.source, &node.heads, &node.merged) {
            return Ok(false);
        }
        let seq = view.version();
        view.put(conflict_key(path, seq), entry.to_bytes());
        Ok(true)
    }

    async fn addition(&self, node: &Node, path: String, file: File, view: &mut ViewBatch) -> Result<OpOutcome> {
        let latest = tables::latest_version(&*view, &path).await?;
        if let Some(version) = &latest {
            self.check_permission(&node.source, &version.source, &path)?;
        }

        let entry = Entry::new(node.source, file);
        if self.park_conflict(node, &path, latest.as_ref(), &entry, view).await? {
            return Ok(OpOutcome::Conflict { path });
        }

        let seq = view.put(files_key(&path), entry.to_bytes());
        view.put(history_key(&path, seq), Version::file(node.source).to_bytes());
        Ok(OpOutcome::Applied)
    }

    async fn deletion(&self, node: &Node, path: String, view: &mut ViewBatch) -> Result<OpOutcome> {
        let latest = tables::latest_version(&*view, &path).await?;
        if let Some(version) = &latest {
            if version.is_tombstone() {
                return Err(DriveError::FileNotFound(path));
            }
            self.check_permission(&node.source, &version.source, &path)?;
        }

        let placeholder = Entry::new(node.source, File::default());
        if self.park_conflict(node, &path, latest.as_ref(), &placeholder, view).await? {
            return Ok(OpOutcome::Conflict { path });
        }

        if latest.is_none() {
            return Ok(OpOutcome::Ignored);
        }
        view.del(&files_key(&path));
        let seq = view.version() - 1;
        view.put(history_key(&path, seq), Version::tombstone(node.source).to_bytes());
        Ok(OpOutcome::Applied)
    }

    async fn resolution(
        &self,
        node: &Node,
        path: String,
        file: Option<File>,
        view: &mut ViewBatch,
    ) -> Result<OpOutcome> {
        // any record will do, resolution only needs to know the path exists
        let Some(first) = tables::first_version(&*view, &path).await? else {
            return Ok(OpOutcome::Ignored);
        };
        self.check_permission(&node.source, &first.source, &path)?;

        for (seq, _) in tables::conflicts(&*view, &path, ScanOptions::default()).await? {
            view.del(&conflict_key(&path, seq));
        }

        let version = match file {
            Some(file) => {
                view.put(files_key(&path), Entry::new(node.source, file).to_bytes());
                Version::file(node.source)
            }
            None => {
                view.del(&files_key(&path));
                Version::tombstone(node.source)
            }
        };
        let seq = view.version() - 1;
        view.put(history_key(&path, seq), version.to_bytes());
        Ok(OpOutcome::Applied)
    }
}

/// Paths in the log must already be in the form local writes produce.
/// Anything else could alias the key space of another path.
fn canonical(path: String) -> Result<String> {
    if std_path(&path, false)? != path {
        return Err(DriveError::InvalidFilename(path));
    }
    Ok(path)
}

#[async_trait]
impl Apply for MergeEngine {
    async fn apply(&self, nodes: &[Node], view: &mut ViewBatch, system: &mut System) -> polylog::Result<()> {
        let mut pending = self.pending.lock().await;
        pending.clear();
        for node in nodes {
            let outcome = match self.apply_node(node, view, system).await {
                Ok(outcome) => outcome,
                Err(e) => OpOutcome::Rejected(e),
            };
            match &outcome {
                OpOutcome::Conflict { path } => {
                    info!("conflict at {path} from {writer}", path, writer: node.source.to_hex());
                }
                OpOutcome::Rejected(e) => {
                    let code = e.code().map(|c| c.as_str()).unwrap_or("UNKNOWN");
                    warn!("dropped operation from {writer}: {code} {error}", writer: node.source.to_hex(), code, error: e.to_string());
                }
                OpOutcome::Applied | OpOutcome::Ignored => {}
            }
            pending.push((node.clone(), outcome));
        }
        debug!(
            "applied {count} nodes at version {version}",
            count: nodes.len(),
            version: view.version()
        );
        Ok(())
    }

    async fn committed(&self) {
        let outcomes = std::mem::take(&mut *self.pending.lock().await);
        let mut reported = self.reported.lock().await;
        for (node, outcome) in outcomes {
            let now = outcome.reported();
            if reported.insert((node.source, node.seq), now) != Some(now) {
                self.observer.observe(&node, &outcome);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::history_range;
    use bytes::Bytes;
    use polylog::Head;
    use polyview::{MemoryView, View};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl ApplyObserver for Collect {
        fn observe(&self, _node: &Node, outcome: &OpOutcome) {
            let label = match outcome {
                OpOutcome::Applied => "applied".to_string(),
                OpOutcome::Ignored => "ignored".to_string(),
                OpOutcome::Conflict { path } => format!("conflict {path}"),
                OpOutcome::Rejected(e) => format!("rejected {}", e.code().map(|c| c.as_str()).unwrap_or("?")),
            };
            self.0.lock().unwrap().push(label);
        }
    }

    fn writer(byte: u8) -> WriterId {
        WriterId::from_bytes([byte; 32])
    }

    fn node(source: WriterId, op: Operation, heads: Vec<Head>, merged: Vec<Head>) -> Node {
        Node {
            source,
            seq: 0,
            heads,
            merged,
            value: op.to_bytes(),
        }
    }

    fn add(path: &str) -> Operation {
        Operation::Addition {
            path: path.to_string(),
            file: File::symlink("/target"),
        }
    }

    struct Harness {
        view: MemoryView,
        system: System,
        engine: MergeEngine,
        seen: Arc<Collect>,
        seqs: HashMap<WriterId, u64>,
    }

    impl Harness {
        fn new(namespace: Namespace) -> Self {
            let seen = Arc::new(Collect::default());
            Self {
                view: MemoryView::new(),
                system: System::new(writer(1)),
                engine: MergeEngine::new(namespace, seen.clone()),
                seen,
                seqs: HashMap::new(),
            }
        }

        /// Apply `nodes` as the next unit, numbering them per writer
        async fn run(&mut self, mut nodes: Vec<Node>) {
            for node in &mut nodes {
                let next = self.seqs.entry(node.source).or_default();
                node.seq = *next;
                *next += 1;
            }
            self.replay(nodes).await;
        }

        /// Apply `nodes` as they are, like a unit applied again after a reorder
        async fn replay(&mut self, nodes: Vec<Node>) {
            let mut batch = self.view.batch().await;
            self.engine.apply(&nodes, &mut batch, &mut self.system).await.unwrap();
            batch.flush().await.unwrap();
            self.engine.committed().await;
        }

        fn outcomes(&self) -> Vec<String> {
            std::mem::take(&mut *self.seen.0.lock().unwrap())
        }
    }

    #[tokio::test]
    async fn test_addition_then_delete_then_delete_again() {
        let mut h = Harness::new(Namespace::default());
        let a = writer(1);
        h.run(vec![node(a, add("/x"), vec![], vec![])]).await;
        h.run(vec![node(a, Operation::Deletion { path: "/x".into() }, vec![], vec![])]).await;
        h.run(vec![node(a, Operation::Deletion { path: "/x".into() }, vec![], vec![])]).await;
        assert_eq!(h.outcomes(), ["applied", "applied", "rejected FILE_NOT_FOUND"]);

        let snapshot = h.view.snapshot().await;
        assert!(tables::file(&snapshot, "/x").await.unwrap().is_none());
        let latest = tables::latest_version(&snapshot, "/x").await.unwrap().unwrap();
        assert!(latest.is_tombstone());
        assert_eq!(snapshot.scan(&history_range("/x"), ScanOptions::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_history_seq_points_at_files_put() {
        let mut h = Harness::new(Namespace::default());
        h.run(vec![node(writer(1), add("/x"), vec![], vec![])]).await;
        let snapshot = h.view.snapshot().await;
        let versions = tables::versions(&snapshot, "/x", ScanOptions::default()).await.unwrap();
        let (seq, _) = versions[0];
        let item = tables::file_at(&snapshot, seq).await.unwrap().unwrap();
        assert_eq!(item.path, "/x");
    }

    #[tokio::test]
    async fn test_unseen_write_from_other_writer_conflicts() {
        let mut h = Harness::new(Namespace::default());
        let (a, b) = (writer(1), writer(2));
        let after_a = vec![Head { writer: a, length: 1 }];
        h.run(vec![node(a, add("/x"), vec![], vec![])]).await;
        h.run(vec![node(b, add("/x"), vec![], after_a.clone())]).await;
        // seen everything, but the path is still conflicted
        h.run(vec![node(b, add("/x"), after_a.clone(), after_a)]).await;
        assert_eq!(h.outcomes(), ["applied", "conflict /x", "conflict /x"]);

        let snapshot = h.view.snapshot().await;
        assert_eq!(tables::conflicts(&snapshot, "/x", ScanOptions::default()).await.unwrap().len(), 2);
        assert_eq!(tables::file(&snapshot, "/x").await.unwrap().unwrap().entry.source, a);
    }

    #[tokio::test]
    async fn test_sequential_write_from_other_writer_applies() {
        let mut h = Harness::new(Namespace::default());
        let (a, b) = (writer(1), writer(2));
        let after_a = vec![Head { writer: a, length: 1 }];
        h.run(vec![node(a, add("/x"), vec![], vec![])]).await;
        h.run(vec![node(b, add("/x"), after_a.clone(), after_a)]).await;
        assert_eq!(h.outcomes(), ["applied", "applied"]);
        let snapshot = h.view.snapshot().await;
        assert_eq!(tables::file(&snapshot, "/x").await.unwrap().unwrap().entry.source, b);
    }

    #[tokio::test]
    async fn test_resolution_clears_conflicts() {
        let mut h = Harness::new(Namespace::default());
        let (a, b) = (writer(1), writer(2));
        h.run(vec![node(a, add("/x"), vec![], vec![])]).await;
        h.run(vec![node(b, add("/x"), vec![], vec![Head { writer: a, length: 1 }])]).await;
        h.run(vec![node(
            b,
            Operation::Resolution {
                path: "/x".into(),
                file: None,
            },
            vec![],
            vec![],
        )])
        .await;
        h.run(vec![node(
            b,
            Operation::Resolution {
                path: "/never".into(),
                file: None,
            },
            vec![],
            vec![],
        )])
        .await;
        assert_eq!(h.outcomes(), ["applied", "conflict /x", "applied", "ignored"]);

        let snapshot = h.view.snapshot().await;
        assert!(!tables::has_conflicts(&snapshot, "/x").await.unwrap());
        assert!(tables::file(&snapshot, "/x").await.unwrap().is_none());
        assert!(tables::latest_version(&snapshot, "/x").await.unwrap().unwrap().is_tombstone());
    }

    #[tokio::test]
    async fn test_namespace_and_bad_operations_are_dropped() {
        let mut h = Harness::new(Namespace::identity());
        let (a, b) = (writer(1), writer(2));
        let after_a = vec![Head { writer: a, length: 1 }];
        h.run(vec![
            node(a, add("/x"), vec![], vec![]),
            Node {
                source: a,
                seq: 1,
                heads: vec![],
                merged: vec![],
                value: Bytes::from_static(&[42]),
            },
        ])
        .await;
        h.run(vec![node(b, add("/x"), after_a.clone(), after_a)]).await;
        assert_eq!(
            h.outcomes(),
            ["applied", "rejected INVALID_OPERATION", "rejected PERMISSION_DENIED"]
        );
        let snapshot = h.view.snapshot().await;
        assert_eq!(tables::file(&snapshot, "/x").await.unwrap().unwrap().entry.source, a);
    }

    #[tokio::test]
    async fn test_writer_operations_update_system() {
        let mut h = Harness::new(Namespace::default());
        let c = writer(3);
        let op = |removed| Operation::Writer {
            key: c,
            removed,
            indexer: false,
        };
        h.run(vec![node(writer(1), op(false), vec![], vec![])]).await;
        assert!(h.system.is_writer(&c));
        h.run(vec![node(writer(1), op(true), vec![], vec![])]).await;
        assert!(!h.system.is_writer(&c));
        assert_eq!(h.outcomes(), ["applied", "applied"]);
    }

    #[tokio::test]
    async fn test_paths_from_the_log_must_be_canonical() {
        let mut h = Harness::new(Namespace::identity());
        let (a, b) = (writer(1), writer(2));
        let after_a = vec![Head { writer: a, length: 1 }];
        h.run(vec![node(a, add("/x"), vec![], vec![])]).await;

        // would sort inside the history range of /x
        let aliased = "/x\0\x7f\x7f\x7f\x7f\x7f\x7f\x7f\x7f";
        h.run(vec![
            node(b, add(aliased), after_a.clone(), after_a.clone()),
            node(b, add("/y/../x"), after_a.clone(), after_a.clone()),
            node(b, Operation::Deletion { path: "x".into() }, after_a.clone(), after_a.clone()),
            node(
                b,
                Operation::Resolution {
                    path: aliased.into(),
                    file: None,
                },
                after_a.clone(),
                after_a.clone(),
            ),
            node(b, add("/x"), after_a.clone(), after_a),
        ])
        .await;
        assert_eq!(
            h.outcomes(),
            [
                "applied",
                "rejected INVALID_FILENAME",
                "rejected INVALID_FILENAME",
                "rejected INVALID_FILENAME",
                "rejected INVALID_FILENAME",
                "rejected PERMISSION_DENIED",
            ]
        );

        let snapshot = h.view.snapshot().await;
        assert_eq!(tables::file(&snapshot, "/x").await.unwrap().unwrap().entry.source, a);
        assert_eq!(tables::latest_version(&snapshot, "/x").await.unwrap().unwrap().source, a);
        assert_eq!(snapshot.scan(&history_range("/x"), ScanOptions::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reapplied_units_report_only_changed_outcomes() {
        let mut h = Harness::new(Namespace::default());
        let (a, b) = (writer(1), writer(2));
        let first = node(b, add("/x"), vec![], vec![]);
        h.replay(vec![first.clone()]).await;

        // a's unit turns out to sort before b's
        h.view.truncate(1).await.unwrap();
        h.replay(vec![node(a, add("/x"), vec![], vec![])]).await;
        let late = Node {
            merged: vec![Head { writer: a, length: 1 }],
            ..first
        };
        let before = h.view.version().await;
        h.replay(vec![late.clone()]).await;
        assert_eq!(h.outcomes(), ["applied", "applied", "conflict /x"]);

        h.view.truncate(before).await.unwrap();
        h.replay(vec![late]).await;
        assert!(h.outcomes().is_empty());
        let snapshot = h.view.snapshot().await;
        assert_eq!(tables::conflicts(&snapshot, "/x", ScanOptions::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_outcomes_wait_for_commit() {
        let mut h = Harness::new(Namespace::default());
        let mut batch = h.view.batch().await;
        let nodes = vec![node(writer(1), Operation::Deletion { path: "/gone".into() }, vec![], vec![])];
        h.engine.apply(&nodes, &mut batch, &mut h.system).await.unwrap();
        assert!(h.outcomes().is_empty());
        drop(batch);
        h.engine.committed().await;
        assert_eq!(h.outcomes(), ["ignored"]);
    }
}
