use crate::apply::Apply;
use crate::error::{LogError, Result};
use crate::linearize::{UnitRef, linearize};
use crate::node::{LogNode, Node};
use crate::system::System;
use crate::writer::{Head, WriterId};
use bytes::Bytes;
use diagnostics::*;
use polyview::MemoryView;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// State restored when the order of already applied units changes
#[derive(Debug, Clone)]
struct Checkpoint {
    view_version: u64,
    system: System,
    frontier: BTreeMap<WriterId, u64>,
}

#[derive(Debug)]
struct AppliedUnit {
    unit: UnitRef,
    checkpoint: Checkpoint,
}

struct BaseState {
    logs: BTreeMap<WriterId, Vec<LogNode>>,
    system: System,
    applied: Vec<AppliedUnit>,
    /// Nodes of each writer covered by the applied units
    frontier: BTreeMap<WriterId, u64>,
    closed: bool,
}

struct BaseInner {
    key: WriterId,
    local: WriterId,
    view: MemoryView,
    handler: Arc<dyn Apply>,
    state: Mutex<BaseState>,
}

/// One replica of a multi-writer log and the view derived from it
#[derive(Clone)]
pub struct Base {
    inner: Arc<BaseInner>,
}

impl Base {
    /// Open a replica. Without a bootstrap key the local writer creates a new
    /// log and becomes its first writer.
    pub fn new(bootstrap: Option<WriterId>, local: WriterId, handler: Arc<dyn Apply>) -> Self {
        let key = bootstrap.unwrap_or(local);
        Self {
            inner: Arc::new(BaseInner {
                key,
                local,
                view: MemoryView::new(),
                handler,
                state: Mutex::new(BaseState {
                    logs: BTreeMap::new(),
                    system: System::new(key),
                    applied: Vec::new(),
                    frontier: BTreeMap::new(),
                    closed: false,
                }),
            }),
        }
    }

    /// Key of the bootstrap writer, shared by every replica of the log
    pub fn key(&self) -> WriterId {
        self.inner.key
    }

    pub fn local(&self) -> WriterId {
        self.inner.local
    }

    pub fn view(&self) -> &MemoryView {
        &self.inner.view
    }

    pub async fn writable(&self) -> bool {
        let state = self.inner.state.lock().await;
        !state.closed && state.system.is_writer(&self.inner.local)
    }

    pub async fn closed(&self) -> bool {
        self.inner.state.lock().await.closed
    }

    /// Frontier of the applied log, sorted by writer
    pub async fn heads(&self) -> Vec<Head> {
        frontier_heads(&self.inner.state.lock().await.frontier)
    }

    pub async fn system(&self) -> System {
        self.inner.state.lock().await.system.clone()
    }

    /// Number of nodes held for `writer`
    pub async fn length(&self, writer: &WriterId) -> u64 {
        let state = self.inner.state.lock().await;
        state.logs.get(writer).map_or(0, |log| log.len() as u64)
    }

    /// Append `values` as one unit and apply it
    pub async fn append(&self, values: Vec<Bytes>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(LogError::Closed);
            }
            let local = self.inner.local;
            if !state.system.is_writer(&local) {
                return Err(LogError::NotWritable(local));
            }

            let own = state.logs.get(&local).map_or(0, |log| log.len() as u64);
            let mut known = state.frontier.clone();
            _ = known.insert(local, own);
            let heads = frontier_heads(&known);

            let count = values.len();
            let log = state.logs.entry(local).or_default();
            for (i, value) in values.into_iter().enumerate() {
                log.push(LogNode {
                    value,
                    heads: heads.clone(),
                    end: i + 1 == count,
                });
            }
            debug!("appended {count} nodes as {writer}", count, writer: local.to_hex());
        }
        self.update().await
    }

    /// Linearize every known unit and apply what is new
    ///
    /// When newly learned units sort before units that were already applied,
    /// the view is rolled back to the first diverging unit and re-derived.
    pub async fn update(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Ok(());
        }
        loop {
            let writers = state.system.linearized();
            let order = linearize(&state.logs, &writers);

            let keep = state
                .applied
                .iter()
                .zip(order.iter())
                .take_while(|(applied, unit)| applied.unit == **unit)
                .count();

            if keep < state.applied.len() {
                let checkpoint = state.applied[keep].checkpoint.clone();
                self.inner.view.truncate(checkpoint.view_version).await?;
                let dropped = state.applied.len() - keep;
                state.applied.truncate(keep);
                state.system = checkpoint.system;
                state.frontier = checkpoint.frontier;
                info!(
                    "reordering {dropped} units, view truncated to {version}",
                    dropped,
                    version: checkpoint.view_version
                );
            }

            for unit in &order[keep..] {
                self.apply_unit(&mut state, *unit).await?;
            }

            if state.system.linearized() == writers {
                return Ok(());
            }
        }
    }

    async fn apply_unit(&self, state: &mut BaseState, unit: UnitRef) -> Result<()> {
        let checkpoint = Checkpoint {
            view_version: self.inner.view.version().await,
            system: state.system.clone(),
            frontier: state.frontier.clone(),
        };
        let merged = frontier_heads(&state.frontier);
        let missing = || LogError::MissingNodes {
            writer: unit.writer,
            start: unit.start,
            end: unit.end,
        };
        let stored = state
            .logs
            .get(&unit.writer)
            .and_then(|log| log.get(unit.start as usize..unit.end as usize))
            .ok_or_else(missing)?;
        let nodes: Vec<Node> = stored
            .iter()
            .zip(unit.start..)
            .map(|(node, seq)| Node {
                source: unit.writer,
                seq,
                heads: node.heads.clone(),
                merged: merged.clone(),
                value: node.value.clone(),
            })
            .collect();

        let mut batch = self.inner.view.batch().await;
        self.inner
            .handler
            .apply(&nodes, &mut batch, &mut state.system)
            .await?;
        let version = batch.flush().await?;
        self.inner.handler.committed().await;

        _ = state.frontier.insert(unit.writer, unit.end);
        state.applied.push(AppliedUnit { unit, checkpoint });
        debug!(
            "applied {count} nodes from {writer}, view at {version}",
            count: nodes.len(),
            writer: unit.writer.to_hex(),
            version
        );
        Ok(())
    }

    /// Copy log nodes this replica is missing from `other`
    ///
    /// Returns true if anything new arrived. Call `update` afterwards to apply.
    pub async fn sync_from(&self, other: &Base) -> Result<bool> {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return Ok(false);
        }
        if other.key() != self.key() {
            return Err(LogError::KeyMismatch {
                ours: self.key(),
                theirs: other.key(),
            });
        }

        let have: BTreeMap<WriterId, usize> = {
            let state = self.inner.state.lock().await;
            if state.closed {
                return Ok(false);
            }
            state.logs.iter().map(|(w, log)| (*w, log.len())).collect()
        };
        let incoming: Vec<(WriterId, usize, Vec<LogNode>)> = {
            let theirs = other.inner.state.lock().await;
            theirs
                .logs
                .iter()
                .filter_map(|(w, log)| {
                    let from = have.get(w).copied().unwrap_or(0);
                    (log.len() > from).then(|| (*w, from, log[from..].to_vec()))
                })
                .collect()
        };

        let mut changed = false;
        let mut state = self.inner.state.lock().await;
        for (writer, from, nodes) in incoming {
            let log = state.logs.entry(writer).or_default();
            let skip = log.len().saturating_sub(from);
            if skip < nodes.len() {
                log.extend(nodes.into_iter().skip(skip));
                changed = true;
            }
        }
        Ok(changed)
    }

    /// Roll the view back to the last unit boundary at or below `version`.
    /// The dropped units are applied again by the next `update`.
    pub async fn truncate(&self, version: u64) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        let current = self.inner.view.version().await;
        if version > current {
            return Err(polyview::ViewError::VersionOutOfRange {
                version,
                length: current,
            }
            .into());
        }

        let cut = (0..state.applied.len()).find(|&i| {
            let end = state
                .applied
                .get(i + 1)
                .map_or(current, |next| next.checkpoint.view_version);
            end > version
        });
        let Some(cut) = cut else { return Ok(()) };

        let checkpoint = state.applied[cut].checkpoint.clone();
        self.inner.view.truncate(checkpoint.view_version).await?;
        state.applied.truncate(cut);
        state.system = checkpoint.system;
        state.frontier = checkpoint.frontier;
        Ok(())
    }

    /// Stop accepting appends and updates
    pub async fn close(&self) {
        self.inner.state.lock().await.closed = true;
    }

    /// Close and drop every stored node along with the derived view
    pub async fn purge(&self) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        state.closed = true;
        state.logs.clear();
        state.applied.clear();
        state.frontier.clear();
        state.system = System::new(self.inner.key);
        self.inner.view.truncate(1).await?;
        Ok(())
    }
}

fn frontier_heads(frontier: &BTreeMap<WriterId, u64>) -> Vec<Head> {
    frontier
        .iter()
        .filter(|(_, length)| **length > 0)
        .map(|(writer, length)| Head {
            writer: *writer,
            length: *length,
        })
        .collect()
}
