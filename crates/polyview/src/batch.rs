use crate::error::Result;
use crate::memory::MemoryView;
use crate::range::{KeyRange, ScanOptions};
use crate::snapshot::Snapshot;
use crate::{Item, Mutation, View};
use async_trait::async_trait;
use bytes::Bytes;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::iter::Peekable;

/// Pending mutations layered over a snapshot of the live view
///
/// Reads see the pending mutations. Nothing is visible to other readers
/// until `flush` commits the whole batch at once.
pub struct ViewBatch {
    view: MemoryView,
    base: Snapshot,
    pending: Vec<Mutation>,
    overlay: BTreeMap<Vec<u8>, Option<Item>>,
}

impl ViewBatch {
    pub(crate) fn new(view: MemoryView, base: Snapshot) -> Self {
        Self {
            view,
            base,
            pending: Vec::new(),
            overlay: BTreeMap::new(),
        }
    }

    /// Version the view will have once this batch is flushed
    pub fn version(&self) -> u64 {
        self.base.version + self.pending.len() as u64
    }

    pub fn base_version(&self) -> u64 {
        self.base.version
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Record a put and return the sequence it was assigned
    pub fn put(&mut self, key: Vec<u8>, value: Bytes) -> u64 {
        let seq = self.version();
        self.pending.push(Mutation {
            key: key.clone(),
            value: Some(value.clone()),
        });
        _ = self.overlay.insert(key.clone(), Some(Item { seq, key, value }));
        seq
    }

    /// Record a delete. Deleting an absent key is not a mutation and
    /// returns false.
    pub fn del(&mut self, key: &[u8]) -> bool {
        let present = match self.overlay.get(key) {
            Some(item) => item.is_some(),
            None => self.base.index.contains_key(key),
        };
        if !present {
            return false;
        }
        self.pending.push(Mutation {
            key: key.to_vec(),
            value: None,
        });
        _ = self.overlay.insert(key.to_vec(), None);
        true
    }

    /// Commit every pending mutation. Returns the new view version.
    pub async fn flush(self) -> Result<u64> {
        let view = self.view.clone();
        view.commit(self.base.version, self.pending).await
    }
}

#[async_trait]
impl View for ViewBatch {
    fn version(&self) -> u64 {
        ViewBatch::version(self)
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Item>> {
        match self.overlay.get(key) {
            Some(item) => Ok(item.clone()),
            None => self.base.get(key).await,
        }
    }

    async fn get_by_seq(&self, seq: u64) -> Result<Option<Item>> {
        if seq < self.base.version {
            return self.base.get_by_seq(seq).await;
        }
        let offset = (seq - self.base.version) as usize;
        Ok(self.pending.get(offset).and_then(|mutation| {
            mutation.value.as_ref().map(|value| Item {
                seq,
                key: mutation.key.clone(),
                value: value.clone(),
            })
        }))
    }

    async fn scan(&self, range: &KeyRange, options: ScanOptions) -> Result<Vec<Item>> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let base = self.base.index.range::<[u8], _>(range.bounds());
        let overlay = self.overlay.range::<[u8], _>(range.bounds());
        let items = if options.reverse {
            merge(base.rev().peekable(), overlay.rev().peekable(), true, options.max())
        } else {
            merge(base.peekable(), overlay.peekable(), false, options.max())
        };
        Ok(items)
    }
}

fn merge<'a, B, O>(mut base: Peekable<B>, mut overlay: Peekable<O>, reverse: bool, limit: usize) -> Vec<Item>
where
    B: Iterator<Item = (&'a Vec<u8>, &'a Item)>,
    O: Iterator<Item = (&'a Vec<u8>, &'a Option<Item>)>,
{
    let mut out = Vec::new();
    while out.len() < limit {
        let from_overlay = match (base.peek(), overlay.peek()) {
            (None, None) => break,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (Some((b, _)), Some((o, _))) => {
                let order = if reverse { o.cmp(b) } else { b.cmp(o) };
                match order {
                    Ordering::Less => false,
                    Ordering::Greater => true,
                    Ordering::Equal => {
                        // overlay shadows the base entry
                        _ = base.next();
                        true
                    }
                }
            }
        };
        if from_overlay {
            if let Some((_, Some(item))) = overlay.next() {
                out.push(item.clone());
            }
        } else if let Some((_, item)) = base.next() {
            out.push(item.clone());
        }
    }
    out
}
