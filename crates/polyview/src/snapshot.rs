use crate::error::Result;
use crate::range::{KeyRange, ScanOptions};
use crate::{Item, Mutation, View};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::iter::Peekable;
use std::sync::Arc;

pub(crate) type Index = BTreeMap<Vec<u8>, Item>;

/// Immutable view of the state at one version
///
/// Cloning is cheap: the index and the mutation log are shared until the
/// live view next commits.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub(crate) version: u64,
    pub(crate) index: Arc<Index>,
    pub(crate) log: Arc<Vec<Mutation>>,
}

/// A key whose value differs between two versions. `left` is the newer side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffItem {
    pub key: Vec<u8>,
    pub left: Option<Item>,
    pub right: Option<Item>,
}

impl Snapshot {
    pub(crate) fn empty() -> Self {
        Self {
            version: 1,
            index: Arc::new(Index::new()),
            log: Arc::new(Vec::new()),
        }
    }

    /// Rebuild the index from the first `version - 1` mutations of `log`
    pub(crate) fn replay(log: &[Mutation], version: u64) -> Self {
        let count = (version.saturating_sub(1) as usize).min(log.len());
        let mut index = Index::new();
        for (i, mutation) in log[..count].iter().enumerate() {
            match &mutation.value {
                Some(value) => {
                    let item = Item {
                        seq: i as u64 + 1,
                        key: mutation.key.clone(),
                        value: value.clone(),
                    };
                    _ = index.insert(mutation.key.clone(), item);
                }
                None => {
                    _ = index.remove(&mutation.key);
                }
            }
        }
        Self {
            version: count as u64 + 1,
            index: Arc::new(index),
            log: Arc::new(log[..count].to_vec()),
        }
    }

    pub(crate) fn lookup_seq(log: &[Mutation], seq: u64) -> Option<Item> {
        if seq == 0 {
            return None;
        }
        let mutation = log.get(seq as usize - 1)?;
        mutation.value.as_ref().map(|value| Item {
            seq,
            key: mutation.key.clone(),
            value: value.clone(),
        })
    }

    pub(crate) fn scan_index(index: &Index, range: &KeyRange, options: ScanOptions) -> Vec<Item> {
        if range.is_empty() {
            return Vec::new();
        }
        let iter = index.range::<[u8], _>(range.bounds()).map(|(_, item)| item.clone());
        if options.reverse {
            iter.rev().take(options.max()).collect()
        } else {
            iter.take(options.max()).collect()
        }
    }

    /// Keys in `range` whose items differ between `self` and `older`
    pub fn diff(&self, older: &Snapshot, range: &KeyRange) -> Vec<DiffItem> {
        if range.is_empty() {
            return Vec::new();
        }
        let left = self.index.range::<[u8], _>(range.bounds()).peekable();
        let right = older.index.range::<[u8], _>(range.bounds()).peekable();
        diff_sorted(left, right)
    }
}

fn diff_sorted<'a, L, R>(mut left: Peekable<L>, mut right: Peekable<R>) -> Vec<DiffItem>
where
    L: Iterator<Item = (&'a Vec<u8>, &'a Item)>,
    R: Iterator<Item = (&'a Vec<u8>, &'a Item)>,
{
    let mut out = Vec::new();
    loop {
        let order = match (left.peek(), right.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((l, _)), Some((r, _))) => l.cmp(r),
        };
        match order {
            Ordering::Less => {
                if let Some((key, item)) = left.next() {
                    out.push(DiffItem { key: key.clone(), left: Some(item.clone()), right: None });
                }
            }
            Ordering::Greater => {
                if let Some((key, item)) = right.next() {
                    out.push(DiffItem { key: key.clone(), left: None, right: Some(item.clone()) });
                }
            }
            Ordering::Equal => {
                if let (Some((key, l)), Some((_, r))) = (left.next(), right.next()) {
                    if l.seq != r.seq || l.value != r.value {
                        out.push(DiffItem {
                            key: key.clone(),
                            left: Some(l.clone()),
                            right: Some(r.clone()),
                        });
                    }
                }
            }
        }
    }
    out
}

#[async_trait]
impl View for Snapshot {
    fn version(&self) -> u64 {
        self.version
    }

    async fn get(&self, key: &[u8]) -> Result<Option<Item>> {
        Ok(self.index.get(key).cloned())
    }

    async fn get_by_seq(&self, seq: u64) -> Result<Option<Item>> {
        if seq >= self.version {
            return Ok(None);
        }
        Ok(Self::lookup_seq(&self.log, seq))
    }

    async fn scan(&self, range: &KeyRange, options: ScanOptions) -> Result<Vec<Item>> {
        Ok(Self::scan_index(&self.index, range, options))
    }
}
