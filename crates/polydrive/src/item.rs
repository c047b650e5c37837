use crate::messages::Entry;
use std::cmp::Ordering;

/// A file entry as stored in the view, with the sequence it was written at
#[derive(Debug, Clone, PartialEq)]
pub struct EntryItem {
    pub seq: u64,
    pub path: String,
    pub entry: Entry,
}

impl EntryItem {
    /// Order by write sequence
    pub fn compare(a: &EntryItem, b: &EntryItem) -> Ordering {
        a.seq.cmp(&b.seq)
    }
}

/// One version of a path. `entry` is `None` for a deletion.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryItem {
    pub seq: u64,
    pub path: String,
    pub entry: Option<Entry>,
}

/// A path that differs between two versions of the drive
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDiff {
    pub path: String,
    /// State in the newer version
    pub left: Option<EntryItem>,
    /// State in the older version
    pub right: Option<EntryItem>,
}

/// Name of a direct child of a folder and the first entry found below it
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub item: EntryItem,
}
