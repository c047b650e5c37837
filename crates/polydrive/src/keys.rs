//! Key layout of the three tables stored in the view
//!
//! - Files:     `0x01 ‖ path`
//! - History:   `0x02 ‖ path ‖ 0x00 ‖ seq (u64 big endian)`
//! - Conflicts: `0x03 ‖ path ‖ 0x00 ‖ seq (u64 big endian)`
//!
//! Paths never contain NUL, so the separator keeps one path's records
//! contiguous and ordered by sequence.

use crate::error::{DriveError, Result};
use polyview::KeyRange;
use std::ops::Bound;

const FILES: u8 = 0x01;
const HISTORY: u8 = 0x02;
const CONFLICTS: u8 = 0x03;
const SEPARATOR: u8 = 0x00;

pub(crate) fn files_key(path: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(path.len() + 1);
    key.push(FILES);
    key.extend_from_slice(path.as_bytes());
    key
}

pub(crate) fn is_files_key(key: &[u8]) -> bool {
    key.first() == Some(&FILES)
}

pub(crate) fn path_of(key: &[u8]) -> Result<String> {
    match key.split_first() {
        Some((&FILES, path)) => String::from_utf8(path.to_vec())
            .map_err(|e| DriveError::decode(format!("file key: {e}"))),
        _ => Err(DriveError::decode("not a file key")),
    }
}

fn seq_key(table: u8, path: &str, seq: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(path.len() + 10);
    key.push(table);
    key.extend_from_slice(path.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// All sequences of one path, excluding the header sequence 0
fn seq_range(table: u8, path: &str) -> KeyRange {
    KeyRange::new(
        Bound::Excluded(seq_key(table, path, 0)),
        Bound::Included(seq_key(table, path, u64::MAX)),
    )
}

pub(crate) fn history_key(path: &str, seq: u64) -> Vec<u8> {
    seq_key(HISTORY, path, seq)
}

pub(crate) fn history_range(path: &str) -> KeyRange {
    seq_range(HISTORY, path)
}

pub(crate) fn conflict_key(path: &str, seq: u64) -> Vec<u8> {
    seq_key(CONFLICTS, path, seq)
}

pub(crate) fn conflict_range(path: &str) -> KeyRange {
    seq_range(CONFLICTS, path)
}

/// Sequence suffix of a history or conflict key
pub(crate) fn seq_of(key: &[u8]) -> Result<u64> {
    let split = key
        .len()
        .checked_sub(8)
        .ok_or_else(|| DriveError::decode("short sequence key"))?;
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&key[split..]);
    Ok(u64::from_be_bytes(seq))
}

/// File keys strictly between `folder ‖ after` and `folder ‖ "0"`
///
/// `"0"` is the byte after `"/"`, so with `after = "/"` this covers every
/// path below `folder`. `folder` has no trailing slash; the root is `""`.
pub(crate) fn prefix_range(folder: &str, after: &str) -> KeyRange {
    let mut start = files_key(folder);
    start.extend_from_slice(after.as_bytes());
    let mut end = files_key(folder);
    end.push(b'0');
    KeyRange::between(start, end)
}

pub(crate) fn folder_range(folder: &str) -> KeyRange {
    prefix_range(folder, "/")
}

/// File keys between two paths; an unbounded end covers the whole table
pub(crate) fn files_range(start: Bound<&str>, end: Bound<&str>) -> KeyRange {
    let start = match start {
        Bound::Unbounded => Bound::Excluded(vec![FILES]),
        bound => bound.map(files_key),
    };
    let end = match end {
        Bound::Unbounded => Bound::Excluded(vec![HISTORY]),
        bound => bound.map(files_key),
    };
    KeyRange::new(start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_range_excludes_siblings() {
        let range = folder_range("/a");
        assert!(range.contains(&files_key("/a/b")));
        assert!(range.contains(&files_key("/a/b/c")));
        assert!(!range.contains(&files_key("/a")));
        assert!(!range.contains(&files_key("/ab")));
        assert!(!range.contains(&files_key("/a0")));
        assert!(folder_range("").contains(&files_key("/x")));
    }

    #[test]
    fn test_files_range() {
        let all = files_range(Bound::Unbounded, Bound::Unbounded);
        assert!(all.contains(&files_key("/")));
        assert!(!all.contains(&history_key("/a", 1)));
        let some = files_range(Bound::Included("/b"), Bound::Excluded("/d"));
        assert!(some.contains(&files_key("/b")));
        assert!(some.contains(&files_key("/c/x")));
        assert!(!some.contains(&files_key("/d")));
    }

    #[test]
    fn test_history_is_per_path_and_ordered() {
        let range = history_range("/a");
        assert!(range.contains(&history_key("/a", 1)));
        assert!(range.contains(&history_key("/a", u64::MAX)));
        assert!(!range.contains(&history_key("/a", 0)));
        assert!(!range.contains(&history_key("/a/b", 1)));
        assert!(history_key("/a", 2) < history_key("/a", 256));
        assert!(!range.contains(&conflict_key("/a", 1)));
        assert_eq!(seq_of(&history_key("/a", 77)).unwrap(), 77);
    }
}
