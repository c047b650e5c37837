//! When a write does not follow the latest version of a path
//!
//! A write conflicts when the path already has unresolved conflicts, or when
//! the latest version came from another writer and the write was made
//! without having seen everything the log had merged at that point.

use crate::messages::Version;
use polylog::{Head, WriterId};

/// Whether two head sets name exactly the same writer lengths
pub fn same_heads(a: &[Head], b: &[Head]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| x.writer == y.writer && x.length == y.length)
}

pub fn is_conflict(
    has_conflicts: bool,
    latest: Option<&Version>,
    source: &WriterId,
    heads: &[Head],
    merged: &[Head],
) -> bool {
    if has_conflicts {
        return true;
    }
    match latest {
        Some(version) => version.source != *source && !same_heads(heads, merged),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(byte: u8, length: u64) -> Head {
        Head {
            writer: WriterId::from_bytes([byte; 32]),
            length,
        }
    }

    #[test]
    fn test_same_heads_compares_lengths() {
        assert!(same_heads(&[head(1, 2)], &[head(1, 2)]));
        assert!(!same_heads(&[head(1, 2)], &[head(1, 3)]));
        assert!(!same_heads(&[head(1, 2)], &[head(1, 2), head(2, 1)]));
        assert!(same_heads(&[], &[]));
    }

    #[test]
    fn test_conflict_rules() {
        let a = WriterId::from_bytes([1; 32]);
        let b = WriterId::from_bytes([2; 32]);
        let seen = [head(1, 1)];
        let unseen = [head(1, 1), head(2, 1)];

        assert!(!is_conflict(false, None, &a, &seen, &unseen));
        assert!(!is_conflict(false, Some(&Version::file(a)), &a, &seen, &unseen));
        assert!(!is_conflict(false, Some(&Version::file(b)), &a, &unseen, &unseen));
        assert!(is_conflict(false, Some(&Version::file(b)), &a, &seen, &unseen));
        assert!(is_conflict(true, Some(&Version::file(a)), &a, &unseen, &unseen));
    }
}
