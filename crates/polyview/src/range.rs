use std::ops::Bound;

/// A range of keys. Both ends may be open, inclusive or exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start: Bound<Vec<u8>>,
    pub end: Bound<Vec<u8>>,
}

impl KeyRange {
    pub fn new(start: Bound<Vec<u8>>, end: Bound<Vec<u8>>) -> Self {
        Self { start, end }
    }

    pub fn all() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    /// Keys strictly between `gt` and `lt`
    pub fn between(gt: Vec<u8>, lt: Vec<u8>) -> Self {
        Self::new(Bound::Excluded(gt), Bound::Excluded(lt))
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        let above = match &self.start {
            Bound::Unbounded => true,
            Bound::Included(start) => key >= start.as_slice(),
            Bound::Excluded(start) => key > start.as_slice(),
        };
        let below = match &self.end {
            Bound::Unbounded => true,
            Bound::Included(end) => key <= end.as_slice(),
            Bound::Excluded(end) => key < end.as_slice(),
        };
        above && below
    }

    /// True when no key can fall inside the range. `BTreeMap::range` panics
    /// on such ranges so every scan checks this first.
    pub fn is_empty(&self) -> bool {
        match (&self.start, &self.end) {
            (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
            (Bound::Included(s), Bound::Included(e)) => s > e,
            (Bound::Included(s), Bound::Excluded(e))
            | (Bound::Excluded(s), Bound::Included(e))
            | (Bound::Excluded(s), Bound::Excluded(e)) => s >= e,
        }
    }

    pub(crate) fn bounds(&self) -> (Bound<&[u8]>, Bound<&[u8]>) {
        (
            self.start.as_ref().map(Vec::as_slice),
            self.end.as_ref().map(Vec::as_slice),
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl ScanOptions {
    pub fn reverse() -> Self {
        Self { reverse: true, limit: None }
    }

    pub(crate) fn max(&self) -> usize {
        self.limit.unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_exclusive() {
        let range = KeyRange::between(b"/a/".to_vec(), b"/a0".to_vec());
        assert!(range.contains(b"/a/b"));
        assert!(!range.contains(b"/a/"));
        assert!(!range.contains(b"/a0"));
        assert!(!range.contains(b"/b"));
    }

    #[test]
    fn test_empty_ranges() {
        assert!(!KeyRange::all().is_empty());
        assert!(KeyRange::between(b"b".to_vec(), b"a".to_vec()).is_empty());
        assert!(KeyRange::between(b"a".to_vec(), b"a".to_vec()).is_empty());
        assert!(
            !KeyRange::new(Bound::Included(b"a".to_vec()), Bound::Included(b"a".to_vec()))
                .is_empty()
        );
    }
}
