use crate::writer::WriterId;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterInfo {
    pub indexer: bool,
    pub removed: bool,
}

/// The writer set as derived from applied Writer operations
///
/// Removed writers keep their entry: their history stays part of the
/// linearization, they only lose the right to append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct System {
    bootstrap: WriterId,
    writers: BTreeMap<WriterId, WriterInfo>,
}

impl System {
    pub fn new(bootstrap: WriterId) -> Self {
        let mut writers = BTreeMap::new();
        _ = writers.insert(
            bootstrap,
            WriterInfo {
                indexer: true,
                removed: false,
            },
        );
        Self { bootstrap, writers }
    }

    pub fn bootstrap(&self) -> WriterId {
        self.bootstrap
    }

    /// Returns true if the writer set changed
    pub fn add_writer(&mut self, key: WriterId, indexer: bool) -> bool {
        let info = WriterInfo {
            indexer,
            removed: false,
        };
        self.writers.insert(key, info) != Some(info)
    }

    pub fn remove_writer(&mut self, key: WriterId) -> bool {
        match self.writers.get_mut(&key) {
            Some(info) if !info.removed => {
                info.removed = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_writer(&self, key: &WriterId) -> bool {
        self.writers.get(key).is_some_and(|info| !info.removed)
    }

    pub fn info(&self, key: &WriterId) -> Option<WriterInfo> {
        self.writers.get(key).copied()
    }

    /// Every writer whose log takes part in the linearization
    pub fn linearized(&self) -> BTreeSet<WriterId> {
        self.writers.keys().copied().collect()
    }

    pub fn writers(&self) -> impl Iterator<Item = (&WriterId, &WriterInfo)> {
        self.writers.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_writers_stay_linearized() {
        let a = WriterId::from_bytes([1; 32]);
        let b = WriterId::from_bytes([2; 32]);
        let mut system = System::new(a);
        assert!(system.add_writer(b, false));
        assert!(!system.add_writer(b, false));
        assert!(system.is_writer(&b));

        assert!(system.remove_writer(b));
        assert!(!system.remove_writer(b));
        assert!(!system.is_writer(&b));
        assert!(system.linearized().contains(&b));

        // adding again restores write access
        assert!(system.add_writer(b, true));
        assert!(system.is_writer(&b));
        assert!(system.info(&b).unwrap().indexer);
    }
}
