use bytes::Bytes;
use polylog::WriterId;
use std::fmt;
use std::sync::Arc;

type NamespaceFn = dyn Fn(&WriterId) -> Bytes + Send + Sync;

/// Maps each writer to the namespace it is allowed to write in
///
/// A writer may only modify a path last written by a writer in the same
/// namespace. The default puts every writer in one shared namespace.
#[derive(Clone)]
pub struct Namespace(Arc<NamespaceFn>);

impl Namespace {
    pub fn new(f: impl Fn(&WriterId) -> Bytes + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Every writer shares a single namespace
    pub fn constant() -> Self {
        Self::new(|_| Bytes::new())
    }

    /// Every writer is its own namespace
    pub fn identity() -> Self {
        Self::new(|writer| Bytes::copy_from_slice(writer.as_bytes()))
    }

    pub fn of(&self, writer: &WriterId) -> Bytes {
        (self.0)(writer)
    }

    pub fn same(&self, a: &WriterId, b: &WriterId) -> bool {
        a == b || self.of(a) == self.of(b)
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::constant()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Namespace(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces() {
        let a = WriterId::from_bytes([1; 32]);
        let b = WriterId::from_bytes([2; 32]);
        assert!(Namespace::default().same(&a, &b));
        assert!(!Namespace::identity().same(&a, &b));
        assert!(Namespace::identity().same(&a, &a));

        let team = Namespace::new(|w| Bytes::from(vec![w.as_bytes()[0] % 2]));
        assert!(team.same(&a, &WriterId::from_bytes([3; 32])));
    }
}
