use polylog::WriterId;
use sha2::{Digest, Sha256};
use std::fmt;

/// Name every polydrive namespace hash is derived from
const NAME: &str = "POLYDRIVE";

/// Index of the content namespace within `namespace(NAME, _)`
pub const BLOBS_NAMESPACE_INDEX: u8 = 0;

/// Signer namespace of a writer's main log
pub const DEFAULT_NAMESPACE: [u8; 32] = [0; 32];

/// Derive the `index`-th 32 byte namespace of `name`
pub fn namespace(name: &str, index: u8) -> [u8; 32] {
    let base = Sha256::digest(name.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(base);
    hasher.update([index]);
    hasher.finalize().into()
}

/// Key of a content core
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey([u8; 32]);

impl ContentKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentKey({})", &hex::encode(self.0)[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signer {
    pub public_key: [u8; 32],
    pub namespace: [u8; 32],
}

/// Description of who may sign a log. Its hash is the log's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub version: u8,
    pub quorum: u32,
    pub signers: Vec<Signer>,
}

impl Manifest {
    /// Manifest of a writer's main log: one signer, default namespace
    pub fn for_writer(writer: &WriterId) -> Self {
        Self {
            version: 0,
            quorum: 1,
            signers: vec![Signer {
                public_key: *writer.as_bytes(),
                namespace: DEFAULT_NAMESPACE,
            }],
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.signers.len() * 64);
        out.push(self.version);
        out.extend_from_slice(&self.quorum.to_le_bytes());
        out.push(self.signers.len() as u8);
        for signer in &self.signers {
            out.extend_from_slice(&signer.public_key);
            out.extend_from_slice(&signer.namespace);
        }
        out
    }

    pub fn key(&self) -> [u8; 32] {
        Sha256::digest(self.encode()).into()
    }

    /// Manifest of the content core paired with this log
    ///
    /// Same signers, each namespace rehashed with the content namespace and
    /// this manifest's key, so the pairing needs no key exchange.
    pub fn content(&self) -> Self {
        let key = self.key();
        let blobs = namespace(NAME, BLOBS_NAMESPACE_INDEX);
        let signers = self
            .signers
            .iter()
            .map(|s| {
                let mut hasher = Sha256::new();
                hasher.update(blobs);
                hasher.update(key);
                hasher.update(s.namespace);
                Signer {
                    public_key: s.public_key,
                    namespace: hasher.finalize().into(),
                }
            })
            .collect();
        Self {
            version: self.version,
            quorum: self.quorum,
            signers,
        }
    }
}

/// Content core key of `writer`, computable by anyone who knows the writer
pub fn content_key(writer: &WriterId) -> ContentKey {
    ContentKey(Manifest::for_writer(writer).content().key())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_key_is_deterministic_per_writer() {
        let a = WriterId::from_bytes([7; 32]);
        let b = WriterId::from_bytes([8; 32]);
        assert_eq!(content_key(&a), content_key(&a));
        assert_ne!(content_key(&a), content_key(&b));

        let writer = Manifest::for_writer(&a);
        let content = writer.content();
        assert_eq!(content.signers[0].public_key, *a.as_bytes());
        assert_ne!(content.signers[0].namespace, DEFAULT_NAMESPACE);
        assert_ne!(content.key(), writer.key());
    }

    #[test]
    fn test_namespaces_are_distinct() {
        assert_ne!(namespace(NAME, 0), namespace(NAME, 1));
        assert_ne!(namespace(NAME, 0), namespace("OTHER", 0));
    }
}
