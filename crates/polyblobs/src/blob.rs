use crate::error::{BlobError, Result};
use std::time::Duration;

/// Location of one blob inside a content core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlobRef {
    pub block_offset: u64,
    pub block_length: u64,
    pub byte_offset: u64,
    pub byte_length: u64,
}

impl BlobRef {
    /// One past the last block of the blob
    pub fn block_end(&self) -> Result<u64> {
        self.block_offset
            .checked_add(self.block_length)
            .ok_or(BlobError::BadBlob {
                block_offset: self.block_offset,
                block_length: self.block_length,
            })
    }
}

/// How a read behaves when blocks are missing locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetOptions {
    /// Wait for peers instead of failing with BlockNotAvailable
    pub wait: bool,
    pub timeout: Option<Duration>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            wait: true,
            timeout: None,
        }
    }
}

impl GetOptions {
    pub fn local() -> Self {
        Self {
            wait: false,
            timeout: None,
        }
    }
}

/// Byte window of a streamed read. `end` is inclusive and wins over `length`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadRange {
    pub start: u64,
    pub end: Option<u64>,
    pub length: Option<u64>,
}

impl ReadRange {
    /// Resolve to a half-open window within a blob of `size` bytes
    pub(crate) fn window(&self, size: u64) -> (u64, u64) {
        let start = self.start.min(size);
        let end = match (self.end, self.length) {
            (Some(end), _) => end.saturating_add(1),
            (None, Some(length)) => start.saturating_add(length),
            (None, None) => size,
        };
        (start, end.clamp(start, size))
    }
}

/// Result of clearing blob storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cleared {
    pub blocks: u64,
}

impl std::ops::AddAssign for Cleared {
    fn add_assign(&mut self, other: Self) {
        self.blocks += other.blocks;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_end_overflow() {
        let blob = BlobRef {
            block_offset: u64::MAX,
            block_length: 2,
            ..BlobRef::default()
        };
        assert!(matches!(blob.block_end(), Err(BlobError::BadBlob { .. })));
        let blob = BlobRef {
            block_offset: 3,
            block_length: 2,
            ..BlobRef::default()
        };
        assert_eq!(blob.block_end().unwrap(), 5);
    }

    #[test]
    fn test_read_window() {
        assert_eq!(ReadRange::default().window(10), (0, 10));
        let end = ReadRange { start: 2, end: Some(4), length: Some(100) };
        assert_eq!(end.window(10), (2, 5));
        let len = ReadRange { start: 8, end: None, length: Some(5) };
        assert_eq!(len.window(10), (8, 10));
        let past = ReadRange { start: 20, end: None, length: None };
        assert_eq!(past.window(10), (10, 10));
    }
}
