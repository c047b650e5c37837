use crate::blob::{BlobRef, Cleared, GetOptions, ReadRange};
use crate::error::Result;
use crate::manifest::ContentKey;
use crate::store::CoreSession;
use crate::writer::BlobWriter;
use bytes::{Bytes, BytesMut};
use futures::Stream;

/// Blob access over one content core session
#[derive(Clone)]
pub struct Blobs {
    core: CoreSession,
    block_size: usize,
}

impl Blobs {
    pub fn new(core: CoreSession, block_size: usize) -> Self {
        Self {
            core,
            block_size: block_size.max(1),
        }
    }

    pub fn key(&self) -> ContentKey {
        self.core.key()
    }

    pub fn core(&self) -> &CoreSession {
        &self.core
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Store `data` as consecutive blocks
    pub async fn put(&self, data: &[u8]) -> Result<BlobRef> {
        let blocks: Vec<Bytes> = data
            .chunks(self.block_size)
            .map(Bytes::copy_from_slice)
            .collect();
        let block_length = blocks.len() as u64;
        let (block_offset, byte_offset) = self.core.append(blocks).await;
        Ok(BlobRef {
            block_offset,
            block_length,
            byte_offset,
            byte_length: data.len() as u64,
        })
    }

    pub async fn get(&self, blob: &BlobRef, options: &GetOptions) -> Result<Bytes> {
        if blob.block_length == 1 {
            return self.core.block(blob.block_offset, options).await;
        }
        // byte_length comes from the log and is not trusted for allocation
        let mut out = BytesMut::new();
        for index in blob.block_offset..blob.block_end()? {
            out.extend_from_slice(&self.core.block(index, options).await?);
        }
        Ok(out.freeze())
    }

    /// Drop the local copy of the blob's blocks
    pub async fn clear(&self, blob: &BlobRef) -> Result<Cleared> {
        let blocks = self.core.clear(blob.block_offset, blob.block_end()?).await;
        Ok(Cleared { blocks })
    }

    pub async fn download(&self, blob: &BlobRef, options: &GetOptions) -> Result<()> {
        self.core
            .download(blob.block_offset, blob.block_end()?, options)
            .await
    }

    /// Stream a byte window of the blob block by block
    pub fn read(
        &self,
        blob: BlobRef,
        range: ReadRange,
        options: GetOptions,
    ) -> impl Stream<Item = Result<Bytes>> + Send + 'static {
        let core = self.core.clone();
        let (start, end) = range.window(blob.byte_length);
        async_stream::try_stream! {
            let mut position = 0u64;
            for index in blob.block_offset..blob.block_end()? {
                if position >= end {
                    break;
                }
                let block = core.block(index, &options).await?;
                let size = block.len() as u64;
                let block_start = position;
                position += size;
                if position <= start {
                    continue;
                }
                let from = start.saturating_sub(block_start) as usize;
                let to = (end.min(position) - block_start) as usize;
                yield block.slice(from..to);
            }
        }
    }

    /// Streaming writer that stores everything written as one blob on shutdown
    pub fn writer(&self) -> BlobWriter {
        BlobWriter::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlobError;
    use crate::manifest::content_key;
    use crate::store::ContentStore;
    use futures::TryStreamExt;
    use polylog::WriterId;

    async fn blobs(block_size: usize) -> Blobs {
        let store = ContentStore::new();
        let core = store.open(content_key(&WriterId::random())).await;
        Blobs::new(core, block_size)
    }

    #[tokio::test]
    async fn test_put_chunks_into_blocks() {
        let blobs = blobs(4).await;
        let first = blobs.put(b"0123456789").await.unwrap();
        assert_eq!(first.block_length, 3);
        let second = blobs.put(b"ab").await.unwrap();
        assert_eq!(second.block_offset, 3);
        assert_eq!(second.byte_offset, 10);

        let data = blobs.get(&first, &GetOptions::local()).await.unwrap();
        assert_eq!(&data[..], b"0123456789");

        let empty = blobs.put(b"").await.unwrap();
        assert_eq!(empty.block_length, 0);
        assert!(blobs.get(&empty, &GetOptions::local()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_window_spans_blocks() {
        let blobs = blobs(4).await;
        let blob = blobs.put(b"0123456789").await.unwrap();
        let range = ReadRange { start: 3, end: Some(8), length: None };
        let chunks: Vec<Bytes> = blobs
            .read(blob, range, GetOptions::local())
            .try_collect()
            .await
            .unwrap();
        let joined: Vec<u8> = chunks.concat();
        assert_eq!(joined, b"345678".to_vec());
    }

    #[tokio::test]
    async fn test_malformed_refs_fail_without_panicking() {
        let blobs = blobs(4).await;
        let blob = blobs.put(b"abcdefgh").await.unwrap();

        let oversized = BlobRef {
            byte_length: u64::MAX,
            ..blob
        };
        let data = blobs.get(&oversized, &GetOptions::local()).await.unwrap();
        assert_eq!(&data[..], b"abcdefgh");

        let overflowing = BlobRef {
            block_offset: u64::MAX,
            block_length: 2,
            byte_offset: 0,
            byte_length: u64::MAX,
        };
        let local = GetOptions::local();
        assert!(matches!(blobs.get(&overflowing, &local).await, Err(BlobError::BadBlob { .. })));
        assert!(matches!(blobs.clear(&overflowing).await, Err(BlobError::BadBlob { .. })));
        assert!(blobs.download(&overflowing, &local).await.is_err());
        let streamed: Result<Vec<Bytes>> = blobs
            .read(overflowing, ReadRange::default(), local)
            .try_collect()
            .await;
        assert!(matches!(streamed, Err(BlobError::BadBlob { .. })));
    }

    #[tokio::test]
    async fn test_clear_reports_blocks() {
        let blobs = blobs(2).await;
        let blob = blobs.put(b"abcdef").await.unwrap();
        assert_eq!(blobs.clear(&blob).await.unwrap().blocks, 3);
        assert_eq!(blobs.clear(&blob).await.unwrap().blocks, 0);
        assert!(blobs.get(&blob, &GetOptions::local()).await.is_err());
    }
}
