use crate::blob::BlobRef;
use crate::blobs::Blobs;
use crate::error::Result;
use diagnostics::*;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

type StoreFuture = Pin<Box<dyn Future<Output = Result<BlobRef>> + Send>>;

/// Buffers written bytes and stores them as a single blob on shutdown
pub struct BlobWriter {
    blobs: Blobs,
    buffer: Vec<u8>,
    storing: Option<StoreFuture>,
    id: Option<BlobRef>,
}

impl BlobWriter {
    pub(crate) fn new(blobs: Blobs) -> Self {
        Self {
            blobs,
            buffer: Vec::new(),
            storing: None,
            id: None,
        }
    }

    /// Location of the stored blob, once shutdown completed
    pub fn id(&self) -> Option<BlobRef> {
        self.id
    }
}

fn closed() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::BrokenPipe, "blob writer already finished")
}

impl AsyncWrite for BlobWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        if this.storing.is_some() || this.id.is_some() {
            return Poll::Ready(Err(closed()));
        }
        this.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();
        if this.id.is_some() {
            return Poll::Ready(Ok(()));
        }

        let storing = this.storing.get_or_insert_with(|| {
            let blobs = this.blobs.clone();
            let content = std::mem::take(&mut this.buffer);
            debug!("storing {size} buffered bytes", size: content.len());
            Box::pin(async move { blobs.put(&content).await })
        });

        match storing.as_mut().poll(cx) {
            Poll::Ready(Ok(blob)) => {
                this.storing = None;
                this.id = Some(blob);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                this.storing = None;
                Poll::Ready(Err(std::io::Error::other(e)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::blob::GetOptions;
    use crate::blobs::Blobs;
    use crate::manifest::content_key;
    use crate::store::ContentStore;
    use polylog::WriterId;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_writer_stores_on_shutdown() {
        let store = ContentStore::new();
        let blobs = Blobs::new(store.open(content_key(&WriterId::random())).await, 3);
        let mut writer = blobs.writer();
        writer.write_all(b"hello ").await.unwrap();
        writer.write_all(b"world").await.unwrap();
        assert!(writer.id().is_none());
        writer.shutdown().await.unwrap();

        let blob = writer.id().unwrap();
        assert_eq!(blob.byte_length, 11);
        assert_eq!(blob.block_length, 4);
        let data = blobs.get(&blob, &GetOptions::local()).await.unwrap();
        assert_eq!(&data[..], b"hello world");
        assert!(writer.write_all(b"!").await.is_err());
    }
}
