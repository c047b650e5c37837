//! Local writes. Every check runs before anything reaches the log.

use crate::content::clear_blocks;
use crate::context::DriveContext;
use crate::error::{DriveError, Result};
use crate::messages::{Entry, File, Operation, Version};
use crate::path::std_path;
use crate::read::Target;
use crate::session::Session;
use crate::tables;
use bytes::Bytes;
use pin_project::pin_project;
use polyblobs::{BlobWriter, Cleared};
use polyview::Snapshot;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::AsyncWrite;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PutOptions {
    pub executable: bool,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOptions {
    pub executable: bool,
    pub metadata: Option<serde_json::Value>,
    /// Write as a resolution of the path's conflicts
    pub resolve: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DelOptions {
    /// Also drop the locally stored content
    pub clear: bool,
    /// With `clear`, drop the content of every earlier version too
    pub history: bool,
    /// Report how many blocks were cleared
    pub diff: bool,
}

/// The version a conflicted path settles on
#[derive(Debug, Clone, PartialEq)]
pub enum Resolve {
    /// Settle on the path being deleted
    Remove,
    Data(Bytes),
    Entry(Entry),
}

async fn ensure_writable(ctx: &DriveContext, session: &Session) -> Result<()> {
    if !session.writable(ctx).await {
        return Err(DriveError::SessionNotWritable);
    }
    Ok(())
}

async fn ensure_no_conflict(view: &Snapshot, path: &str) -> Result<()> {
    if tables::has_conflicts(view, path).await? {
        return Err(DriveError::FileConflict(path.to_string()));
    }
    Ok(())
}

fn ensure_same_namespace(ctx: &DriveContext, owner: &Version, path: &str) -> Result<()> {
    let local = ctx.local();
    if ctx.namespace.same(&local, &owner.source) {
        return Ok(());
    }
    Err(DriveError::PermissionDenied {
        path: path.to_string(),
        writer: local.to_hex(),
    })
}

/// Checks shared by additions: the path is free of conflicts and was last
/// written from our namespace
async fn ensure_can_add(ctx: &DriveContext, view: &Snapshot, path: &str) -> Result<()> {
    ensure_no_conflict(view, path).await?;
    if let Some(latest) = tables::latest_version(view, path).await? {
        ensure_same_namespace(ctx, &latest, path)?;
    }
    Ok(())
}

pub(crate) async fn put(
    ctx: &DriveContext,
    session: &Session,
    path: &str,
    data: &[u8],
    options: PutOptions,
) -> Result<()> {
    ensure_writable(ctx, session).await?;
    let path = std_path(path, false)?;
    let view = session.snapshot(ctx).await;
    ensure_can_add(ctx, &view, &path).await?;

    let blob = ctx.blobs(None).await?.put(data).await?;
    let file = File {
        blob: Some(blob),
        executable: options.executable,
        linkname: None,
        metadata: options.metadata,
    };
    session
        .dispatch(ctx, vec![Operation::Addition { path, file }])
        .await
}

pub(crate) async fn del(ctx: &DriveContext, session: &Session, path: &str, options: DelOptions) -> Result<Option<Cleared>> {
    ensure_writable(ctx, session).await?;
    let path = std_path(path, false)?;
    let view = session.snapshot(ctx).await;

    let latest = match tables::latest_version(&view, &path).await? {
        Some(latest) if !latest.is_tombstone() => latest,
        _ => return Err(DriveError::FileNotFound(path)),
    };
    ensure_same_namespace(ctx, &latest, &path)?;
    ensure_no_conflict(&view, &path).await?;

    session
        .dispatch(ctx, vec![Operation::Deletion { path: path.clone() }])
        .await?;

    if !options.clear {
        return Ok(None);
    }
    let cleared = clear_blocks(ctx, &view, Target::Path(path), options.history).await?;
    Ok(options.diff.then_some(cleared))
}

/// Settle the conflicts of `path`. Does nothing when there are none.
pub(crate) async fn resolve(
    ctx: &DriveContext,
    session: &Session,
    path: &str,
    with: Resolve,
    options: PutOptions,
) -> Result<()> {
    ensure_writable(ctx, session).await?;
    let path = std_path(path, false)?;
    let view = session.snapshot(ctx).await;

    let Some(first) = tables::first_conflict(&view, &path).await? else {
        return Ok(());
    };
    ensure_same_namespace(ctx, &Version::file(first.source), &path)?;

    let file = match with {
        Resolve::Remove => None,
        Resolve::Data(data) => Some(File {
            blob: Some(ctx.blobs(None).await?.put(&data).await?),
            executable: options.executable,
            linkname: None,
            metadata: options.metadata,
        }),
        Resolve::Entry(entry) => Some(entry.file),
    };
    session
        .dispatch(ctx, vec![Operation::Resolution { path, file }])
        .await
}

pub(crate) async fn symlink(
    ctx: &DriveContext,
    session: &Session,
    path: &str,
    dest: &str,
    options: WriteOptions,
) -> Result<()> {
    ensure_writable(ctx, session).await?;
    let path = std_path(path, false)?;
    let file = File {
        blob: None,
        executable: options.executable,
        linkname: Some(dest.to_string()),
        metadata: options.metadata,
    };
    let op = if options.resolve {
        Operation::Resolution {
            path,
            file: Some(file),
        }
    } else {
        ensure_can_add(ctx, &session.snapshot(ctx).await, &path).await?;
        Operation::Addition { path, file }
    };
    session.dispatch(ctx, vec![op]).await
}

pub(crate) async fn write_stream(
    ctx: &Arc<DriveContext>,
    session: &Session,
    path: &str,
    options: WriteOptions,
) -> Result<FileWriter> {
    ensure_writable(ctx, session).await?;
    let path = std_path(path, false)?;
    if !options.resolve {
        ensure_can_add(ctx, &session.snapshot(ctx).await, &path).await?;
    }
    let blobs = ctx.blobs(None).await?;
    Ok(FileWriter {
        inner: blobs.writer(),
        ctx: Arc::clone(ctx),
        session: session.clone(),
        path,
        options,
        appending: None,
        done: false,
    })
}

type Appending = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Streams content into the local blob store and records the file once
/// shut down
#[pin_project]
pub struct FileWriter {
    #[pin]
    inner: BlobWriter,
    ctx: Arc<DriveContext>,
    session: Session,
    path: String,
    options: WriteOptions,
    appending: Option<Appending>,
    done: bool,
}

impl FileWriter {
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl AsyncWrite for FileWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.project();
        if *this.done || this.appending.is_some() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                DriveError::StreamClosed,
            )));
        }
        this.inner.poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut this = self.project();
        if *this.done {
            return Poll::Ready(Ok(()));
        }

        if this.appending.is_none() {
            ready!(this.inner.as_mut().poll_shutdown(cx))?;
            let blob = this
                .inner
                .id()
                .ok_or_else(|| io::Error::other(DriveError::StreamClosed))?;
            let file = File {
                blob: Some(blob),
                executable: this.options.executable,
                linkname: None,
                metadata: this.options.metadata.clone(),
            };
            let path = this.path.clone();
            let op = if this.options.resolve {
                Operation::Resolution {
                    path,
                    file: Some(file),
                }
            } else {
                Operation::Addition { path, file }
            };
            let ctx = Arc::clone(this.ctx);
            let session = this.session.clone();
            *this.appending = Some(Box::pin(async move { session.dispatch(&ctx, vec![op]).await }));
        }

        let result = match this.appending.as_mut() {
            Some(appending) => ready!(appending.as_mut().poll(cx)),
            None => Ok(()),
        };
        *this.appending = None;
        *this.done = true;
        Poll::Ready(result.map_err(io::Error::other))
    }
}
