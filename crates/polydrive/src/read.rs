//! Lookups, listings and content reads against a session's snapshot

use crate::context::DriveContext;
use crate::error::{DriveError, Result};
use crate::item::{DirEntry, EntryDiff, EntryItem, HistoryItem};
use crate::keys::{files_range, folder_range, path_of};
use crate::messages::{Entry, VersionType};
use crate::path::{resolve, std_folder, std_path};
use crate::shallow::shallow;
use crate::tables::{self, entry_item};
use bytes::Bytes;
use diagnostics::*;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use polyblobs::{BlobError, GetOptions, ReadRange};
use polyview::{ScanOptions, Snapshot, View};
use std::ops::Bound;
use std::time::Duration;

/// What to look up: a path, the sequence an entry was written at, or an
/// entry that is already at hand
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Path(String),
    Seq(u64),
    Entry(Entry),
}

impl From<&str> for Target {
    fn from(path: &str) -> Self {
        Target::Path(path.to_string())
    }
}

impl From<String> for Target {
    fn from(path: String) -> Self {
        Target::Path(path)
    }
}

impl From<u64> for Target {
    fn from(seq: u64) -> Self {
        Target::Seq(seq)
    }
}

impl From<Entry> for Target {
    fn from(entry: Entry) -> Self {
        Target::Entry(entry)
    }
}

impl From<&EntryItem> for Target {
    fn from(item: &EntryItem) -> Self {
        Target::Entry(item.entry.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Follow symlinks to the entry they point at
    pub follow: bool,
    /// Ask peers to open missing content, defaults to the drive config
    pub wakeup: Option<bool>,
    /// Block until missing content arrives
    pub wait: bool,
    pub timeout: Option<Duration>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            follow: false,
            wakeup: None,
            wait: true,
            timeout: None,
        }
    }
}

impl ReadOptions {
    pub fn follow() -> Self {
        Self {
            follow: true,
            ..Self::default()
        }
    }

    pub fn with_wakeup(mut self, wakeup: bool) -> Self {
        self.wakeup = Some(wakeup);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn blob_options(&self) -> GetOptions {
        GetOptions {
            wait: self.wait,
            timeout: self.timeout,
        }
    }
}

/// A range of paths in the Files table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRange {
    pub start: Bound<String>,
    pub end: Bound<String>,
    pub reverse: bool,
    pub limit: Option<usize>,
}

impl Default for EntryRange {
    fn default() -> Self {
        Self {
            start: Bound::Unbounded,
            end: Bound::Unbounded,
            reverse: false,
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryOptions {
    /// Oldest version first
    pub reverse: bool,
    pub limit: Option<usize>,
}

async fn lookup(view: &Snapshot, target: &Target) -> Result<Option<EntryItem>> {
    match target {
        Target::Path(path) => {
            if tables::has_conflicts(view, path).await? {
                return Err(DriveError::FileConflict(path.clone()));
            }
            tables::file(view, path).await
        }
        Target::Seq(seq) => tables::file_at(view, *seq).await,
        Target::Entry(entry) => Ok(Some(EntryItem {
            seq: 0,
            path: String::new(),
            entry: entry.clone(),
        })),
    }
}

/// Look up an entry, following at most `follow_limit` symlinks
pub(crate) async fn entry(
    ctx: &DriveContext,
    view: &Snapshot,
    target: Target,
    follow: bool,
) -> Result<Option<EntryItem>> {
    let mut target = match target {
        Target::Path(path) => Target::Path(std_path(&path, false)?),
        other => other,
    };
    for _ in 0..=ctx.config.follow_limit {
        let Some(item) = lookup(view, &target).await? else {
            return Ok(None);
        };
        let link = match item.entry.linkname() {
            Some(link) if follow && !item.path.is_empty() => resolve(&item.path, link),
            _ => return Ok(Some(item)),
        };
        target = Target::Path(link);
    }
    Err(DriveError::RecursiveSymlink)
}

/// Content of a file. Entries without a blob read as `None`.
///
/// Missing blocks are first requested without blocking. If that fails the
/// peers are woken up and the read is retried with the caller's wait and
/// timeout.
pub(crate) async fn get(
    ctx: &DriveContext,
    view: &Snapshot,
    target: Target,
    options: &ReadOptions,
) -> Result<Option<Bytes>> {
    let Some(item) = entry(ctx, view, target, options.follow).await? else {
        return Ok(None);
    };
    let Some(blob) = item.entry.blob().copied() else {
        return Ok(None);
    };
    let source = item.entry.source;
    let blobs = ctx.blobs(Some(&source)).await?;

    match blobs.get(&blob, &GetOptions::local()).await {
        Ok(bytes) => return Ok(Some(bytes)),
        Err(BlobError::BlockNotAvailable { index }) => {
            debug!("content of {path} not local, missing block {index}", path: item.path.clone(), index);
        }
        Err(e) => return Err(e.into()),
    }

    let wakeup = options.wakeup.unwrap_or(ctx.config.wakeup);
    if wakeup && crate::wakeup::wakeup(ctx, &source).await {
        return Ok(Some(blobs.get(&blob, &options.blob_options()).await?));
    }

    Err(if options.timeout.is_some() {
        DriveError::RequestTimeout
    } else {
        DriveError::BlockNotAvailable
    })
}

pub(crate) async fn exists(ctx: &DriveContext, view: &Snapshot, path: &str) -> Result<bool> {
    Ok(entry(ctx, view, Target::from(path), false).await?.is_some())
}

pub(crate) fn entries(view: Snapshot, range: EntryRange) -> BoxStream<'static, Result<EntryItem>> {
    async_stream::try_stream! {
        let options = ScanOptions {
            reverse: range.reverse,
            limit: range.limit,
        };
        let keys = files_range(range.start.as_ref().map(String::as_str), range.end.as_ref().map(String::as_str));
        for item in view.scan(&keys, options).await? {
            yield entry_item(item)?;
        }
    }
    .boxed()
}

/// Every entry below `folder`, or one entry per direct child
pub(crate) fn list(view: Snapshot, folder: &str, recursive: bool) -> Result<BoxStream<'static, Result<EntryItem>>> {
    let folder = std_folder(folder)?;
    if !recursive {
        return Ok(shallow(view, folder).map_ok(|dir| dir.item).boxed());
    }
    Ok(async_stream::try_stream! {
        for item in view.scan(&folder_range(&folder), ScanOptions::default()).await? {
            yield entry_item(item)?;
        }
    }
    .boxed())
}

pub(crate) fn readdir(view: Snapshot, folder: &str) -> Result<BoxStream<'static, Result<String>>> {
    let folder = std_folder(folder)?;
    Ok(shallow(view, folder).map_ok(|DirEntry { name, .. }| name).boxed())
}

/// Entries parked as conflicts at `path`, in the order they were recorded
pub(crate) fn conflicts(view: Snapshot, path: &str, options: ScanOptions) -> Result<BoxStream<'static, Result<Entry>>> {
    let path = std_path(path, false)?;
    Ok(async_stream::try_stream! {
        for (_, entry) in tables::conflicts(&view, &path, options).await? {
            yield entry;
        }
    }
    .boxed())
}

/// Versions of `path`, newest first unless `reverse` is set
pub(crate) fn history(
    view: Snapshot,
    path: &str,
    options: HistoryOptions,
) -> Result<BoxStream<'static, Result<HistoryItem>>> {
    let path = std_path(path, false)?;
    let scan = ScanOptions {
        reverse: !options.reverse,
        limit: options.limit,
    };
    Ok(async_stream::try_stream! {
        for (seq, version) in tables::versions(&view, &path, scan).await? {
            let entry = match version.kind {
                VersionType::Tombstone => None,
                VersionType::File => match tables::file_at(&view, seq).await? {
                    Some(item) => Some(item.entry),
                    None => continue,
                },
            };
            yield HistoryItem {
                seq,
                path: path.clone(),
                entry,
            };
        }
    }
    .boxed())
}

/// Paths below `folder` that differ between `older` and `view`
pub(crate) fn diff(view: Snapshot, older: Snapshot, folder: &str) -> Result<BoxStream<'static, Result<EntryDiff>>> {
    let folder = std_folder(folder)?;
    Ok(async_stream::try_stream! {
        for item in view.diff(&older, &folder_range(&folder)) {
            let path = path_of(&item.key)?;
            yield EntryDiff {
                path,
                left: item.left.map(entry_item).transpose()?,
                right: item.right.map(entry_item).transpose()?,
            };
        }
    }
    .boxed())
}

/// Stream a byte range of a file's content
pub(crate) async fn read_stream(
    ctx: &DriveContext,
    view: &Snapshot,
    target: Target,
    range: ReadRange,
    options: &ReadOptions,
) -> Result<BoxStream<'static, Result<Bytes>>> {
    let item = match entry(ctx, view, target.clone(), options.follow).await? {
        Some(item) => item,
        None => {
            let name = match target {
                Target::Path(path) => path,
                Target::Seq(seq) => format!("seq {seq}"),
                Target::Entry(_) => String::new(),
            };
            return Err(DriveError::FileNotFound(name));
        }
    };
    let Some(blob) = item.entry.blob().copied() else {
        return Ok(stream::empty().boxed());
    };
    let blobs = ctx.blobs(Some(&item.entry.source)).await?;
    Ok(blobs
        .read(blob, range, options.blob_options())
        .map_err(DriveError::from)
        .boxed())
}
