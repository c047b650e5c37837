//! Local content management: prefetching, clearing and truncating
//!
//! Downloads are best effort. A range that cannot be fetched is logged and
//! skipped, the rest still proceeds.

use crate::context::DriveContext;
use crate::error::{DriveError, Result};
use crate::item::EntryItem;
use crate::keys::{files_range, folder_range};
use crate::messages::{Entry, VersionType};
use crate::path::{std_folder, std_path};
use crate::read::{Target, entry, list};
use crate::tables::{self, entry_item};
use diagnostics::*;
use futures::TryStreamExt;
use polyblobs::{Cleared, GetOptions};
use polylog::WriterId;
use polyview::{ScanOptions, Snapshot, View};
use std::ops::Bound;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    pub recursive: bool,
    /// Give up on a range after waiting this long
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearOptions {
    /// Clear the content of every earlier version as well
    pub history: bool,
    /// Report how many blocks were cleared
    pub diff: bool,
}

/// A block range of one writer's content core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub source: WriterId,
    pub start: u64,
    pub end: u64,
}

async fn download_entry(ctx: &DriveContext, entry: &Entry, options: &GetOptions) {
    let Some(blob) = entry.blob() else { return };
    let result = match ctx.blobs(Some(&entry.source)).await {
        Ok(blobs) => blobs.download(blob, options).await.map_err(DriveError::from),
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        debug!("skipping download from {writer}: {error}", writer: entry.source.to_hex(), error: e.to_string());
    }
}

/// Fetch the content of a file, or of everything listed in a folder
pub(crate) async fn download(ctx: &DriveContext, view: &Snapshot, path: &str, options: DownloadOptions) -> Result<()> {
    let get = GetOptions {
        wait: true,
        timeout: options.timeout,
    };
    if !path.ends_with('/') && std_path(path, false).is_ok() {
        if let Some(item) = entry(ctx, view, Target::from(path), false).await? {
            download_entry(ctx, &item.entry, &get).await;
            return Ok(());
        }
    }

    let items: Vec<EntryItem> = list(view.clone(), path, options.recursive)?.try_collect().await?;
    for item in items {
        download_entry(ctx, &item.entry, &get).await;
    }
    Ok(())
}

/// Fetch the content of every entry below `folder` that changed since
/// `version`
pub(crate) async fn download_diff(
    ctx: &DriveContext,
    view: &Snapshot,
    version: u64,
    folder: &str,
    options: DownloadOptions,
) -> Result<()> {
    let folder = std_folder(folder)?;
    let older = ctx.base.view().checkout(version).await?;
    let get = GetOptions {
        wait: true,
        timeout: options.timeout,
    };
    for item in view.diff(&older, &folder_range(&folder)) {
        if let Some(left) = item.left {
            download_entry(ctx, &entry_item(left)?.entry, &get).await;
        }
    }
    Ok(())
}

pub(crate) async fn download_range(ctx: &DriveContext, ranges: &[BlockRange], options: DownloadOptions) {
    let get = GetOptions {
        wait: true,
        timeout: options.timeout,
    };
    for range in ranges {
        let result = match ctx.core(&range.source).await {
            Ok(core) => core.download(range.start, range.end, &get).await.map_err(DriveError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            debug!(
                "skipping blocks {start}..{end} of {writer}: {error}",
                start: range.start,
                end: range.end,
                writer: range.source.to_hex(),
                error: e.to_string()
            );
        }
    }
}

async fn clear_entry(ctx: &DriveContext, entry: &Entry) -> Result<Cleared> {
    match entry.blob() {
        Some(blob) => Ok(ctx.blobs(Some(&entry.source)).await?.clear(blob).await?),
        None => Ok(Cleared::default()),
    }
}

/// Drop the local content of an entry, and of its earlier versions with
/// `history`
pub(crate) async fn clear_blocks(ctx: &DriveContext, view: &Snapshot, target: Target, history: bool) -> Result<Cleared> {
    let mut cleared = Cleared::default();
    let Some(item) = entry(ctx, view, target, false).await? else {
        return Ok(cleared);
    };
    cleared += clear_entry(ctx, &item.entry).await?;

    if history && !item.path.is_empty() {
        for (seq, version) in tables::versions(view, &item.path, ScanOptions::default()).await? {
            if version.kind != VersionType::File || seq == item.seq {
                continue;
            }
            if let Some(old) = tables::file_at(view, seq).await? {
                cleared += clear_entry(ctx, &old.entry).await?;
            }
        }
    }
    Ok(cleared)
}

pub(crate) async fn clear(ctx: &DriveContext, view: &Snapshot, target: Target, options: ClearOptions) -> Result<Option<Cleared>> {
    let cleared = clear_blocks(ctx, view, target, options.history).await?;
    Ok(options.diff.then_some(cleared))
}

/// Drop local content of every file. With `history` every writer's content
/// core is emptied, including blocks no current file refers to.
pub(crate) async fn clear_all(ctx: &DriveContext, view: &Snapshot, options: ClearOptions) -> Result<Option<Cleared>> {
    let mut cleared = Cleared::default();
    if options.history {
        let system = ctx.base.system().await;
        for (writer, _) in system.writers() {
            let core = ctx.core(writer).await?;
            let length = core.length().await;
            cleared.blocks += core.clear(0, length).await;
        }
    } else {
        let all = files_range(Bound::Unbounded, Bound::Unbounded);
        for item in view.scan(&all, ScanOptions::default()).await? {
            cleared += clear_entry(ctx, &entry_item(item)?.entry).await?;
        }
    }
    Ok(options.diff.then_some(cleared))
}

/// Number of blocks of `source`'s content core referenced by the files at
/// `version`
pub(crate) async fn blobs_length(ctx: &DriveContext, version: u64, source: &WriterId) -> Result<u64> {
    let snapshot = ctx.base.view().checkout(version).await?;
    let all = files_range(Bound::Unbounded, Bound::Unbounded);
    let mut length = 0;
    for item in snapshot.scan(&all, ScanOptions::default()).await? {
        let entry = entry_item(item)?.entry;
        if entry.source != *source {
            continue;
        }
        // refs that overflow cannot point into the core
        if let Some(end) = entry.blob().and_then(|blob| blob.block_end().ok()) {
            length = length.max(end);
        }
    }
    Ok(length)
}

/// Roll the local view back to `version` and the local content core back
/// to `blobs` blocks, by default the blocks referenced at that version
pub(crate) async fn truncate(ctx: &DriveContext, version: u64, blobs: Option<u64>) -> Result<()> {
    let length = ctx.base.view().version().await;
    if version > length {
        return Err(DriveError::BadArgument(format!(
            "Bad truncation length {version}, view has {length}"
        )));
    }

    let local = ctx.local();
    let blobs = match blobs {
        Some(blobs) => blobs,
        None => blobs_length(ctx, version, &local).await?,
    };
    let core = ctx.core(&local).await?;
    let available = core.length().await;
    if blobs > available {
        return Err(DriveError::BadArgument(format!(
            "Bad truncation length {blobs}, content has {available}"
        )));
    }

    ctx.base.truncate(version).await?;
    core.truncate(blobs).await?;
    info!("truncated to version {version}, {blobs} blocks", version, blobs);
    Ok(())
}
