//! Typed access to the Files, History and Conflicts tables of a view

use crate::error::Result;
use crate::item::EntryItem;
use crate::keys::{conflict_range, files_key, history_range, is_files_key, path_of, seq_of};
use crate::messages::{Decode, Entry, Version};
use polyview::{Item, ScanOptions, View};

pub(crate) fn entry_item(item: Item) -> Result<EntryItem> {
    Ok(EntryItem {
        seq: item.seq,
        path: path_of(&item.key)?,
        entry: Entry::from_bytes(&item.value)?,
    })
}

pub(crate) async fn file<V: View + ?Sized>(view: &V, path: &str) -> Result<Option<EntryItem>> {
    view.get(&files_key(path)).await?.map(entry_item).transpose()
}

/// The file entry written at `seq`, if that mutation was a file put
pub(crate) async fn file_at<V: View + ?Sized>(view: &V, seq: u64) -> Result<Option<EntryItem>> {
    match view.get_by_seq(seq).await? {
        Some(item) if is_files_key(&item.key) => entry_item(item).map(Some),
        _ => Ok(None),
    }
}

pub(crate) async fn versions<V: View + ?Sized>(
    view: &V,
    path: &str,
    options: ScanOptions,
) -> Result<Vec<(u64, Version)>> {
    view.scan(&history_range(path), options)
        .await?
        .into_iter()
        .map(|item| Ok((seq_of(&item.key)?, Version::from_bytes(&item.value)?)))
        .collect()
}

pub(crate) async fn latest_version<V: View + ?Sized>(view: &V, path: &str) -> Result<Option<Version>> {
    let options = ScanOptions {
        reverse: true,
        limit: Some(1),
    };
    Ok(versions(view, path, options).await?.pop().map(|(_, v)| v))
}

pub(crate) async fn first_version<V: View + ?Sized>(view: &V, path: &str) -> Result<Option<Version>> {
    let options = ScanOptions {
        reverse: false,
        limit: Some(1),
    };
    Ok(versions(view, path, options).await?.pop().map(|(_, v)| v))
}

pub(crate) async fn conflicts<V: View + ?Sized>(
    view: &V,
    path: &str,
    options: ScanOptions,
) -> Result<Vec<(u64, Entry)>> {
    view.scan(&conflict_range(path), options)
        .await?
        .into_iter()
        .map(|item| Ok((seq_of(&item.key)?, Entry::from_bytes(&item.value)?)))
        .collect()
}

pub(crate) async fn first_conflict<V: View + ?Sized>(view: &V, path: &str) -> Result<Option<Entry>> {
    match view.peek(&conflict_range(path), false).await? {
        Some(item) => Ok(Some(Entry::from_bytes(&item.value)?)),
        None => Ok(None),
    }
}

pub(crate) async fn has_conflicts<V: View + ?Sized>(view: &V, path: &str) -> Result<bool> {
    Ok(view.peek(&conflict_range(path), false).await?.is_some())
}
