//! Direct children of a folder without visiting whole subtrees
//!
//! Each step peeks the first file key after a cursor. When the key lies
//! below a child folder the cursor jumps past that folder by appending "0",
//! the byte after "/", so every child costs one peek regardless of how many
//! files it contains.

use crate::error::Result;
use crate::item::DirEntry;
use crate::keys::prefix_range;
use crate::tables::entry_item;
use futures::Stream;
use polyview::{Snapshot, View};
use std::collections::HashSet;

/// Children of `folder` in key order. `folder` is normalized without a
/// trailing slash, the root being `""`.
pub(crate) fn shallow(view: Snapshot, folder: String) -> impl Stream<Item = Result<DirEntry>> + Send + 'static {
    async_stream::try_stream! {
        let mut after = "/".to_string();
        let mut seen = HashSet::new();
        while let Some(item) = view.peek(&prefix_range(&folder, &after), false).await? {
            let item = entry_item(item)?;
            let suffix = item.path.get(folder.len() + 1..).unwrap_or_default();
            let (name, nested) = match suffix.split_once('/') {
                Some((name, _)) => (name.to_string(), true),
                None => (suffix.to_string(), false),
            };
            after = if nested {
                format!("/{name}0")
            } else {
                format!("/{name}")
            };
            if !seen.insert(name.clone()) {
                continue;
            }
            yield DirEntry { name, item };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::files_key;
    use crate::messages::{Encode, Entry, File};
    use futures::TryStreamExt;
    use polylog::WriterId;
    use polyview::MemoryView;

    async fn view_with(paths: &[&str]) -> Snapshot {
        let view = MemoryView::new();
        let mut batch = view.batch().await;
        let entry = Entry::new(WriterId::from_bytes([1; 32]), File::default()).to_bytes();
        for path in paths {
            batch.put(files_key(path), entry.clone());
        }
        batch.flush().await.unwrap();
        view.snapshot().await
    }

    async fn names(view: &Snapshot, folder: &str) -> Vec<String> {
        shallow(view.clone(), folder.to_string())
            .map_ok(|dir| dir.name)
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_children_once_each() {
        let view = view_with(&["/a", "/a/b", "/a/b/c", "/a/d", "/ab", "/a/b!x"]).await;
        assert_eq!(names(&view, "/a").await, ["b", "b!x", "d"]);
        assert_eq!(names(&view, "").await, ["a", "ab"]);
        assert!(names(&view, "/a/d").await.is_empty());
        assert!(names(&view, "/missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_first_entry_of_child_folder() {
        let view = view_with(&["/docs/x/1", "/docs/x/2", "/docs/y"]).await;
        let found: Vec<DirEntry> = shallow(view, "/docs".to_string()).try_collect().await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].item.path, "/docs/x/1");
        assert_eq!(found[1].item.path, "/docs/y");
    }
}
