//! Path normalization
//!
//! Every stored path is absolute, uses `/` separators and has no `.` or `..`
//! segments. Backslashes are treated as separators.

use crate::error::{DriveError, Result};

/// Resolve `path` against the root, collapsing `.`, `..` and empty segments
pub fn normalize(path: &str) -> String {
    resolve("/", path)
}

/// Resolve `to` relative to `from`, like a shell `cd from; cd to`
pub fn resolve(from: &str, to: &str) -> String {
    let to = to.replace('\\', "/");
    let mut segments: Vec<String> = Vec::new();
    if !to.starts_with('/') {
        push_segments(&mut segments, &from.replace('\\', "/"));
    }
    push_segments(&mut segments, &to);
    format!("/{}", segments.join("/"))
}

fn push_segments(segments: &mut Vec<String>, path: &str) {
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            name => segments.push(name.to_string()),
        }
    }
}

/// Normalize a user supplied name into a file path
///
/// With `remove_slash` the result has no trailing slash, so the root folder
/// becomes `""`. Without it the root itself is rejected, since no file can
/// live there.
pub fn std_path(name: &str, remove_slash: bool) -> Result<String> {
    if name.contains('\0') {
        return Err(DriveError::InvalidFilename(name.replace('\0', "\\0")));
    }
    let path = normalize(name);
    if remove_slash {
        return Ok(path.trim_end_matches('/').to_string());
    }
    if path == "/" {
        return Err(DriveError::InvalidFilename(name.to_string()));
    }
    Ok(path)
}

/// Folder form of `name`: normalized without trailing slash
pub fn std_folder(name: &str) -> Result<String> {
    std_path(name, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("a/b"), "/a/b");
        assert_eq!(normalize("/a//b/"), "/a/b");
        assert_eq!(normalize("\\a\\b"), "/a/b");
        assert_eq!(normalize("/a/./c/../b"), "/a/b");
        assert_eq!(normalize("/../.."), "/");
        assert_eq!(normalize(""), "/");
    }

    #[test]
    fn test_resolve_relative() {
        assert_eq!(resolve("/a/link", "target"), "/a/link/target");
        assert_eq!(resolve("/a/link", "../b"), "/a/b");
        assert_eq!(resolve("/a/link", "/b"), "/b");
    }

    #[test]
    fn test_std_path() {
        assert_eq!(std_path("x/y", false).unwrap(), "/x/y");
        assert_eq!(std_folder("/").unwrap(), "");
        assert_eq!(std_folder("/a/").unwrap(), "/a");
        for bad in ["/", "", "..", "/a\0b"] {
            let err = std_path(bad, false).unwrap_err();
            assert_eq!(err.code(), Some(ErrorCode::InvalidFilename), "{bad:?}");
        }
    }
}
