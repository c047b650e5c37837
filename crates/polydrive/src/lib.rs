//! A multi-writer replicated file system
//!
//! Every writer appends file operations to its own log. Replicas order the
//! logs of all writers the same way and fold the operations into three
//! tables: the current file of each path, the history of each path, and
//! writes that raced with another writer and wait for an explicit
//! resolution. File content lives in per-writer content cores that peers
//! fetch on demand.

mod apply;
mod config;
mod conflict;
mod content;
mod context;
mod drive;
mod error;
mod events;
mod item;
mod keys;
mod messages;
mod namespace;
mod path;
mod read;
mod replicate;
mod session;
mod shallow;
mod tables;
mod wakeup;
mod write;

pub mod testing;

pub use apply::{ApplyObserver, MergeEngine, NoopObserver, OpOutcome};
pub use config::{DriveConfig, DriveOptions};
pub use conflict::{is_conflict, same_heads};
pub use content::{BlockRange, ClearOptions, DownloadOptions};
pub use drive::{Drive, DriveWatcher};
pub use error::{DriveError, ErrorCode, Result};
pub use events::DriveEvent;
pub use item::{DirEntry, EntryDiff, EntryItem, HistoryItem};
pub use messages::{Decode, Encode, Entry, File, Operation, Version, VersionType, WakeupRequest, WakeupResult};
pub use namespace::Namespace;
pub use path::{normalize, resolve, std_folder, std_path};
pub use read::{EntryRange, HistoryOptions, ReadOptions, Target};
pub use replicate::{Replication, replicate, sync};
pub use write::{DelOptions, FileWriter, PutOptions, Resolve, WriteOptions};

pub use polyblobs::{BlobRef, Cleared, ReadRange};
pub use polylog::{Head, WriterId};
pub use polyview::ScanOptions;
