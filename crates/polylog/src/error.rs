use crate::writer::WriterId;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("View error: {0}")]
    View(#[from] polyview::ViewError),

    #[error("Writer {0} is not in the writer set")]
    NotWritable(WriterId),

    #[error("Log is closed")]
    Closed,

    #[error("Peer serves log {theirs}, expected {ours}")]
    KeyMismatch { ours: WriterId, theirs: WriterId },

    #[error("Missing nodes {start}..{end} of writer {writer}")]
    MissingNodes { writer: WriterId, start: u64, end: u64 },

    #[error("Invalid writer id: {0}")]
    InvalidWriterId(String),

    #[error("Apply failed: {0}")]
    Apply(String),
}

pub type Result<T> = std::result::Result<T, LogError>;
