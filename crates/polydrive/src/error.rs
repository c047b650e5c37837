use polyblobs::BlobError;
use polylog::LogError;
use polyview::ViewError;
use std::fmt;

/// Stable error codes reported to applications and in error events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    BlockNotAvailable,
    RequestTimeout,
    InvalidOperation,
    InvalidFilename,
    InvalidSession,
    FileNotFound,
    FileConflict,
    PermissionDenied,
    RecursiveSymlink,
    SessionNotWritable,
    StreamClosed,
    BadArgument,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BlockNotAvailable => "BLOCK_NOT_AVAILABLE",
            ErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            ErrorCode::InvalidOperation => "INVALID_OPERATION",
            ErrorCode::InvalidFilename => "INVALID_FILENAME",
            ErrorCode::InvalidSession => "INVALID_SESSION",
            ErrorCode::FileNotFound => "FILE_NOT_FOUND",
            ErrorCode::FileConflict => "FILE_CONFLICT",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::RecursiveSymlink => "RECURSIVE_SYMLINK",
            ErrorCode::SessionNotWritable => "SESSION_NOT_WRITABLE",
            ErrorCode::StreamClosed => "STREAM_CLOSED",
            ErrorCode::BadArgument => "BAD_ARGUMENT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("Block not available")]
    BlockNotAvailable,

    #[error("Request timed out")]
    RequestTimeout,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("File not found at {0}")]
    FileNotFound(String),

    #[error("Conflicting versions at {0}")]
    FileConflict(String),

    #[error("Permission denied at {path} for writer {writer}")]
    PermissionDenied { path: String, writer: String },

    #[error("Recursive symlink")]
    RecursiveSymlink,

    #[error("Session is not writable")]
    SessionNotWritable,

    #[error("Stream closed")]
    StreamClosed,

    #[error("Bad argument: {0}")]
    BadArgument(String),

    #[error("View error: {0}")]
    View(#[from] ViewError),

    #[error("Log error: {0}")]
    Log(LogError),

    #[error("Content error: {0}")]
    Blob(BlobError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DriveError {
    /// Code of the error, `None` for collaborator failures outside the taxonomy
    pub fn code(&self) -> Option<ErrorCode> {
        let code = match self {
            DriveError::BlockNotAvailable => ErrorCode::BlockNotAvailable,
            DriveError::RequestTimeout => ErrorCode::RequestTimeout,
            DriveError::InvalidOperation(_) => ErrorCode::InvalidOperation,
            DriveError::InvalidFilename(_) => ErrorCode::InvalidFilename,
            DriveError::InvalidSession(_) => ErrorCode::InvalidSession,
            DriveError::FileNotFound(_) => ErrorCode::FileNotFound,
            DriveError::FileConflict(_) => ErrorCode::FileConflict,
            DriveError::PermissionDenied { .. } => ErrorCode::PermissionDenied,
            DriveError::RecursiveSymlink => ErrorCode::RecursiveSymlink,
            DriveError::SessionNotWritable => ErrorCode::SessionNotWritable,
            DriveError::StreamClosed => ErrorCode::StreamClosed,
            DriveError::BadArgument(_) => ErrorCode::BadArgument,
            DriveError::View(_)
            | DriveError::Log(_)
            | DriveError::Blob(_)
            | DriveError::Io(_)
            | DriveError::Json(_) => return None,
        };
        Some(code)
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        DriveError::InvalidOperation(message.into())
    }
}

impl From<LogError> for DriveError {
    fn from(e: LogError) -> Self {
        match e {
            LogError::NotWritable(_) => DriveError::SessionNotWritable,
            LogError::View(e) => DriveError::View(e),
            other => DriveError::Log(other),
        }
    }
}

impl From<BlobError> for DriveError {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::BlockNotAvailable { .. } => DriveError::BlockNotAvailable,
            BlobError::RequestTimeout { .. } => DriveError::RequestTimeout,
            BlobError::Io(e) => DriveError::Io(e),
            other => DriveError::Blob(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, DriveError>;

#[cfg(test)]
mod tests {
    use super::*;
    use polylog::WriterId;

    #[test]
    fn test_collaborator_errors_map_to_codes() {
        let blob: DriveError = BlobError::RequestTimeout { index: 3 }.into();
        assert_eq!(blob.code(), Some(ErrorCode::RequestTimeout));
        let log: DriveError = LogError::NotWritable(WriterId::from_bytes([0; 32])).into();
        assert_eq!(log.code(), Some(ErrorCode::SessionNotWritable));
        assert_eq!(DriveError::from(LogError::Closed).code(), None);
        assert_eq!(ErrorCode::FileConflict.to_string(), "FILE_CONFLICT");
    }
}
