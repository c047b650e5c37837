#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("Version {version} is beyond the view length {length}")]
    VersionOutOfRange { version: u64, length: u64 },

    #[error("Batch based on version {base} is stale, view is at {current}")]
    StaleBatch { base: u64, current: u64 },
}

pub type Result<T> = std::result::Result<T, ViewError>;
