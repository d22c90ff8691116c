//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Unrecognized job type: {0}")]
    UnrecognizedJobType(String),

    #[error("Track is in the wrong state: {0}")]
    WrongTrackState(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Split failed: {0}")]
    SplitFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Message error: {0}")]
    Message(#[from] stemsplit_queue::MessageError),

    #[error("Track error: {0}")]
    Track(#[from] stemsplit_models::TrackTypeError),

    #[error("Track store error: {0}")]
    TrackStore(#[from] stemsplit_tracks::TrackStoreError),

    #[error("Storage error: {0}")]
    Storage(#[from] stemsplit_storage::StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] stemsplit_queue::QueueError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn wrong_track_state(msg: impl Into<String>) -> Self {
        Self::WrongTrackState(msg.into())
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn split_failed(msg: impl Into<String>) -> Self {
        Self::SplitFailed(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
