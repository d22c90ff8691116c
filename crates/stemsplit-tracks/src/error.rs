//! Track store error types.

use stemsplit_models::TrackTypeError;
use thiserror::Error;

pub type TrackResult<T> = Result<T, TrackStoreError>;

#[derive(Debug, Error)]
pub enum TrackStoreError {
    #[error("Failed to configure track store: {0}")]
    ConfigError(String),

    #[error("Track list not found: {0}")]
    TrackListNotFound(String),

    #[error("No matching track ID found: {0}")]
    TrackNotFound(String),

    #[error("Missing track field: {0}")]
    MissingField(&'static str),

    #[error("Invalid track data: {0}")]
    InvalidTrack(#[from] TrackTypeError),

    #[error("No index matched after {attempts} conditional attempts: {last}")]
    IndexExhausted {
        attempts: usize,
        last: Box<TrackStoreError>,
    },

    #[error("DynamoDB error: {0}")]
    Dynamo(String),
}

impl TrackStoreError {
    pub fn dynamo(msg: impl Into<String>) -> Self {
        Self::Dynamo(msg.into())
    }

    /// True when a write ran out of index guesses without ever matching.
    pub fn is_index_exhausted(&self) -> bool {
        matches!(self, TrackStoreError::IndexExhausted { .. })
    }
}
