//! Track list persistence.
//!
//! Track lists live in one DynamoDB row per list, holding a bounded `tracks`
//! array whose elements carry a stable `id` but no by-ID addressing. Writes
//! locate a track with a blind-index conditional update: try index 0, retry
//! at the next index on condition failure, give up after
//! [`MAX_TRACK_INDEX`](store::MAX_TRACK_INDEX) attempts.

pub mod dynamo;
pub mod error;
pub mod store;

pub use dynamo::{DynamoTrackStore, TrackStoreConfig};
pub use error::{TrackResult, TrackStoreError};
pub use store::{TrackStore, TrackUpdater, MAX_TRACK_INDEX};
