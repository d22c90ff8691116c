//! Split stage: run stem separation on the saved original.

use std::sync::Arc;

use async_trait::async_trait;

use stemsplit_queue::SplitJobParams;
use stemsplit_storage::BucketUrl;
use stemsplit_tracks::TrackStore;

use crate::error::WorkerResult;
use crate::router::{SplitJobHandler, StemUrls};
use crate::splitter::FileSplitter;

pub const ERROR_MESSAGE: &str = "Failed to split the source audio into stems";

pub struct SplitHandler {
    splitter: TrackSplitter,
}

impl SplitHandler {
    pub fn new(splitter: TrackSplitter) -> Self {
        Self { splitter }
    }
}

#[async_trait]
impl SplitJobHandler for SplitHandler {
    async fn handle(&self, body: &[u8]) -> WorkerResult<(SplitJobParams, StemUrls)> {
        let params = SplitJobParams::decode(body)?;

        let stem_urls = self
            .splitter
            .split_track(
                &params.track.track_list_id,
                &params.track.track_id,
                &params.saved_original_url,
            )
            .await?;

        Ok((params, stem_urls))
    }
}

/// Resolves a track's split arity and destination, then delegates the file work.
pub struct TrackSplitter {
    track_store: Arc<dyn TrackStore>,
    splitter: Arc<dyn FileSplitter>,
    bucket_url: BucketUrl,
}

impl TrackSplitter {
    pub fn new(
        track_store: Arc<dyn TrackStore>,
        splitter: Arc<dyn FileSplitter>,
        bucket_url: BucketUrl,
    ) -> Self {
        Self {
            track_store,
            splitter,
            bucket_url,
        }
    }

    pub async fn split_track(
        &self,
        track_list_id: &str,
        track_id: &str,
        saved_original_url: &str,
    ) -> WorkerResult<StemUrls> {
        let track = self.track_store.get_track(track_list_id, track_id).await?;
        let split = track.into_split_stem()?;

        let split_type = split
            .track_type
            .split_type()
            .ok_or(stemsplit_models::TrackTypeError::NotASplitRequest(
                split.track_type,
            ))?;

        let dest_dir_url = self.bucket_url.object_url(&format!(
            "{track_list_id}/{track_id}/{}",
            split_type.dir_name()
        ));

        self.splitter
            .split_file(saved_original_url, &dest_dir_url, split_type)
            .await
    }
}
