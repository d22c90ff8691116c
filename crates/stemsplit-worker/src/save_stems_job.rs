//! SaveStems stage: replace the split request with the terminal stem track.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use stemsplit_models::{StemTrack, Track};
use stemsplit_queue::SaveStemsJobParams;
use stemsplit_tracks::TrackStore;

use crate::error::WorkerResult;
use crate::router::SaveStemsJobHandler;

pub const ERROR_MESSAGE: &str = "Failed to save stem URLs to database";

pub struct SaveStemsHandler {
    track_store: Arc<dyn TrackStore>,
}

impl SaveStemsHandler {
    pub fn new(track_store: Arc<dyn TrackStore>) -> Self {
        Self { track_store }
    }
}

#[async_trait]
impl SaveStemsJobHandler for SaveStemsHandler {
    async fn handle(&self, body: &[u8]) -> WorkerResult<SaveStemsJobParams> {
        let params = SaveStemsJobParams::decode(body)?;

        let track = self
            .track_store
            .get_track(&params.track.track_list_id, &params.track.track_id)
            .await?;

        let split = track.into_split_stem()?;
        let split_type = split
            .track_type
            .split_type()
            .ok_or(stemsplit_models::TrackTypeError::NotASplitRequest(
                split.track_type,
            ))?;

        let stem_track = StemTrack {
            track_type: split_type.final_track_type(),
            stem_urls: params.stem_urls.clone(),
        };

        self.track_store
            .set_track(
                &params.track.track_list_id,
                &params.track.track_id,
                Track::from(stem_track),
            )
            .await?;

        info!(
            track_list_id = %params.track.track_list_id,
            track_id = %params.track.track_id,
            stems = params.stem_urls.len(),
            "Saved stem URLs, track is terminal"
        );

        Ok(params)
    }
}
