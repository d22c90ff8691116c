//! Start stage: flip a requested track to processing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use stemsplit_models::{SplitTrackStatus, Track};
use stemsplit_queue::StartJobParams;
use stemsplit_tracks::TrackStore;

use crate::error::{WorkerError, WorkerResult};
use crate::router::StartJobHandler;

pub const ERROR_MESSAGE: &str = "Failed to start processing audio splitting";

pub struct StartHandler {
    track_store: Arc<dyn TrackStore>,
}

impl StartHandler {
    pub fn new(track_store: Arc<dyn TrackStore>) -> Self {
        Self { track_store }
    }
}

#[async_trait]
impl StartJobHandler for StartHandler {
    async fn handle(&self, body: &[u8]) -> WorkerResult<StartJobParams> {
        let params = StartJobParams::decode(body)?;

        let track = self
            .track_store
            .get_track(&params.track.track_list_id, &params.track.track_id)
            .await?;

        let mut split = track.into_split_stem()?;

        // Delivery is at-least-once: a redelivered start_job finds the track
        // already past requested and must not rerun the pipeline.
        if split.job_status != SplitTrackStatus::Requested {
            return Err(WorkerError::wrong_track_state(format!(
                "Track is not in requested status, abort processing to be safe (status: {})",
                split.job_status
            )));
        }

        split.job_status = SplitTrackStatus::Processing;
        split.job_status_message = "Audio processing has started".to_string();

        self.track_store
            .set_track(
                &params.track.track_list_id,
                &params.track.track_id,
                Track::from(split),
            )
            .await?;

        info!(
            track_list_id = %params.track.track_list_id,
            track_id = %params.track.track_id,
            "Track moved to processing"
        );

        Ok(params)
    }
}
