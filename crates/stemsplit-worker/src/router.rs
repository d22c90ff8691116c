//! Job router: the pipeline state machine.
//!
//! Each inbound message is keyed to one stage. On success the router bumps
//! the track's progress and publishes the next stage's message; on failure it
//! marks the track errored and surfaces the failure to the queue worker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::error;

use stemsplit_models::{SplitTrackStatus, Track};
use stemsplit_queue::{
    JobMessage, JobType, Publisher, SaveStemsJobParams, SplitJobParams, StartJobParams,
    TrackIdentifier, TransferJobParams,
};
use stemsplit_tracks::TrackStore;

use crate::error::{WorkerError, WorkerResult};
use crate::{save_stems_job, split_job, start_job, transfer_job};

/// Map of stem name to uploaded URL, as produced by the split stage.
pub type StemUrls = HashMap<String, String>;

#[async_trait]
pub trait StartJobHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> WorkerResult<StartJobParams>;
}

#[async_trait]
pub trait TransferJobHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> WorkerResult<(TransferJobParams, String)>;
}

#[async_trait]
pub trait SplitJobHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> WorkerResult<(SplitJobParams, StemUrls)>;
}

#[async_trait]
pub trait SaveStemsJobHandler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> WorkerResult<SaveStemsJobParams>;
}

/// What a non-terminal stage hands back to the router.
struct NextStage {
    status_message: &'static str,
    progress: u32,
    message: JobMessage,
}

/// Routes inbound messages through the pipeline stages.
#[derive(Clone)]
pub struct JobRouter {
    track_store: Arc<dyn TrackStore>,
    publisher: Arc<dyn Publisher>,
    start_handler: Arc<dyn StartJobHandler>,
    transfer_handler: Arc<dyn TransferJobHandler>,
    split_handler: Arc<dyn SplitJobHandler>,
    save_stems_handler: Arc<dyn SaveStemsJobHandler>,
}

impl JobRouter {
    pub fn new(
        track_store: Arc<dyn TrackStore>,
        publisher: Arc<dyn Publisher>,
        start_handler: Arc<dyn StartJobHandler>,
        transfer_handler: Arc<dyn TransferJobHandler>,
        split_handler: Arc<dyn SplitJobHandler>,
        save_stems_handler: Arc<dyn SaveStemsJobHandler>,
    ) -> Self {
        Self {
            track_store,
            publisher,
            start_handler,
            transfer_handler,
            split_handler,
            save_stems_handler,
        }
    }

    /// Handle one delivery. Any error has already been recorded on the track
    /// (where possible) by the time it is returned.
    pub async fn handle_message(&self, message: &JobMessage) -> WorkerResult<()> {
        match self.route(message).await {
            Ok(()) => Ok(()),
            Err(job_error) => {
                self.record_failure(message, &job_error).await;
                Err(job_error)
            }
        }
    }

    async fn route(&self, message: &JobMessage) -> WorkerResult<()> {
        let job_type = JobType::parse(&message.job_type)
            .ok_or_else(|| WorkerError::UnrecognizedJobType(message.job_type.clone()))?;

        let next = match job_type {
            JobType::StartJob => {
                let params = self.start_handler.handle(&message.body).await?;
                Some(NextStage {
                    status_message: "Retrieving the original track from provided URL",
                    progress: 10,
                    message: JobMessage::transfer_original(
                        params.track.track_list_id,
                        params.track.track_id,
                    )?,
                })
            }

            JobType::TransferOriginal => {
                let (params, saved_original_url) =
                    self.transfer_handler.handle(&message.body).await?;
                Some(NextStage {
                    status_message: "Splitting the track into stems",
                    progress: 30,
                    message: JobMessage::split_track(
                        params.track.track_list_id,
                        params.track.track_id,
                        saved_original_url,
                    )?,
                })
            }

            JobType::SplitTrack => {
                let (params, stem_urls) = self.split_handler.handle(&message.body).await?;
                Some(NextStage {
                    status_message: "Saving processed stems into database",
                    progress: 90,
                    message: JobMessage::save_stems_to_db(
                        params.track.track_list_id,
                        params.track.track_id,
                        stem_urls,
                    )?,
                })
            }

            JobType::SaveStemsToDb => {
                self.save_stems_handler.handle(&message.body).await?;
                None
            }
        };

        if let Some(next) = next {
            // Progress update and publish must both land; a failed update
            // aborts the call so the next stage is never enqueued against a
            // track we couldn't mark.
            self.update_progress(&message.body, next.status_message, next.progress)
                .await?;
            self.publisher.publish(&next.message).await?;
        }

        Ok(())
    }

    async fn update_progress(
        &self,
        body: &[u8],
        status_message: &'static str,
        progress: u32,
    ) -> WorkerResult<()> {
        let id = TrackIdentifier::decode(body)?;

        self.track_store
            .update_track(
                &id.track_list_id,
                &id.track_id,
                Box::new(move |track| {
                    let mut split = track.into_split_stem()?;
                    split.job_status_message = status_message.to_string();
                    split.job_progress = progress;
                    Ok(Track::from(split))
                }),
            )
            .await?;

        Ok(())
    }

    /// Mark the track errored. Only the common identifier prefix is re-parsed
    /// from the raw body, since the stage-specific shape may not have decoded.
    /// A failure here is logged; the original error is what the caller sees.
    async fn record_failure(&self, message: &JobMessage, job_error: &WorkerError) {
        let Some(job_type) = JobType::parse(&message.job_type) else {
            // No stage to attribute and no guarantee the body carries an
            // identifier; leave the track untouched.
            return;
        };

        let id = match TrackIdentifier::decode(&message.body) {
            Ok(id) => id,
            Err(decode_error) => {
                error!(
                    job_type = %job_type,
                    error = %decode_error,
                    "Cannot record failure: message body has no track identifier"
                );
                return;
            }
        };

        let status_message = stage_error_message(job_type);
        let debug_log = job_error.to_string();

        let result = self
            .track_store
            .update_track(
                &id.track_list_id,
                &id.track_id,
                Box::new(move |track| {
                    let mut split = track.into_split_stem()?;
                    split.job_status = SplitTrackStatus::Error;
                    split.job_status_message = status_message.to_string();
                    split.job_status_debug_log = debug_log;
                    Ok(Track::from(split))
                }),
            )
            .await;

        if let Err(update_error) = result {
            error!(
                track_list_id = %id.track_list_id,
                track_id = %id.track_id,
                error = %update_error,
                "Failed to record error status on track"
            );
        }
    }
}

/// The user-facing failure text for each stage.
fn stage_error_message(job_type: JobType) -> &'static str {
    match job_type {
        JobType::StartJob => start_job::ERROR_MESSAGE,
        JobType::TransferOriginal => transfer_job::ERROR_MESSAGE,
        JobType::SplitTrack => split_job::ERROR_MESSAGE,
        JobType::SaveStemsToDb => save_stems_job::ERROR_MESSAGE,
    }
}
