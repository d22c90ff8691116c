//! Transfer stage: move the source audio into our own storage.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use stemsplit_queue::TransferJobParams;
use stemsplit_storage::{BucketUrl, FileStore};
use stemsplit_tracks::TrackStore;

use crate::downloader::Downloader;
use crate::error::WorkerResult;
use crate::router::TransferJobHandler;

pub const ERROR_MESSAGE: &str = "Failed to download source audio for processing";

pub struct TransferHandler {
    transferrer: TrackTransferrer,
}

impl TransferHandler {
    pub fn new(transferrer: TrackTransferrer) -> Self {
        Self { transferrer }
    }
}

#[async_trait]
impl TransferJobHandler for TransferHandler {
    async fn handle(&self, body: &[u8]) -> WorkerResult<(TransferJobParams, String)> {
        let params = TransferJobParams::decode(body)?;

        let saved_original_url = self
            .transferrer
            .download(&params.track.track_list_id, &params.track.track_id)
            .await?;

        Ok((params, saved_original_url))
    }
}

/// Downloads a track's source audio and re-uploads it to the blob store.
pub struct TrackTransferrer {
    track_store: Arc<dyn TrackStore>,
    file_store: Arc<dyn FileStore>,
    downloader: Arc<dyn Downloader>,
    bucket_url: BucketUrl,
    working_dir: PathBuf,
}

impl TrackTransferrer {
    pub fn new(
        track_store: Arc<dyn TrackStore>,
        file_store: Arc<dyn FileStore>,
        downloader: Arc<dyn Downloader>,
        bucket_url: BucketUrl,
        working_dir: impl Into<PathBuf>,
    ) -> WorkerResult<Self> {
        let working_dir = working_dir.into();
        std::fs::create_dir_all(&working_dir)?;

        Ok(Self {
            track_store,
            file_store,
            downloader,
            bucket_url,
            working_dir,
        })
    }

    /// Download the track's original audio and store it remotely.
    /// Returns the URL the original now lives at.
    pub async fn download(&self, track_list_id: &str, track_id: &str) -> WorkerResult<String> {
        let track = self.track_store.get_track(track_list_id, track_id).await?;
        let split = track.into_split_stem()?;

        let temp_dir = tempfile::Builder::new()
            .prefix("transfer-")
            .tempdir_in(&self.working_dir)?;
        let out_path = temp_dir.path().join("original.mp3");

        self.downloader
            .download(&split.original_url, &out_path)
            .await?;

        let contents = tokio::fs::read(&out_path).await?;

        let destination_url = self
            .bucket_url
            .object_url(&format!("{track_list_id}/{track_id}/original/original.mp3"));

        info!(
            track_list_id,
            track_id,
            destination_url = %destination_url,
            "Writing original track to remote file store"
        );
        self.file_store
            .write_file(&destination_url, contents)
            .await?;

        Ok(destination_url)
    }
}
