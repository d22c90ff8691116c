//! Pipeline message types.
//!
//! Every stage of the pipeline is driven by a [`JobMessage`]: a stage tag
//! plus a JSON body. Bodies share a common [`TrackIdentifier`] prefix so the
//! router can still locate the track when a stage-specific decode fails.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors decoding a message body.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Failed to decode message body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing tracklist ID")]
    MissingTrackListId,

    #[error("Missing track ID")]
    MissingTrackId,

    #[error("Missing stem URLs")]
    MissingStemUrls,
}

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    StartJob,
    TransferOriginal,
    SplitTrack,
    SaveStemsToDb,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::StartJob => "start_job",
            JobType::TransferOriginal => "transfer_original",
            JobType::SplitTrack => "split_track",
            JobType::SaveStemsToDb => "save_stems_to_db",
        }
    }

    /// Parse a wire tag. Unknown tags return `None`; the router turns that
    /// into a fatal error for the message.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "start_job" => Some(JobType::StartJob),
            "transfer_original" => Some(JobType::TransferOriginal),
            "split_track" => Some(JobType::SplitTrack),
            "save_stems_to_db" => Some(JobType::SaveStemsToDb),
            _ => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Wire envelope: stage tag + JSON body.
///
/// The tag stays a plain string so that unrecognized tags survive transport
/// and fail in the router rather than being dropped at the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobMessage {
    pub job_type: String,
    pub body: Vec<u8>,
}

impl JobMessage {
    /// Build a `start_job` message.
    pub fn start_job(
        track_list_id: impl Into<String>,
        track_id: impl Into<String>,
    ) -> Result<Self, MessageError> {
        Self::encode(
            JobType::StartJob,
            &StartJobParams {
                track: TrackIdentifier::new(track_list_id, track_id),
            },
        )
    }

    /// Build a `transfer_original` message.
    pub fn transfer_original(
        track_list_id: impl Into<String>,
        track_id: impl Into<String>,
    ) -> Result<Self, MessageError> {
        Self::encode(
            JobType::TransferOriginal,
            &TransferJobParams {
                track: TrackIdentifier::new(track_list_id, track_id),
            },
        )
    }

    /// Build a `split_track` message.
    pub fn split_track(
        track_list_id: impl Into<String>,
        track_id: impl Into<String>,
        saved_original_url: impl Into<String>,
    ) -> Result<Self, MessageError> {
        Self::encode(
            JobType::SplitTrack,
            &SplitJobParams {
                track: TrackIdentifier::new(track_list_id, track_id),
                saved_original_url: saved_original_url.into(),
            },
        )
    }

    /// Build a `save_stems_to_db` message.
    pub fn save_stems_to_db(
        track_list_id: impl Into<String>,
        track_id: impl Into<String>,
        stem_urls: HashMap<String, String>,
    ) -> Result<Self, MessageError> {
        Self::encode(
            JobType::SaveStemsToDb,
            &SaveStemsJobParams {
                track: TrackIdentifier::new(track_list_id, track_id),
                stem_urls,
            },
        )
    }

    fn encode<T: Serialize>(job_type: JobType, body: &T) -> Result<Self, MessageError> {
        Ok(Self {
            job_type: job_type.as_str().to_string(),
            body: serde_json::to_vec(body)?,
        })
    }
}

/// Composite key identifying one track within one track list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackIdentifier {
    pub track_list_id: String,
    pub track_id: String,
}

impl TrackIdentifier {
    pub fn new(track_list_id: impl Into<String>, track_id: impl Into<String>) -> Self {
        Self {
            track_list_id: track_list_id.into(),
            track_id: track_id.into(),
        }
    }

    /// Decode only the common identifier prefix of a message body.
    ///
    /// Used by the router's error path, where the stage-specific shape may
    /// not have decoded. Extra fields in the body are ignored.
    pub fn decode(body: &[u8]) -> Result<Self, MessageError> {
        let id: TrackIdentifier = serde_json::from_slice(body)?;
        Ok(id)
    }

    fn validate(&self) -> Result<(), MessageError> {
        if self.track_list_id.is_empty() {
            return Err(MessageError::MissingTrackListId);
        }
        if self.track_id.is_empty() {
            return Err(MessageError::MissingTrackId);
        }
        Ok(())
    }
}

/// Body of a `start_job` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartJobParams {
    #[serde(flatten)]
    pub track: TrackIdentifier,
}

impl StartJobParams {
    pub fn decode(body: &[u8]) -> Result<Self, MessageError> {
        let params: StartJobParams = serde_json::from_slice(body)?;
        params.track.validate()?;
        Ok(params)
    }
}

/// Body of a `transfer_original` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferJobParams {
    #[serde(flatten)]
    pub track: TrackIdentifier,
}

impl TransferJobParams {
    pub fn decode(body: &[u8]) -> Result<Self, MessageError> {
        let params: TransferJobParams = serde_json::from_slice(body)?;
        params.track.validate()?;
        Ok(params)
    }
}

/// Body of a `split_track` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitJobParams {
    #[serde(flatten)]
    pub track: TrackIdentifier,
    pub saved_original_url: String,
}

impl SplitJobParams {
    pub fn decode(body: &[u8]) -> Result<Self, MessageError> {
        let params: SplitJobParams = serde_json::from_slice(body)?;
        params.track.validate()?;
        Ok(params)
    }
}

/// Body of a `save_stems_to_db` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveStemsJobParams {
    #[serde(flatten)]
    pub track: TrackIdentifier,
    pub stem_urls: HashMap<String, String>,
}

impl SaveStemsJobParams {
    pub fn decode(body: &[u8]) -> Result<Self, MessageError> {
        let params: SaveStemsJobParams = serde_json::from_slice(body)?;
        params.track.validate()?;
        if params.stem_urls.is_empty() {
            return Err(MessageError::MissingStemUrls);
        }
        Ok(params)
    }
}
