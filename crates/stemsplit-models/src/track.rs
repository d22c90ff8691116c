//! Track models.
//!
//! A track starts its life as a split request ([`SplitStemTrack`]) and, if the
//! pipeline completes, is replaced in place by the terminal [`StemTrack`]
//! carrying the uploaded stem URLs.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error for values that don't map onto the track vocabulary.
#[derive(Debug, Error)]
pub enum TrackTypeError {
    #[error("Value does not match any track type: {0}")]
    UnknownTrackType(String),

    #[error("Value does not match any job status: {0}")]
    UnknownStatus(String),

    #[error("Track type is not a split request: {0}")]
    NotASplitRequest(TrackType),
}

/// Stored track type: final stem collections plus the split-request variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackType {
    #[serde(rename = "2stems")]
    TwoStems,
    #[serde(rename = "4stems")]
    FourStems,
    #[serde(rename = "5stems")]
    FiveStems,
    #[serde(rename = "split_2stems")]
    SplitTwoStems,
    #[serde(rename = "split_4stems")]
    SplitFourStems,
    #[serde(rename = "split_5stems")]
    SplitFiveStems,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackType::TwoStems => "2stems",
            TrackType::FourStems => "4stems",
            TrackType::FiveStems => "5stems",
            TrackType::SplitTwoStems => "split_2stems",
            TrackType::SplitFourStems => "split_4stems",
            TrackType::SplitFiveStems => "split_5stems",
        }
    }

    pub fn parse(val: &str) -> Result<Self, TrackTypeError> {
        match val {
            "2stems" => Ok(TrackType::TwoStems),
            "4stems" => Ok(TrackType::FourStems),
            "5stems" => Ok(TrackType::FiveStems),
            "split_2stems" => Ok(TrackType::SplitTwoStems),
            "split_4stems" => Ok(TrackType::SplitFourStems),
            "split_5stems" => Ok(TrackType::SplitFiveStems),
            other => Err(TrackTypeError::UnknownTrackType(other.to_string())),
        }
    }

    /// The split arity of a split-request type, if this is one.
    pub fn split_type(&self) -> Option<SplitType> {
        match self {
            TrackType::SplitTwoStems => Some(SplitType::TwoStems),
            TrackType::SplitFourStems => Some(SplitType::FourStems),
            TrackType::SplitFiveStems => Some(SplitType::FiveStems),
            _ => None,
        }
    }

    pub fn is_split_request(&self) -> bool {
        self.split_type().is_some()
    }
}

impl fmt::Display for TrackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requested stem count for a split job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitType {
    TwoStems,
    FourStems,
    FiveStems,
}

impl SplitType {
    pub fn stem_count(&self) -> usize {
        match self {
            SplitType::TwoStems => 2,
            SplitType::FourStems => 4,
            SplitType::FiveStems => 5,
        }
    }

    /// Directory segment used when laying out stems in remote storage.
    pub fn dir_name(&self) -> &'static str {
        match self {
            SplitType::TwoStems => "2stems",
            SplitType::FourStems => "4stems",
            SplitType::FiveStems => "5stems",
        }
    }

    /// The terminal track type a completed split of this arity produces.
    pub fn final_track_type(&self) -> TrackType {
        match self {
            SplitType::TwoStems => TrackType::TwoStems,
            SplitType::FourStems => TrackType::FourStems,
            SplitType::FiveStems => TrackType::FiveStems,
        }
    }
}

impl fmt::Display for SplitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Split job status persisted on the track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitTrackStatus {
    Requested,
    Processing,
    Error,
}

impl SplitTrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitTrackStatus::Requested => "requested",
            SplitTrackStatus::Processing => "processing",
            SplitTrackStatus::Error => "error",
        }
    }

    pub fn parse(val: &str) -> Result<Self, TrackTypeError> {
        match val {
            "requested" => Ok(SplitTrackStatus::Requested),
            "processing" => Ok(SplitTrackStatus::Processing),
            "error" => Ok(SplitTrackStatus::Error),
            other => Err(TrackTypeError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for SplitTrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A track that has been requested to be split into stems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitStemTrack {
    pub track_type: TrackType,
    pub original_url: String,
    pub job_status: SplitTrackStatus,
    #[serde(default)]
    pub job_status_message: String,
    #[serde(default)]
    pub job_status_debug_log: String,
    #[serde(default)]
    pub job_progress: u32,
}

impl SplitStemTrack {
    /// A fresh split request pointing at a source URL.
    pub fn requested(track_type: TrackType, original_url: impl Into<String>) -> Self {
        Self {
            track_type,
            original_url: original_url.into(),
            job_status: SplitTrackStatus::Requested,
            job_status_message: String::new(),
            job_status_debug_log: String::new(),
            job_progress: 0,
        }
    }
}

/// A completed split: one remote URL per stem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemTrack {
    pub track_type: TrackType,
    pub stem_urls: HashMap<String, String>,
}

/// Closed union over the shapes a stored track can take.
///
/// Unknown stored variants are rejected at decode time; every consumer
/// matches exhaustively.
#[derive(Debug, Clone, PartialEq)]
pub enum Track {
    SplitStem(SplitStemTrack),
    Stem(StemTrack),
}

impl Track {
    pub fn track_type(&self) -> TrackType {
        match self {
            Track::SplitStem(t) => t.track_type,
            Track::Stem(t) => t.track_type,
        }
    }

    /// Borrow the split-request shape, or fail with the track's actual type.
    pub fn as_split_stem(&self) -> Result<&SplitStemTrack, TrackTypeError> {
        match self {
            Track::SplitStem(t) => Ok(t),
            Track::Stem(t) => Err(TrackTypeError::NotASplitRequest(t.track_type)),
        }
    }

    pub fn into_split_stem(self) -> Result<SplitStemTrack, TrackTypeError> {
        match self {
            Track::SplitStem(t) => Ok(t),
            Track::Stem(t) => Err(TrackTypeError::NotASplitRequest(t.track_type)),
        }
    }
}

impl From<SplitStemTrack> for Track {
    fn from(t: SplitStemTrack) -> Self {
        Track::SplitStem(t)
    }
}

impl From<StemTrack> for Track {
    fn from(t: StemTrack) -> Self {
        Track::Stem(t)
    }
}
