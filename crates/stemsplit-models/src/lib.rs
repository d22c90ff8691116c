//! Shared data models for the stemsplit pipeline.
//!
//! This crate provides the track domain types:
//! - Track type and split arity vocabulary
//! - Split job status
//! - The closed `Track` union over in-flight and terminal shapes

pub mod track;

pub use track::{
    SplitStemTrack, SplitTrackStatus, SplitType, StemTrack, Track, TrackType, TrackTypeError,
};
