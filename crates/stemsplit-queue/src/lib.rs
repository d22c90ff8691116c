//! Redis Streams job queue for the stem-split pipeline.
//!
//! This crate provides:
//! - The stage-tagged wire envelope and per-stage message bodies
//! - Job enqueueing via Redis Streams
//! - Consumer-group consumption with ack/nack, bounded retries and a DLQ
//! - The `Publisher` and `MessageStream` seams the router and worker sit on

pub mod error;
pub mod message;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use message::{
    JobMessage, JobType, MessageError, SaveStemsJobParams, SplitJobParams, StartJobParams,
    TrackIdentifier, TransferJobParams,
};
pub use queue::{Delivery, JobQueue, MessageStream, Publisher, QueueConfig, Subscription};
