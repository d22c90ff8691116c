//! S3-compatible blob storage.
//!
//! Objects are addressed by full path-style URLs (`{endpoint}/{bucket}/{key}`)
//! so that stored tracks can carry their own locations. The [`FileStore`]
//! trait is the seam the pipeline's transfer and split stages consume.

pub mod client;
pub mod error;

pub use client::{BucketUrl, FileStore, S3Client, S3Config};
pub use error::{StorageError, StorageResult};
