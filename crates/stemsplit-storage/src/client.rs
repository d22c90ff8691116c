//! S3-compatible client implementation.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

/// Configuration for the blob store client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// S3 API endpoint URL
    pub endpoint_url: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region ("auto" for most S3-compatible stores)
    pub region: String,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("STORAGE_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("STORAGE_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("STORAGE_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("STORAGE_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("STORAGE_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("STORAGE_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("STORAGE_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("STORAGE_BUCKET_NAME not set"))?,
            region: std::env::var("STORAGE_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// Builder and parser for path-style object URLs (`{endpoint}/{bucket}/{key}`).
#[derive(Debug, Clone)]
pub struct BucketUrl {
    endpoint: String,
    bucket: String,
}

impl BucketUrl {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            bucket: bucket.into(),
        }
    }

    /// The full URL an object key lives at.
    pub fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    /// Extract the object key from a URL addressed to this bucket.
    pub fn key_from_url(&self, url: &str) -> StorageResult<String> {
        let prefix = format!("{}/{}/", self.endpoint, self.bucket);
        url.strip_prefix(&prefix)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .ok_or_else(|| StorageError::InvalidUrl(url.to_string()))
    }
}

/// URL-addressed read/write seam the pipeline stages consume.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn get_file(&self, url: &str) -> StorageResult<Vec<u8>>;
    async fn write_file(&self, url: &str, contents: Vec<u8>) -> StorageResult<()>;
}

/// S3-compatible storage client.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket_url: BucketUrl,
    bucket: String,
}

impl S3Client {
    /// Create a new client from configuration.
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "stemsplit",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(sdk_config);

        Self {
            client,
            bucket_url: BucketUrl::new(&config.endpoint_url, &config.bucket_name),
            bucket: config.bucket_name,
        }
    }

    /// The URL builder for this client's bucket.
    pub fn bucket_url(&self) -> &BucketUrl {
        &self.bucket_url
    }

    /// Upload bytes to an object key.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
    ) -> StorageResult<()> {
        debug!("Uploading {} bytes to {}", data.len(), key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded object {}", key);
        Ok(())
    }

    /// Download an object as bytes.
    pub async fn download_bytes(&self, key: &str) -> StorageResult<Vec<u8>> {
        debug!("Downloading {}", key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                if e.to_string().contains("NoSuchKey") {
                    StorageError::not_found(key)
                } else {
                    StorageError::download_failed(e.to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }
}

#[async_trait]
impl FileStore for S3Client {
    async fn get_file(&self, url: &str) -> StorageResult<Vec<u8>> {
        let key = self.bucket_url.key_from_url(url)?;
        self.download_bytes(&key).await
    }

    async fn write_file(&self, url: &str, contents: Vec<u8>) -> StorageResult<()> {
        let key = self.bucket_url.key_from_url(url)?;
        self.upload_bytes(contents, &key, content_type_for(&key))
            .await
    }
}

fn content_type_for(key: &str) -> &'static str {
    if key.ends_with(".mp3") {
        "audio/mpeg"
    } else {
        "application/octet-stream"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_url_round_trips_through_key() {
        let bucket = BucketUrl::new("https://storage.example.com", "stemsplit-tracks");
        let url = bucket.object_url("tl-1/t-1/original/original.mp3");
        assert_eq!(
            url,
            "https://storage.example.com/stemsplit-tracks/tl-1/t-1/original/original.mp3"
        );
        assert_eq!(
            bucket.key_from_url(&url).unwrap(),
            "tl-1/t-1/original/original.mp3"
        );
    }

    #[test]
    fn trailing_slash_on_endpoint_is_normalized() {
        let bucket = BucketUrl::new("https://storage.example.com/", "b");
        assert_eq!(bucket.object_url("k"), "https://storage.example.com/b/k");
    }

    #[test]
    fn foreign_urls_are_rejected() {
        let bucket = BucketUrl::new("https://storage.example.com", "b");
        assert!(bucket
            .key_from_url("https://elsewhere.example.com/b/k")
            .is_err());
        assert!(bucket
            .key_from_url("https://storage.example.com/other-bucket/k")
            .is_err());
        assert!(bucket
            .key_from_url("https://storage.example.com/b/")
            .is_err());
    }

    #[test]
    fn content_type_is_inferred_from_extension() {
        assert_eq!(content_type_for("a/b/vocals.mp3"), "audio/mpeg");
        assert_eq!(content_type_for("a/b/cover.png"), "application/octet-stream");
    }
}
