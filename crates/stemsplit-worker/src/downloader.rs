//! Source audio downloaders.
//!
//! YouTube URLs go through yt-dlp for audio extraction; anything else is a
//! plain HTTP GET.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::error::{WorkerError, WorkerResult};

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, source_url: &str, out_path: &Path) -> WorkerResult<()>;
}

/// Downloads and extracts audio via the yt-dlp binary.
pub struct YtDlpDownloader {
    bin_path: PathBuf,
}

impl YtDlpDownloader {
    pub fn new(bin_path: impl Into<PathBuf>) -> Self {
        Self {
            bin_path: bin_path.into(),
        }
    }
}

#[async_trait]
impl Downloader for YtDlpDownloader {
    async fn download(&self, source_url: &str, out_path: &Path) -> WorkerResult<()> {
        info!(source_url, "Running yt-dlp");

        let output = Command::new(&self.bin_path)
            .arg("-o")
            .arg(out_path)
            .args(["-x", "--audio-format", "mp3", "--audio-quality", "0"])
            .arg(source_url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkerError::download_failed(format!(
                "yt-dlp failed: {}",
                stderr.lines().last().unwrap_or("unknown error")
            )));
        }

        Ok(())
    }
}

/// Fetches a source file over plain HTTP.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, source_url: &str, out_path: &Path) -> WorkerResult<()> {
        info!(source_url, "Fetching source over HTTP");

        let response = self
            .client
            .get(source_url)
            .send()
            .await?
            .error_for_status()?;

        let contents = response.bytes().await?;
        tokio::fs::write(out_path, &contents).await?;

        Ok(())
    }
}

/// Picks a downloader by the source URL's host.
pub struct SelectDownloader {
    youtube: YtDlpDownloader,
    generic: HttpDownloader,
}

impl SelectDownloader {
    pub fn new(youtube: YtDlpDownloader, generic: HttpDownloader) -> Self {
        Self { youtube, generic }
    }
}

#[async_trait]
impl Downloader for SelectDownloader {
    async fn download(&self, source_url: &str, out_path: &Path) -> WorkerResult<()> {
        let parsed = url::Url::parse(source_url)
            .map_err(|e| WorkerError::download_failed(format!("Failed to parse source URL: {e}")))?;

        if parsed.host_str().is_some_and(is_youtube_host) {
            self.youtube.download(source_url, out_path).await
        } else {
            self.generic.download(source_url, out_path).await
        }
    }
}

fn is_youtube_host(host: &str) -> bool {
    host == "youtube.com" || host.ends_with(".youtube.com") || host == "youtu.be"
}
