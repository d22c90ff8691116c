//! Worker configuration.

use std::path::PathBuf;

use crate::error::{WorkerError, WorkerResult};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of queue-worker instances to run
    pub worker_count: usize,
    /// Scratch directory for downloads and split output
    pub work_dir: PathBuf,
    /// Path to the spleeter binary
    pub spleeter_bin: PathBuf,
    /// Path to the yt-dlp binary
    pub ytdlp_bin: PathBuf,
}

impl WorkerConfig {
    /// Create config from environment variables.
    ///
    /// Binary paths fall back to a `$PATH` lookup; a tool that can't be found
    /// either way is a startup failure, not a runtime one.
    pub fn from_env() -> WorkerResult<Self> {
        Ok(Self {
            worker_count: std::env::var("WORKER_COUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/stemsplit")),
            spleeter_bin: resolve_bin("SPLEETER_BIN_PATH", "spleeter")?,
            ytdlp_bin: resolve_bin("YTDLP_BIN_PATH", "yt-dlp")?,
        })
    }
}

fn resolve_bin(env_key: &str, bin_name: &str) -> WorkerResult<PathBuf> {
    if let Ok(path) = std::env::var(env_key) {
        return Ok(PathBuf::from(path));
    }

    which::which(bin_name).map_err(|_| {
        WorkerError::config_error(format!(
            "{env_key} not set and `{bin_name}` not found on PATH"
        ))
    })
}
