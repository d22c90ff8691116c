//! File-level stem splitting.
//!
//! [`LocalFileSplitter`] shells out to spleeter on local paths.
//! [`RemoteFileSplitter`] wraps it with the remote round trip: fetch the
//! original, split locally, upload every stem concurrently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::task::JoinSet;
use tracing::{debug, info};

use stemsplit_models::SplitType;
use stemsplit_storage::FileStore;

use crate::error::{WorkerError, WorkerResult};
use crate::router::StemUrls;

/// Map of stem name to local file path, as produced by a local split.
pub type StemFilePaths = HashMap<String, PathBuf>;

/// Splits a stored original into stems living under a remote directory URL.
#[async_trait]
pub trait FileSplitter: Send + Sync {
    async fn split_file(
        &self,
        source_url: &str,
        dest_dir_url: &str,
        split_type: SplitType,
    ) -> WorkerResult<StemUrls>;
}

/// Runs spleeter against local files.
pub struct LocalFileSplitter {
    spleeter_bin: PathBuf,
    working_dir: PathBuf,
}

impl LocalFileSplitter {
    pub fn new(
        spleeter_bin: impl Into<PathBuf>,
        working_dir: impl Into<PathBuf>,
    ) -> WorkerResult<Self> {
        let working_dir = working_dir.into();
        std::fs::create_dir_all(&working_dir)?;

        Ok(Self {
            spleeter_bin: spleeter_bin.into(),
            working_dir,
        })
    }

    /// Split a local audio file into `{stem_name: local_path}`.
    pub async fn split_local(
        &self,
        source_path: &Path,
        dest_dir: &Path,
        split_type: SplitType,
    ) -> WorkerResult<StemFilePaths> {
        info!(
            source = %source_path.display(),
            dest = %dest_dir.display(),
            split_type = %split_type,
            "Running spleeter command"
        );

        let output = Command::new(&self.spleeter_bin)
            .arg("separate")
            .arg("-i")
            .arg(source_path)
            .args(["-p", &spleeter_param(split_type)])
            .arg("-o")
            .arg(dest_dir)
            .args(["-c", "mp3", "-b", "320k", "-f", "{instrument}.mp3"])
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(WorkerError::split_failed(format!(
                "spleeter exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        debug!("Finished spleeter command");
        collect_stem_paths(dest_dir).await
    }
}

fn spleeter_param(split_type: SplitType) -> String {
    format!("spleeter:{}stems-16khz", split_type.stem_count())
}

/// Collect `{stem_name: path}` from a split output directory.
async fn collect_stem_paths(dir: &Path) -> WorkerResult<StemFilePaths> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut outputs = StemFilePaths::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }

        let Some(stem_name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        outputs.insert(stem_name.to_string(), path);
    }

    if outputs.is_empty() {
        return Err(WorkerError::split_failed(format!(
            "no stem files in output directory {}",
            dir.display()
        )));
    }

    Ok(outputs)
}

/// Splits remotely-stored originals: fetch, split locally, upload stems.
pub struct RemoteFileSplitter {
    file_store: Arc<dyn FileStore>,
    local_splitter: LocalFileSplitter,
    working_dir: PathBuf,
}

impl RemoteFileSplitter {
    pub fn new(
        file_store: Arc<dyn FileStore>,
        local_splitter: LocalFileSplitter,
        working_dir: impl Into<PathBuf>,
    ) -> WorkerResult<Self> {
        let working_dir = working_dir.into();
        std::fs::create_dir_all(&working_dir)?;

        Ok(Self {
            file_store,
            local_splitter,
            working_dir,
        })
    }
}

#[async_trait]
impl FileSplitter for RemoteFileSplitter {
    async fn split_file(
        &self,
        source_url: &str,
        dest_dir_url: &str,
        split_type: SplitType,
    ) -> WorkerResult<StemUrls> {
        info!(source_url, "Fetching original from remote file store");
        let contents = self.file_store.get_file(source_url).await?;

        let original_dir = tempfile::Builder::new()
            .prefix("original-")
            .tempdir_in(&self.working_dir)?;
        let original_path = original_dir.path().join("original.mp3");
        tokio::fs::write(&original_path, contents).await?;

        let stems_dir = tempfile::Builder::new()
            .prefix("stems-")
            .tempdir_in(&self.working_dir)?;

        let local_paths = self
            .local_splitter
            .split_local(&original_path, stems_dir.path(), split_type)
            .await?;

        info!(dest_dir_url, stems = local_paths.len(), "Uploading stem files");
        upload_stems(Arc::clone(&self.file_store), dest_dir_url, local_paths).await
    }
}

/// Upload every stem concurrently, one task per stem.
///
/// Destination URLs are deterministic (`{dest_dir_url}/{stem}.mp3`). The
/// first failed upload wins: its error is returned and the remaining
/// in-flight tasks are aborted when the set drops. Either the complete URL
/// map comes back or none of it does.
pub async fn upload_stems(
    file_store: Arc<dyn FileStore>,
    dest_dir_url: &str,
    local_paths: StemFilePaths,
) -> WorkerResult<StemUrls> {
    let mut tasks: JoinSet<WorkerResult<()>> = JoinSet::new();
    let mut stem_urls = StemUrls::new();

    for (stem_name, local_path) in local_paths {
        let dest_url = format!("{dest_dir_url}/{stem_name}.mp3");
        stem_urls.insert(stem_name, dest_url.clone());

        let store = Arc::clone(&file_store);
        tasks.spawn(async move {
            let contents = tokio::fs::read(&local_path).await.map_err(|e| {
                WorkerError::upload_failed(format!(
                    "failed to read local stem file {}: {e}",
                    local_path.display()
                ))
            })?;
            store.write_file(&dest_url, contents).await?;
            Ok(())
        });
    }

    while let Some(joined) = tasks.join_next().await {
        joined.map_err(|e| WorkerError::upload_failed(format!("upload task failed: {e}")))??;
    }

    Ok(stem_urls)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use stemsplit_storage::{StorageError, StorageResult};

    use super::*;

    struct InMemoryFileStore {
        objects: Mutex<HashMap<String, Vec<u8>>>,
        fail_writes_to: Option<String>,
    }

    impl InMemoryFileStore {
        fn new() -> Self {
            Self {
                objects: Mutex::new(HashMap::new()),
                fail_writes_to: None,
            }
        }

        fn failing_on(stem_url: impl Into<String>) -> Self {
            Self {
                objects: Mutex::new(HashMap::new()),
                fail_writes_to: Some(stem_url.into()),
            }
        }
    }

    #[async_trait]
    impl FileStore for InMemoryFileStore {
        async fn get_file(&self, url: &str) -> StorageResult<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| StorageError::not_found(url))
        }

        async fn write_file(&self, url: &str, contents: Vec<u8>) -> StorageResult<()> {
            if self.fail_writes_to.as_deref() == Some(url) {
                return Err(StorageError::upload_failed("backend unavailable"));
            }
            self.objects.lock().unwrap().insert(url.to_string(), contents);
            Ok(())
        }
    }

    fn write_stem_files(dir: &Path, stems: &[&str]) -> StemFilePaths {
        let mut paths = StemFilePaths::new();
        for stem in stems {
            let path = dir.join(format!("{stem}.mp3"));
            std::fs::write(&path, stem.as_bytes()).unwrap();
            paths.insert(stem.to_string(), path);
        }
        paths
    }

    #[tokio::test]
    async fn upload_returns_one_url_per_stem() {
        let dir = tempfile::tempdir().unwrap();
        let local_paths = write_stem_files(dir.path(), &["vocals", "drums", "bass", "other"]);
        let store = Arc::new(InMemoryFileStore::new());

        let urls = upload_stems(
            Arc::clone(&store) as Arc<dyn FileStore>,
            "https://store/b/tl-1/t-1/4stems",
            local_paths,
        )
        .await
        .expect("uploads succeed");

        let mut stems: Vec<_> = urls.keys().cloned().collect();
        stems.sort();
        assert_eq!(stems, ["bass", "drums", "other", "vocals"]);
        assert_eq!(
            urls["vocals"],
            "https://store/b/tl-1/t-1/4stems/vocals.mp3"
        );

        let objects = store.objects.lock().unwrap();
        assert_eq!(objects.len(), 4);
        assert_eq!(
            objects["https://store/b/tl-1/t-1/4stems/drums.mp3"],
            b"drums".to_vec()
        );
    }

    #[tokio::test]
    async fn one_failed_upload_fails_the_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let local_paths = write_stem_files(dir.path(), &["vocals", "drums"]);
        let store = Arc::new(InMemoryFileStore::failing_on(
            "https://store/b/tl-1/t-1/2stems/drums.mp3",
        ));

        let result = upload_stems(
            Arc::clone(&store) as Arc<dyn FileStore>,
            "https://store/b/tl-1/t-1/2stems",
            local_paths,
        )
        .await;

        assert!(matches!(
            result,
            Err(WorkerError::Storage(StorageError::UploadFailed(_)))
        ));
    }

    #[tokio::test]
    async fn missing_local_stem_file_is_an_upload_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut local_paths = write_stem_files(dir.path(), &["vocals"]);
        local_paths.insert(
            "drums".to_string(),
            dir.path().join("never-written.mp3"),
        );
        let store = Arc::new(InMemoryFileStore::new());

        let result = upload_stems(
            Arc::clone(&store) as Arc<dyn FileStore>,
            "https://store/b/tl-1/t-1/2stems",
            local_paths,
        )
        .await;

        assert!(matches!(result, Err(WorkerError::UploadFailed(_))));
    }

    #[tokio::test]
    async fn collect_stem_paths_names_files_by_stem() {
        let dir = tempfile::tempdir().unwrap();
        write_stem_files(dir.path(), &["vocals", "accompaniment"]);
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let paths = collect_stem_paths(dir.path()).await.expect("collect");
        assert_eq!(paths.len(), 2);
        assert!(paths.contains_key("vocals"));
        assert!(paths.contains_key("accompaniment"));
    }

    #[tokio::test]
    async fn empty_split_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            collect_stem_paths(dir.path()).await,
            Err(WorkerError::SplitFailed(_))
        ));
    }

    #[test]
    fn spleeter_param_tracks_arity() {
        assert_eq!(spleeter_param(SplitType::TwoStems), "spleeter:2stems-16khz");
        assert_eq!(spleeter_param(SplitType::FourStems), "spleeter:4stems-16khz");
        assert_eq!(spleeter_param(SplitType::FiveStems), "spleeter:5stems-16khz");
    }
}
