//! End-to-end pipeline tests: all four stages against in-memory collaborators.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use stemsplit_models::{SplitStemTrack, SplitTrackStatus, Track, TrackType};
use stemsplit_queue::{
    Delivery, JobMessage, JobType, MessageStream, Publisher, QueueResult, SaveStemsJobParams,
    SplitJobParams,
};
use stemsplit_storage::{BucketUrl, FileStore, StorageError, StorageResult};
use stemsplit_tracks::{TrackResult, TrackStore, TrackStoreError};
use stemsplit_worker::downloader::Downloader;
use stemsplit_worker::router::{JobRouter, StemUrls};
use stemsplit_worker::save_stems_job::SaveStemsHandler;
use stemsplit_worker::split_job::{SplitHandler, TrackSplitter};
use stemsplit_worker::splitter::FileSplitter;
use stemsplit_worker::start_job::StartHandler;
use stemsplit_worker::transfer_job::{TrackTransferrer, TransferHandler};
use stemsplit_worker::{QueueWorker, WorkerResult};

const ORIGINAL_BYTES: &[u8] = b"original-audio-bytes";

struct InMemoryTrackStore {
    tracks: Mutex<HashMap<(String, String), Track>>,
}

impl InMemoryTrackStore {
    fn seeded(track_list_id: &str, track_id: &str, track: Track) -> Self {
        let mut tracks = HashMap::new();
        tracks.insert((track_list_id.to_string(), track_id.to_string()), track);
        Self {
            tracks: Mutex::new(tracks),
        }
    }

    fn track(&self, track_list_id: &str, track_id: &str) -> Track {
        self.tracks
            .lock()
            .unwrap()
            .get(&(track_list_id.to_string(), track_id.to_string()))
            .cloned()
            .expect("track seeded")
    }
}

#[async_trait]
impl TrackStore for InMemoryTrackStore {
    async fn get_track(&self, track_list_id: &str, track_id: &str) -> TrackResult<Track> {
        self.tracks
            .lock()
            .unwrap()
            .get(&(track_list_id.to_string(), track_id.to_string()))
            .cloned()
            .ok_or_else(|| TrackStoreError::TrackNotFound(track_id.to_string()))
    }

    async fn set_track(&self, track_list_id: &str, track_id: &str, track: Track) -> TrackResult<()> {
        self.tracks
            .lock()
            .unwrap()
            .insert((track_list_id.to_string(), track_id.to_string()), track);
        Ok(())
    }
}

struct RecordingPublisher {
    published: Mutex<Vec<JobMessage>>,
}

impl RecordingPublisher {
    fn new() -> Self {
        Self {
            published: Mutex::new(Vec::new()),
        }
    }

    fn messages(&self) -> Vec<JobMessage> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(&self, message: &JobMessage) -> QueueResult<()> {
        self.published.lock().unwrap().push(message.clone());
        Ok(())
    }
}

struct InMemoryFileStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: bool,
}

impl InMemoryFileStore {
    fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail_writes: false,
        }
    }

    fn unavailable() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail_writes: true,
        }
    }

    fn object(&self, url: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(url).cloned()
    }
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn get_file(&self, url: &str) -> StorageResult<Vec<u8>> {
        self.object(url).ok_or_else(|| StorageError::not_found(url))
    }

    async fn write_file(&self, url: &str, contents: Vec<u8>) -> StorageResult<()> {
        if self.fail_writes {
            return Err(StorageError::upload_failed("storage backend unavailable"));
        }
        self.objects.lock().unwrap().insert(url.to_string(), contents);
        Ok(())
    }
}

struct CannedDownloader;

#[async_trait]
impl Downloader for CannedDownloader {
    async fn download(&self, _source_url: &str, out_path: &Path) -> WorkerResult<()> {
        tokio::fs::write(out_path, ORIGINAL_BYTES).await?;
        Ok(())
    }
}

struct CannedSplitter {
    sources: Mutex<Vec<String>>,
}

impl CannedSplitter {
    fn new() -> Self {
        Self {
            sources: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl FileSplitter for CannedSplitter {
    async fn split_file(
        &self,
        source_url: &str,
        dest_dir_url: &str,
        split_type: stemsplit_models::SplitType,
    ) -> WorkerResult<StemUrls> {
        self.sources.lock().unwrap().push(source_url.to_string());

        let names: &[&str] = match split_type.stem_count() {
            2 => &["vocals", "accompaniment"],
            4 => &["vocals", "drums", "bass", "other"],
            _ => &["vocals", "drums", "bass", "piano", "other"],
        };

        Ok(names
            .iter()
            .map(|stem| (stem.to_string(), format!("{dest_dir_url}/{stem}.mp3")))
            .collect())
    }
}

struct Harness {
    store: Arc<InMemoryTrackStore>,
    publisher: Arc<RecordingPublisher>,
    file_store: Arc<InMemoryFileStore>,
    splitter: Arc<CannedSplitter>,
    router: JobRouter,
    _work_dir: tempfile::TempDir,
}

fn harness(file_store: InMemoryFileStore, initial: Track) -> Harness {
    let store = Arc::new(InMemoryTrackStore::seeded("tl-1", "t-1", initial));
    let publisher = Arc::new(RecordingPublisher::new());
    let file_store = Arc::new(file_store);
    let splitter = Arc::new(CannedSplitter::new());
    let bucket_url = BucketUrl::new("https://storage.test", "stems");
    let work_dir = tempfile::tempdir().unwrap();

    let track_store_clone = Arc::clone(&store);
    let track_store: Arc<dyn TrackStore> = track_store_clone;
    let file_store_clone = Arc::clone(&file_store);
    let file_store_dyn: Arc<dyn FileStore> = file_store_clone;
    let publisher_clone = Arc::clone(&publisher);
    let publisher_dyn: Arc<dyn Publisher> = publisher_clone;
    let splitter_clone = Arc::clone(&splitter);
    let splitter_dyn: Arc<dyn FileSplitter> = splitter_clone;
    let transferrer = TrackTransferrer::new(
        Arc::clone(&track_store),
        file_store_dyn,
        Arc::new(CannedDownloader),
        bucket_url.clone(),
        work_dir.path(),
    )
    .unwrap();

    let router = JobRouter::new(
        Arc::clone(&track_store),
        publisher_dyn,
        Arc::new(StartHandler::new(Arc::clone(&track_store))),
        Arc::new(TransferHandler::new(transferrer)),
        Arc::new(SplitHandler::new(TrackSplitter::new(
            Arc::clone(&track_store),
            splitter_dyn,
            bucket_url,
        ))),
        Arc::new(SaveStemsHandler::new(track_store)),
    );

    Harness {
        store,
        publisher,
        file_store,
        splitter,
        router,
        _work_dir: work_dir,
    }
}

fn split_request() -> Track {
    Track::from(SplitStemTrack::requested(
        TrackType::SplitFourStems,
        "https://yt/abc",
    ))
}

#[tokio::test]
async fn full_pipeline_ends_in_a_terminal_stem_track() {
    let h = harness(InMemoryFileStore::new(), split_request());

    let start = JobMessage::start_job("tl-1", "t-1").unwrap();
    h.router.handle_message(&start).await.expect("start stage");

    let after_start = h.store.track("tl-1", "t-1");
    let split = after_start.as_split_stem().unwrap();
    assert_eq!(split.job_status, SplitTrackStatus::Processing);
    assert_eq!(split.job_progress, 10);

    let transfer = h.publisher.messages()[0].clone();
    assert_eq!(transfer.job_type, JobType::TransferOriginal.as_str());
    h.router.handle_message(&transfer).await.expect("transfer stage");

    let saved_url = "https://storage.test/stems/tl-1/t-1/original/original.mp3";
    assert_eq!(h.file_store.object(saved_url).unwrap(), ORIGINAL_BYTES);

    let split_msg = h.publisher.messages()[1].clone();
    assert_eq!(split_msg.job_type, JobType::SplitTrack.as_str());
    let split_params = SplitJobParams::decode(&split_msg.body).unwrap();
    assert_eq!(split_params.saved_original_url, saved_url);
    assert_eq!(
        h.store.track("tl-1", "t-1").as_split_stem().unwrap().job_progress,
        30
    );

    h.router.handle_message(&split_msg).await.expect("split stage");
    assert_eq!(
        *h.splitter.sources.lock().unwrap(),
        vec![saved_url.to_string()]
    );

    let save_msg = h.publisher.messages()[2].clone();
    assert_eq!(save_msg.job_type, JobType::SaveStemsToDb.as_str());
    let save_params = SaveStemsJobParams::decode(&save_msg.body).unwrap();
    assert_eq!(save_params.stem_urls.len(), 4);
    assert_eq!(
        save_params.stem_urls["vocals"],
        "https://storage.test/stems/tl-1/t-1/4stems/vocals.mp3"
    );
    assert_eq!(
        h.store.track("tl-1", "t-1").as_split_stem().unwrap().job_progress,
        90
    );

    h.router.handle_message(&save_msg).await.expect("terminal stage");

    match h.store.track("tl-1", "t-1") {
        Track::Stem(stem) => {
            assert_eq!(stem.track_type, TrackType::FourStems);
            assert_eq!(stem.stem_urls, save_params.stem_urls);
        }
        other => panic!("expected terminal stem track, got {other:?}"),
    }

    assert_eq!(h.publisher.messages().len(), 3);
}

#[tokio::test]
async fn redelivered_start_job_does_not_restart_the_pipeline() {
    let h = harness(InMemoryFileStore::new(), split_request());

    let start = JobMessage::start_job("tl-1", "t-1").unwrap();
    h.router.handle_message(&start).await.expect("first delivery");
    let err = h.router.handle_message(&start).await.unwrap_err();

    assert!(err.to_string().contains("not in requested status"));
    // Only the first delivery published a transfer message.
    assert_eq!(h.publisher.messages().len(), 1);
}

struct ScriptedStream {
    deliveries: Mutex<VecDeque<Delivery>>,
    acks: Arc<Mutex<Vec<String>>>,
    nacks: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl MessageStream for ScriptedStream {
    async fn receive(&self) -> QueueResult<Option<Delivery>> {
        Ok(self.deliveries.lock().unwrap().pop_front())
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.acks.lock().unwrap().push(delivery.message_id.clone());
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        self.nacks
            .lock()
            .unwrap()
            .push((delivery.message_id.clone(), error.to_string()));
        Ok(())
    }
}

#[tokio::test]
async fn storage_outage_during_transfer_nacks_exactly_once() {
    let processing = {
        let mut track = SplitStemTrack::requested(TrackType::SplitFourStems, "https://yt/abc");
        track.job_status = SplitTrackStatus::Processing;
        Track::from(track)
    };
    let h = harness(InMemoryFileStore::unavailable(), processing);

    let acks = Arc::new(Mutex::new(Vec::new()));
    let nacks = Arc::new(Mutex::new(Vec::new()));
    let mut deliveries = VecDeque::new();
    deliveries.push_back(Delivery {
        message_id: "1-0".to_string(),
        retries: 0,
        message: JobMessage::transfer_original("tl-1", "t-1").unwrap(),
    });

    let stream = ScriptedStream {
        deliveries: Mutex::new(deliveries),
        acks: Arc::clone(&acks),
        nacks: Arc::clone(&nacks),
    };

    let worker = QueueWorker::new(stream, h.router.clone());
    worker.run().await.expect("drain subscription");

    assert!(acks.lock().unwrap().is_empty());
    let nacked = nacks.lock().unwrap();
    assert_eq!(nacked.len(), 1);
    assert!(nacked[0].1.contains("storage backend unavailable"));

    assert!(h.publisher.messages().is_empty());
    let track = h.store.track("tl-1", "t-1");
    let split = track.as_split_stem().unwrap();
    assert_eq!(split.job_status, SplitTrackStatus::Error);
    assert_eq!(
        split.job_status_message,
        "Failed to download source audio for processing"
    );
    assert!(!split.job_status_debug_log.is_empty());
}
