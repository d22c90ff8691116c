//! Stem-split pipeline worker binary.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use stemsplit_queue::{JobQueue, QueueConfig};
use stemsplit_storage::{FileStore, S3Client, S3Config};
use stemsplit_tracks::{DynamoTrackStore, TrackStore, TrackStoreConfig};
use stemsplit_worker::downloader::{HttpDownloader, SelectDownloader, YtDlpDownloader};
use stemsplit_worker::router::JobRouter;
use stemsplit_worker::save_stems_job::SaveStemsHandler;
use stemsplit_worker::split_job::{SplitHandler, TrackSplitter};
use stemsplit_worker::splitter::{LocalFileSplitter, RemoteFileSplitter};
use stemsplit_worker::start_job::StartHandler;
use stemsplit_worker::transfer_job::{TrackTransferrer, TransferHandler};
use stemsplit_worker::{QueueWorker, WorkerConfig};

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::from_default_env().add_directive("stemsplit=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting stemsplit-worker");

    let config = match WorkerConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load worker config: {}", e);
            std::process::exit(1);
        }
    };
    info!("Worker config: {:?}", config);

    let queue = match JobQueue::new(QueueConfig::from_env()) {
        Ok(q) => Arc::new(q),
        Err(e) => {
            error!("Failed to create job queue: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = queue.init().await {
        error!("Failed to initialize job queue: {}", e);
        std::process::exit(1);
    }

    let storage_config = match S3Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load storage config: {}", e);
            std::process::exit(1);
        }
    };
    let file_store = Arc::new(S3Client::new(storage_config));
    let bucket_url = file_store.bucket_url().clone();

    let tracks_config = match TrackStoreConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load track store config: {}", e);
            std::process::exit(1);
        }
    };
    let track_store: Arc<dyn TrackStore> = Arc::new(DynamoTrackStore::new(tracks_config).await);

    let queue_for_publisher = Arc::clone(&queue);
    let publisher: Arc<dyn stemsplit_queue::Publisher> = queue_for_publisher;
    let router = match build_router(
        &config,
        Arc::clone(&track_store),
        publisher,
        file_store,
        bucket_url,
    ) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to build job router: {}", e);
            std::process::exit(1);
        }
    };

    let mut workers = JoinSet::new();
    for _ in 0..config.worker_count {
        let consumer_name = format!("worker-{}", Uuid::new_v4());
        let subscription = queue.subscribe(&consumer_name);
        let worker = QueueWorker::new(subscription, router.clone());
        info!(%consumer_name, "Spawning queue worker");
        workers.spawn(async move { worker.run().await });
    }

    // The receive loop has no internal stop signal; shutdown is ctrl-c only.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        Some(result) = workers.join_next() => {
            match result {
                Ok(Ok(())) => info!("Queue worker stopped"),
                Ok(Err(e)) => error!("Queue worker failed: {}", e),
                Err(e) => error!("Queue worker panicked: {}", e),
            }
        }
    }

    workers.shutdown().await;
    info!("Worker shutdown complete");
}

fn build_router(
    config: &WorkerConfig,
    track_store: Arc<dyn TrackStore>,
    publisher: Arc<dyn stemsplit_queue::Publisher>,
    file_store: Arc<dyn FileStore>,
    bucket_url: stemsplit_storage::BucketUrl,
) -> stemsplit_worker::WorkerResult<JobRouter> {
    let downloader = Arc::new(SelectDownloader::new(
        YtDlpDownloader::new(&config.ytdlp_bin),
        HttpDownloader::new(),
    ));

    let transferrer = TrackTransferrer::new(
        Arc::clone(&track_store),
        Arc::clone(&file_store),
        downloader,
        bucket_url.clone(),
        config.work_dir.join("transfer"),
    )?;

    let local_splitter =
        LocalFileSplitter::new(&config.spleeter_bin, config.work_dir.join("split"))?;
    let remote_splitter = Arc::new(RemoteFileSplitter::new(
        file_store,
        local_splitter,
        config.work_dir.join("split"),
    )?);

    Ok(JobRouter::new(
        Arc::clone(&track_store),
        publisher,
        Arc::new(StartHandler::new(Arc::clone(&track_store))),
        Arc::new(TransferHandler::new(transferrer)),
        Arc::new(SplitHandler::new(TrackSplitter::new(
            Arc::clone(&track_store),
            remote_splitter,
            bucket_url,
        ))),
        Arc::new(SaveStemsHandler::new(track_store)),
    ))
}
