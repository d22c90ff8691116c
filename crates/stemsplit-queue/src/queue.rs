//! Job queue using Redis Streams.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::message::JobMessage;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream name for jobs
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter queue stream name
    pub dlq_stream_name: String,
    /// Max delivery attempts before DLQ
    pub max_retries: u32,
    /// How long a receive blocks waiting for a delivery
    pub block_timeout: Duration,
    /// How often a subscription scans for orphaned pending entries
    pub claim_interval: Duration,
    /// Minimum idle time before a pending entry can be claimed (crash recovery)
    pub claim_min_idle: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "stemsplit:jobs".to_string(),
            consumer_group: "stemsplit:workers".to_string(),
            dlq_stream_name: "stemsplit:dlq".to_string(),
            max_retries: 3,
            block_timeout: Duration::from_secs(1),
            claim_interval: Duration::from_secs(30),
            claim_min_idle: Duration::from_secs(300),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_retries: std::env::var("QUEUE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            block_timeout: Duration::from_millis(
                std::env::var("QUEUE_BLOCK_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(1000),
            ),
            claim_interval: Duration::from_secs(
                std::env::var("QUEUE_CLAIM_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            claim_min_idle: Duration::from_secs(
                std::env::var("QUEUE_CLAIM_MIN_IDLE_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        }
    }
}

/// One message handed to a worker, with its stream bookkeeping.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Stream entry id, used to ack
    pub message_id: String,
    /// How many times this message has been requeued after a nack
    pub retries: u32,
    /// The decoded envelope
    pub message: JobMessage,
}

/// Publish seam used by the job router to emit next-stage messages.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: &JobMessage) -> QueueResult<()>;
}

/// One worker's view of the queue: blocking receive plus ack/nack.
#[async_trait]
pub trait MessageStream: Send + Sync {
    /// Block until a delivery arrives. `Ok(None)` means the subscription has
    /// closed and the worker should stop draining.
    async fn receive(&self) -> QueueResult<Option<Delivery>>;

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()>;

    /// Negative-acknowledge: requeue with an incremented retry count, or move
    /// to the DLQ once the retry budget is spent.
    async fn nack(&self, delivery: &Delivery, error: &str) -> QueueResult<()>;
}

/// Job queue client.
pub struct JobQueue {
    client: redis::Client,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self { client, config })
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Open a named subscription on the shared consumer group.
    pub fn subscribe(self: &Arc<Self>, consumer_name: impl Into<String>) -> Subscription {
        Subscription {
            queue: Arc::clone(self),
            consumer_name: consumer_name.into(),
            last_claim: tokio::sync::Mutex::new(Instant::now()),
        }
    }

    /// Enqueue a message. Returns the stream entry id.
    pub async fn enqueue(&self, message: &JobMessage) -> QueueResult<String> {
        self.enqueue_with_retries(message, 0).await
    }

    async fn enqueue_with_retries(&self, message: &JobMessage, retries: u32) -> QueueResult<String> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("type")
            .arg(&message.job_type)
            .arg("body")
            .arg(message.body.as_slice())
            .arg("retries")
            .arg(retries)
            .query_async(&mut conn)
            .await?;

        debug!(
            job_type = %message.job_type,
            message_id = %message_id,
            retries,
            "Enqueued job message"
        );

        Ok(message_id)
    }

    /// Acknowledge a delivery (mark as completed).
    pub async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        redis::cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .query_async::<()>(&mut conn)
            .await?;

        debug!("Acknowledged message: {}", message_id);
        Ok(())
    }

    /// Negatively acknowledge a delivery.
    ///
    /// Requeues the message with an incremented retry count; once the retry
    /// budget is exhausted the message lands in the DLQ stream instead. The
    /// original entry is acked either way so the group never wedges on it.
    pub async fn nack(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let attempt = delivery.retries + 1;

        if attempt >= self.config.max_retries {
            warn!(
                job_type = %delivery.message.job_type,
                message_id = %delivery.message_id,
                max_retries = self.config.max_retries,
                "Retry budget exhausted, moving message to DLQ"
            );
            self.dead_letter(delivery, error).await?;
        } else {
            let requeued_id = self
                .enqueue_with_retries(&delivery.message, attempt)
                .await?;
            self.ack(&delivery.message_id).await?;
            info!(
                job_type = %delivery.message.job_type,
                message_id = %delivery.message_id,
                requeued_id = %requeued_id,
                attempt,
                max_retries = self.config.max_retries,
                "Requeued nacked message"
            );
        }

        Ok(())
    }

    /// Move a delivery to the dead letter queue.
    async fn dead_letter(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        redis::cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("type")
            .arg(&delivery.message.job_type)
            .arg("body")
            .arg(delivery.message.body.as_slice())
            .arg("error")
            .arg(error)
            .arg("original_id")
            .arg(&delivery.message_id)
            .query_async::<()>(&mut conn)
            .await?;

        self.ack(&delivery.message_id).await?;
        Ok(())
    }

    /// Consume up to one new delivery for a named consumer.
    async fn consume(&self, consumer_name: &str) -> QueueResult<Option<Delivery>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let result: redis::streams::StreamReadReply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.config.block_timeout.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        for stream_key in result.keys {
            for entry in stream_key.ids {
                match Self::delivery_from_entry(&entry) {
                    Ok(delivery) => return Ok(Some(delivery)),
                    Err(e) => {
                        // A stream entry we can't even frame can never
                        // succeed; ack it so it doesn't wedge the group.
                        warn!("Dropping malformed stream entry: {}", e);
                        self.ack(&entry.id).await.ok();
                    }
                }
            }
        }

        Ok(None)
    }

    /// Claim one pending delivery that has been idle for too long.
    /// This handles messages from crashed workers.
    async fn claim_pending(&self, consumer_name: &str) -> QueueResult<Option<Delivery>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let pending: redis::streams::StreamPendingReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .query_async(&mut conn)
            .await?;

        if pending.count() == 0 {
            return Ok(None);
        }

        let result: redis::streams::StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(consumer_name)
            .arg(self.config.claim_min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut conn)
            .await?;

        for entry in result.ids {
            match Self::delivery_from_entry(&entry) {
                Ok(delivery) => {
                    info!(
                        message_id = %delivery.message_id,
                        "Claimed pending message from stalled consumer"
                    );
                    return Ok(Some(delivery));
                }
                Err(e) => {
                    warn!("Dropping malformed claimed entry: {}", e);
                    self.ack(&entry.id).await.ok();
                }
            }
        }

        Ok(None)
    }

    fn delivery_from_entry(entry: &redis::streams::StreamId) -> QueueResult<Delivery> {
        let job_type = match entry.map.get("type") {
            Some(redis::Value::BulkString(bytes)) => String::from_utf8_lossy(bytes).into_owned(),
            _ => {
                return Err(QueueError::MalformedDelivery(
                    entry.id.clone(),
                    "missing type field".to_string(),
                ))
            }
        };

        let body = match entry.map.get("body") {
            Some(redis::Value::BulkString(bytes)) => bytes.clone(),
            _ => {
                return Err(QueueError::MalformedDelivery(
                    entry.id.clone(),
                    "missing body field".to_string(),
                ))
            }
        };

        let retries = match entry.map.get("retries") {
            Some(redis::Value::BulkString(bytes)) => {
                String::from_utf8_lossy(bytes).parse().unwrap_or(0)
            }
            Some(redis::Value::Int(n)) => *n as u32,
            _ => 0,
        };

        Ok(Delivery {
            message_id: entry.id.clone(),
            retries,
            message: JobMessage { job_type, body },
        })
    }
}

#[async_trait]
impl Publisher for JobQueue {
    async fn publish(&self, message: &JobMessage) -> QueueResult<()> {
        self.enqueue(message).await?;
        Ok(())
    }
}

/// One consumer's subscription on the queue.
///
/// Receives block on new deliveries, with a periodic scan for pending entries
/// abandoned by crashed workers.
pub struct Subscription {
    queue: Arc<JobQueue>,
    consumer_name: String,
    last_claim: tokio::sync::Mutex<Instant>,
}

impl Subscription {
    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    async fn claim_due(&self) -> bool {
        let mut last = self.last_claim.lock().await;
        if last.elapsed() >= self.queue.config.claim_interval {
            *last = Instant::now();
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl MessageStream for Subscription {
    async fn receive(&self) -> QueueResult<Option<Delivery>> {
        // A Redis stream has no end-of-subscription signal; shutdown is
        // layered on externally by the caller. This loop only returns with
        // a delivery or an error.
        loop {
            if self.claim_due().await {
                if let Some(delivery) = self.queue.claim_pending(&self.consumer_name).await? {
                    return Ok(Some(delivery));
                }
            }

            if let Some(delivery) = self.queue.consume(&self.consumer_name).await? {
                return Ok(Some(delivery));
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> QueueResult<()> {
        self.queue.ack(&delivery.message_id).await
    }

    async fn nack(&self, delivery: &Delivery, error: &str) -> QueueResult<()> {
        self.queue.nack(delivery, error).await
    }
}
