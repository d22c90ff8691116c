//! Queue-consumption loop.
//!
//! One `QueueWorker` drains one subscription, handing every delivery to the
//! router and translating the outcome into ack/nack. This is the single
//! place errors are logged and converted; the router has already recorded
//! them on the track.

use std::time::Duration;

use tracing::{error, info};

use stemsplit_queue::{Delivery, MessageStream};

use crate::error::WorkerResult;
use crate::router::JobRouter;

/// How long to back off when the queue itself errors on receive.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(5);

pub struct QueueWorker<S: MessageStream> {
    stream: S,
    router: JobRouter,
}

impl<S: MessageStream> QueueWorker<S> {
    pub fn new(stream: S, router: JobRouter) -> Self {
        Self { stream, router }
    }

    /// Drain the subscription until it closes.
    ///
    /// Handling is strictly sequential within one worker; horizontal
    /// fan-out comes from running more workers, each with its own
    /// subscription. There is no per-job cancellation: a delivery, once
    /// started, runs to completion or failure.
    pub async fn run(&self) -> WorkerResult<()> {
        info!("Starting queue worker");

        loop {
            let delivery = match self.stream.receive().await {
                Ok(Some(delivery)) => delivery,
                Ok(None) => {
                    info!("Subscription closed, stopping worker");
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %e, "Failed to receive from queue");
                    tokio::time::sleep(RECEIVE_BACKOFF).await;
                    continue;
                }
            };

            self.handle_delivery(&delivery).await;
        }
    }

    async fn handle_delivery(&self, delivery: &Delivery) {
        let job_type = delivery.message.job_type.as_str();
        info!(
            job_type,
            message_id = %delivery.message_id,
            "Handling message"
        );

        match self.router.handle_message(&delivery.message).await {
            Ok(()) => {
                info!(
                    job_type,
                    message_id = %delivery.message_id,
                    "Successfully processed message"
                );
                if let Err(e) = self.stream.ack(delivery).await {
                    error!(
                        job_type,
                        message_id = %delivery.message_id,
                        error = %e,
                        "Failed to ack message"
                    );
                }
            }
            Err(job_error) => {
                error!(
                    job_type,
                    message_id = %delivery.message_id,
                    retries = delivery.retries,
                    error = %job_error,
                    "Failed to process message"
                );
                if let Err(e) = self.stream.nack(delivery, &job_error.to_string()).await {
                    error!(
                        job_type,
                        message_id = %delivery.message_id,
                        error = %e,
                        "Failed to nack message"
                    );
                }
            }
        }
    }
}
