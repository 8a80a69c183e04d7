//! Message queues connecting the pipeline stages.
//!
//! This module contains:
//! - `Queue` trait: point-to-point queue with delayed and batched sends
//! - `MessageHandler` trait: consumes batches of deliveries
//! - Message bodies exchanged between stages
//! - Implementations: in-process channel, Mock, SQS (feature `sqs`)
//!
//! Delivery is at-least-once. A handler reports the deliveries it could not
//! process; those are redelivered later and every other delivery is
//! acknowledged.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::config::{MessagingConfig, MessagingType};

pub mod channel;
pub mod messages;
pub mod mock;

#[cfg(feature = "sqs")]
pub mod sqs;

pub use channel::ChannelQueue;
pub use messages::{RequeueMessage, ScoreEntry, ScoringTrigger};
pub use mock::MockQueue;

#[cfg(feature = "sqs")]
pub use sqs::SqsQueue;

/// Maximum entries per batch send and per delivered batch (SQS limit).
pub const MAX_BATCH_SIZE: usize = 10;

/// Longest delay a send may carry (SQS limit).
pub const MAX_DELAY: Duration = Duration::from_secs(900);

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("Batch of {0} entries exceeds the limit of {MAX_BATCH_SIZE}")]
    BatchTooLarge(usize),

    #[error("Subscribe not supported for this queue type")]
    SubscribeNotSupported,
}

/// One received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Provider message id, unique within a delivered batch.
    pub id: String,
    pub body: String,
    /// Times this message has been received, starting at 1.
    pub receive_count: u32,
}

impl Delivery {
    /// Decode the JSON body.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| BusError::Decode(format!("message {}: {}", self.id, e)))
    }
}

/// One entry of a batch send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    /// Caller-chosen id, unique within the batch.
    pub id: String,
    pub body: String,
}

/// Outcome of a batch send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSendResult {
    /// Ids of the entries the provider did not accept.
    pub failed: Vec<String>,
}

/// Handler verdict for a delivered batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchResponse {
    /// Delivery ids to redeliver. Every other delivery is acknowledged.
    pub failed: Vec<String>,
}

impl BatchResponse {
    /// Acknowledge the whole batch.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Redeliver every delivery of the batch.
    pub fn retry_all(deliveries: &[Delivery]) -> Self {
        Self {
            failed: deliveries.iter().map(|d| d.id.clone()).collect(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Handler for batches delivered by a queue.
pub trait MessageHandler: Send + Sync {
    /// Process up to `MAX_BATCH_SIZE` deliveries.
    fn handle(&self, deliveries: Vec<Delivery>) -> BoxFuture<'static, BatchResponse>;
}

/// A point-to-point queue.
///
/// Implementations:
/// - `ChannelQueue`: in-process, for standalone mode
/// - `MockQueue`: records sends for tests
/// - `SqsQueue`: AWS SQS
#[async_trait]
pub trait Queue: Send + Sync {
    /// Queue name, for logging.
    fn name(&self) -> &str;

    /// Send one message, visible after `delay` (clamped to `MAX_DELAY`).
    async fn send(&self, body: String, delay: Duration) -> Result<()>;

    /// Send up to `MAX_BATCH_SIZE` messages in one request.
    ///
    /// Entry-level rejections are reported in the result; a failure of the
    /// whole request is an error.
    async fn send_batch(&self, entries: Vec<BatchEntry>) -> Result<BatchSendResult>;

    /// Register the consumer for this queue.
    async fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<()>;

    /// Start delivering to the subscribed handler.
    async fn start_consuming(&self) -> Result<()> {
        Ok(())
    }
}

/// Serialize `message` as JSON and send it.
pub async fn send_json<T: Serialize + ?Sized>(
    queue: &dyn Queue,
    message: &T,
    delay: Duration,
) -> Result<()> {
    let body = serde_json::to_string(message).map_err(|e| BusError::Publish(e.to_string()))?;
    queue.send(body, delay).await
}

/// Reject oversized batches before they reach the provider.
pub(crate) fn check_batch(entries: &[BatchEntry]) -> Result<()> {
    if entries.len() > MAX_BATCH_SIZE {
        return Err(BusError::BatchTooLarge(entries.len()));
    }
    Ok(())
}

/// The three pipeline queues.
#[derive(Clone)]
pub struct Queues {
    /// Monitor self-requeue, delay-bearing.
    pub requeue: Arc<dyn Queue>,
    /// Played song ids awaiting scoring.
    pub scoring: Arc<dyn Queue>,
    /// `(user, points)` entries awaiting distribution.
    pub score_batch: Arc<dyn Queue>,
}

/// Initialize the pipeline queues based on configuration.
pub async fn init_queues(
    config: &MessagingConfig,
) -> std::result::Result<Queues, Box<dyn std::error::Error>> {
    let names = &config.queues;
    match config.messaging_type {
        MessagingType::Channel => {
            let make = |name: &str| -> Arc<dyn Queue> {
                Arc::new(ChannelQueue::new(name, config.channel.clone()))
            };
            info!(messaging_type = "channel", "Queues initialized");
            Ok(Queues {
                requeue: make(&names.requeue),
                scoring: make(&names.scoring),
                score_batch: make(&names.score_batch),
            })
        }
        MessagingType::Sqs => {
            #[cfg(feature = "sqs")]
            {
                let client = sqs::connect(&config.sqs).await;
                let requeue = SqsQueue::open(client.clone(), &names.requeue, &config.sqs).await?;
                let scoring = SqsQueue::open(client.clone(), &names.scoring, &config.sqs).await?;
                let score_batch = SqsQueue::open(client, &names.score_batch, &config.sqs).await?;
                info!(messaging_type = "sqs", "Queues initialized");
                Ok(Queues {
                    requeue: Arc::new(requeue),
                    scoring: Arc::new(scoring),
                    score_batch: Arc::new(score_batch),
                })
            }

            #[cfg(not(feature = "sqs"))]
            {
                Err("SQS support requires the 'sqs' feature. Rebuild with --features sqs".into())
            }
        }
    }
}

#[cfg(test)]
mod tests;
