//! AWS SQS queue implementation.
//!
//! One `SqsQueue` per pipeline queue. Queue URLs are resolved once at
//! startup (created if missing). Consumers long-poll in a spawned task,
//! hand each received batch to the handler, delete acknowledged messages and
//! leave failed ones for the visibility timeout to redeliver.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::types::{
    DeleteMessageBatchRequestEntry, MessageSystemAttributeName, QueueAttributeName,
    SendMessageBatchRequestEntry,
};
use aws_sdk_sqs::Client;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::{
    check_batch, BatchEntry, BatchSendResult, BusError, Delivery, MessageHandler, Queue, Result,
    MAX_BATCH_SIZE, MAX_DELAY,
};
use crate::config::SqsConfig;

/// Build an SQS client from configuration.
pub async fn connect(config: &SqsConfig) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());

    if let Some(ref region) = config.region {
        loader = loader.region(aws_config::Region::new(region.clone()));
    }

    if let Some(ref endpoint) = config.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }

    let sdk_config = loader.load().await;

    info!(
        region = ?config.region,
        endpoint = ?config.endpoint_url,
        "Connected to AWS SQS"
    );

    Client::new(&sdk_config)
}

/// Delay in whole seconds, rounded up and clamped to the SQS maximum.
pub(crate) fn delay_seconds(delay: Duration) -> i32 {
    let delay = delay.min(MAX_DELAY);
    let secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
    secs.min(MAX_DELAY.as_secs()) as i32
}

/// A single SQS queue.
pub struct SqsQueue {
    client: Client,
    name: String,
    url: String,
    config: SqsConfig,
    handler: Arc<RwLock<Option<Arc<dyn MessageHandler>>>>,
    consuming: Arc<RwLock<bool>>,
}

impl SqsQueue {
    /// Resolve the queue URL, creating the queue if it does not exist.
    pub async fn open(client: Client, name: &str, config: &SqsConfig) -> Result<Self> {
        let url = match client.get_queue_url().queue_name(name).send().await {
            Ok(output) => output.queue_url().map(str::to_string),
            Err(e) => {
                debug!(queue = %name, error = %e, "Queue URL lookup failed, creating queue");
                None
            }
        };

        let url = match url {
            Some(url) => url,
            None => client
                .create_queue()
                .queue_name(name)
                .attributes(
                    QueueAttributeName::VisibilityTimeout,
                    config.visibility_timeout_secs.to_string(),
                )
                .send()
                .await
                .map_err(|e| BusError::Connection(format!("Failed to create SQS queue: {}", e)))?
                .queue_url()
                .ok_or_else(|| {
                    BusError::Connection("SQS create_queue returned no URL".to_string())
                })?
                .to_string(),
        };

        info!(queue = %name, url = %url, "Created/found SQS queue");

        Ok(Self {
            client,
            name: name.to_string(),
            url,
            config: config.clone(),
            handler: Arc::new(RwLock::new(None)),
            consuming: Arc::new(RwLock::new(false)),
        })
    }
}

fn to_delivery(message: &aws_sdk_sqs::types::Message) -> Option<(Delivery, String)> {
    let id = message.message_id()?.to_string();
    let receipt = message.receipt_handle()?.to_string();
    let receive_count = message
        .attributes()
        .and_then(|attrs| attrs.get(&MessageSystemAttributeName::ApproximateReceiveCount))
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    Some((
        Delivery {
            id,
            body: message.body().unwrap_or_default().to_string(),
            receive_count,
        },
        receipt,
    ))
}

#[async_trait]
impl Queue for SqsQueue {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(name = "queue.send", skip_all, fields(queue = %self.name))]
    async fn send(&self, body: String, delay: Duration) -> Result<()> {
        self.client
            .send_message()
            .queue_url(&self.url)
            .message_body(body)
            .delay_seconds(delay_seconds(delay))
            .send()
            .await
            .map_err(|e| BusError::Publish(format!("Failed to send to SQS: {}", e)))?;

        debug!(delay = ?delay, "Sent message to SQS");
        Ok(())
    }

    #[tracing::instrument(name = "queue.send_batch", skip_all, fields(queue = %self.name))]
    async fn send_batch(&self, entries: Vec<BatchEntry>) -> Result<BatchSendResult> {
        check_batch(&entries)?;
        if entries.is_empty() {
            return Ok(BatchSendResult::default());
        }

        let request_entries = entries
            .into_iter()
            .map(|entry| {
                SendMessageBatchRequestEntry::builder()
                    .id(entry.id)
                    .message_body(entry.body)
                    .build()
                    .map_err(|e| BusError::Publish(format!("Failed to build batch entry: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let output = self
            .client
            .send_message_batch()
            .queue_url(&self.url)
            .set_entries(Some(request_entries))
            .send()
            .await
            .map_err(|e| BusError::Publish(format!("Failed to send batch to SQS: {}", e)))?;

        let failed: Vec<String> = output
            .failed()
            .iter()
            .map(|entry| {
                warn!(
                    id = %entry.id(),
                    code = %entry.code(),
                    message = ?entry.message(),
                    "SQS rejected batch entry"
                );
                entry.id().to_string()
            })
            .collect();

        debug!(
            sent = output.successful().len(),
            failed = failed.len(),
            "Sent batch to SQS"
        );
        Ok(BatchSendResult { failed })
    }

    async fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let mut slot = self.handler.write().await;
        if slot.is_some() {
            return Err(BusError::Subscribe(format!(
                "queue {} already has a consumer",
                self.name
            )));
        }
        *slot = Some(handler);
        Ok(())
    }

    async fn start_consuming(&self) -> Result<()> {
        {
            let mut consuming = self.consuming.write().await;
            if *consuming {
                return Ok(());
            }
            *consuming = true;
        }

        let handler = self.handler.read().await.clone().ok_or_else(|| {
            BusError::Subscribe(format!("queue {} has no subscribed handler", self.name))
        })?;
        let sqs = self.client.clone();
        let queue_url = self.url.clone();
        let name = self.name.clone();
        let wait_time_secs = self.config.wait_time_secs.clamp(0, 20);
        let visibility_timeout_secs = self.config.visibility_timeout_secs;
        let max_receives = self.config.max_receives;

        tokio::spawn(async move {
            info!(queue = %name, "Starting SQS consumer");

            loop {
                let output = match sqs
                    .receive_message()
                    .queue_url(&queue_url)
                    .max_number_of_messages(MAX_BATCH_SIZE as i32)
                    .wait_time_seconds(wait_time_secs)
                    .visibility_timeout(visibility_timeout_secs)
                    .message_system_attribute_names(
                        MessageSystemAttributeName::ApproximateReceiveCount,
                    )
                    .send()
                    .await
                {
                    Ok(output) => output,
                    Err(e) => {
                        error!(queue = %name, error = %e, "Failed to receive messages from SQS");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                let received: Vec<(Delivery, String)> =
                    output.messages().iter().filter_map(to_delivery).collect();
                if received.is_empty() {
                    continue;
                }

                let deliveries = received.iter().map(|(d, _)| d.clone()).collect();
                let response = handler.handle(deliveries).await;

                let mut to_delete = Vec::new();
                for (delivery, receipt) in &received {
                    let failed = response.failed.contains(&delivery.id);
                    if failed && (max_receives == 0 || delivery.receive_count < max_receives) {
                        debug!(
                            queue = %name,
                            id = %delivery.id,
                            receives = delivery.receive_count,
                            "Message will be retried after visibility timeout"
                        );
                        continue;
                    }
                    if failed {
                        error!(
                            queue = %name,
                            id = %delivery.id,
                            receives = delivery.receive_count,
                            "Dropping message after max receives"
                        );
                    }
                    match DeleteMessageBatchRequestEntry::builder()
                        .id(delivery.id.clone())
                        .receipt_handle(receipt.clone())
                        .build()
                    {
                        Ok(entry) => to_delete.push(entry),
                        Err(e) => error!(error = %e, "Failed to build delete entry"),
                    }
                }

                if to_delete.is_empty() {
                    continue;
                }
                if let Err(e) = sqs
                    .delete_message_batch()
                    .queue_url(&queue_url)
                    .set_entries(Some(to_delete))
                    .send()
                    .await
                {
                    error!(queue = %name, error = %e, "Failed to delete processed messages");
                }
            }
        });

        info!(queue = %self.name, "Started SQS consumer");
        Ok(())
    }
}
