//! In-process channel queue for standalone mode.
//!
//! Uses an unbounded tokio mpsc channel per queue. Delayed sends and
//! redeliveries are timer tasks that push into the channel when due. Failed
//! deliveries come back after `redelivery_delay_ms` until they have been
//! received `max_receives` times, after which they are dropped with an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::{
    check_batch, BatchEntry, BatchSendResult, BusError, Delivery, MessageHandler, Queue, Result,
    MAX_BATCH_SIZE, MAX_DELAY,
};
use crate::config::ChannelConfig;

#[derive(Debug, Clone)]
struct Envelope {
    id: String,
    body: String,
    receive_count: u32,
}

/// In-memory queue backed by an mpsc channel.
pub struct ChannelQueue {
    name: String,
    config: ChannelConfig,
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    handler: Arc<RwLock<Option<Arc<dyn MessageHandler>>>>,
    next_id: AtomicU64,
}

impl ChannelQueue {
    /// Create a new channel queue.
    pub fn new(name: impl Into<String>, config: ChannelConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let name = name.into();

        info!(queue = %name, "Channel queue initialized");

        Self {
            name,
            config,
            sender,
            receiver: Mutex::new(Some(receiver)),
            handler: Arc::new(RwLock::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    fn envelope(&self, body: String) -> Envelope {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        Envelope {
            id: format!("{}-{}", self.name, n),
            body,
            receive_count: 0,
        }
    }

    fn enqueue(&self, envelope: Envelope, delay: Duration) -> Result<()> {
        schedule(self.sender.clone(), envelope, delay.min(MAX_DELAY))
            .map_err(|e| BusError::Publish(format!("queue {} closed: {}", self.name, e)))
    }
}

/// Push now, or from a timer task once `delay` has elapsed.
fn schedule(
    sender: mpsc::UnboundedSender<Envelope>,
    envelope: Envelope,
    delay: Duration,
) -> std::result::Result<(), String> {
    if delay.is_zero() {
        return sender.send(envelope).map_err(|e| e.to_string());
    }
    if sender.is_closed() {
        return Err("receiver dropped".to_string());
    }
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if sender.send(envelope).is_err() {
            debug!("Channel closed before delayed message became visible");
        }
    });
    Ok(())
}

/// Receive the next batch: wait for one message, then take whatever is ready.
async fn next_batch(receiver: &mut mpsc::UnboundedReceiver<Envelope>) -> Option<Vec<Envelope>> {
    let first = receiver.recv().await?;
    let mut batch = vec![first];
    while batch.len() < MAX_BATCH_SIZE {
        match receiver.try_recv() {
            Ok(envelope) => batch.push(envelope),
            Err(_) => break,
        }
    }
    Some(batch)
}

#[async_trait]
impl Queue for ChannelQueue {
    fn name(&self) -> &str {
        &self.name
    }

    #[tracing::instrument(name = "queue.send", skip_all, fields(queue = %self.name))]
    async fn send(&self, body: String, delay: Duration) -> Result<()> {
        let envelope = self.envelope(body);
        debug!(id = %envelope.id, delay = ?delay, "Sending to channel");
        self.enqueue(envelope, delay)
    }

    #[tracing::instrument(name = "queue.send_batch", skip_all, fields(queue = %self.name))]
    async fn send_batch(&self, entries: Vec<BatchEntry>) -> Result<BatchSendResult> {
        check_batch(&entries)?;
        let mut result = BatchSendResult::default();
        for entry in entries {
            let envelope = self.envelope(entry.body);
            if self.enqueue(envelope, Duration::ZERO).is_err() {
                result.failed.push(entry.id);
            }
        }
        Ok(result)
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
        info!(queue = %self.name, "Handler subscribed to channel queue");
        Ok(())
    }

    async fn start_consuming(&self) -> Result<()> {
        let Some(mut receiver) = self.receiver.lock().await.take() else {
            return Ok(());
        };
        let handler = self.handler.read().await.clone().ok_or_else(|| {
            BusError::Subscribe(format!("queue {} has no subscribed handler", self.name))
        })?;

        let sender = self.sender.clone();
        let name = self.name.clone();
        let redelivery_delay = Duration::from_millis(self.config.redelivery_delay_ms);
        let max_receives = self.config.max_receives.max(1);

        tokio::spawn(async move {
            while let Some(batch) = next_batch(&mut receiver).await {
                let batch: Vec<Envelope> = batch
                    .into_iter()
                    .map(|mut envelope| {
                        envelope.receive_count += 1;
                        envelope
                    })
                    .collect();
                let deliveries = batch
                    .iter()
                    .map(|e| Delivery {
                        id: e.id.clone(),
                        body: e.body.clone(),
                        receive_count: e.receive_count,
                    })
                    .collect();

                debug!(queue = %name, count = batch.len(), "Delivering batch");
                let response = handler.handle(deliveries).await;

                for envelope in batch {
                    if !response.failed.contains(&envelope.id) {
                        continue;
                    }
                    if envelope.receive_count >= max_receives {
                        error!(
                            queue = %name,
                            id = %envelope.id,
                            receives = envelope.receive_count,
                            "Dropping message after max receives"
                        );
                        continue;
                    }
                    warn!(
                        queue = %name,
                        id = %envelope.id,
                        receives = envelope.receive_count,
                        "Message will be redelivered"
                    );
                    if let Err(e) = schedule(sender.clone(), envelope, redelivery_delay) {
                        error!(queue = %name, error = %e, "Failed to schedule redelivery");
                    }
                }
            }
            info!(queue = %name, "Channel closed, stopping consumer");
        });

        info!(queue = %self.name, "Channel consumer started");
        Ok(())
    }
}
