//! Mock queue implementation for testing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;

use super::{
    check_batch, BatchEntry, BatchSendResult, BusError, MessageHandler, Queue, Result, MAX_DELAY,
};

/// A message recorded by `MockQueue`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub body: String,
    pub delay: Duration,
}

/// Mock queue that records sends in memory.
pub struct MockQueue {
    name: String,
    sent: RwLock<Vec<SentMessage>>,
    batches: RwLock<Vec<usize>>,
    fail_on_send: RwLock<bool>,
    fail_on_batch: RwLock<bool>,
    reject_containing: RwLock<Option<String>>,
}

impl Default for MockQueue {
    fn default() -> Self {
        Self::new("mock")
    }
}

impl MockQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sent: RwLock::new(Vec::new()),
            batches: RwLock::new(Vec::new()),
            fail_on_send: RwLock::new(false),
            fail_on_batch: RwLock::new(false),
            reject_containing: RwLock::new(None),
        }
    }

    pub async fn set_fail_on_send(&self, fail: bool) {
        *self.fail_on_send.write().await = fail;
    }

    /// Fail whole `send_batch` requests.
    pub async fn set_fail_on_batch(&self, fail: bool) {
        *self.fail_on_batch.write().await = fail;
    }

    /// Report batch entries whose body contains `needle` as failed.
    pub async fn reject_containing(&self, needle: Option<&str>) {
        *self.reject_containing.write().await = needle.map(str::to_string);
    }

    pub async fn sent(&self) -> Vec<SentMessage> {
        self.sent.read().await.clone()
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.read().await.len()
    }

    pub async fn take_sent(&self) -> Vec<SentMessage> {
        std::mem::take(&mut *self.sent.write().await)
    }

    /// Sizes of the accepted batch requests, in order.
    pub async fn batch_sizes(&self) -> Vec<usize> {
        self.batches.read().await.clone()
    }

    /// Decode every recorded body as `T`.
    pub async fn decoded<T: DeserializeOwned>(&self) -> Vec<T> {
        self.sent
            .read()
            .await
            .iter()
            .filter_map(|m| serde_json::from_str(&m.body).ok())
            .collect()
    }
}

#[async_trait]
impl Queue for MockQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: String, delay: Duration) -> Result<()> {
        if *self.fail_on_send.read().await {
            return Err(BusError::Connection("Mock send failure".to_string()));
        }
        self.sent.write().await.push(SentMessage {
            body,
            delay: delay.min(MAX_DELAY),
        });
        Ok(())
    }

    async fn send_batch(&self, entries: Vec<BatchEntry>) -> Result<BatchSendResult> {
        check_batch(&entries)?;
        if *self.fail_on_batch.read().await {
            return Err(BusError::Connection("Mock batch failure".to_string()));
        }

        let reject = self.reject_containing.read().await.clone();
        let mut result = BatchSendResult::default();
        let mut accepted = 0;
        let mut sent = self.sent.write().await;
        for entry in entries {
            if reject.as_deref().is_some_and(|needle| entry.body.contains(needle)) {
                result.failed.push(entry.id);
                continue;
            }
            sent.push(SentMessage {
                body: entry.body,
                delay: Duration::ZERO,
            });
            accepted += 1;
        }
        drop(sent);
        self.batches.write().await.push(accepted);
        Ok(result)
    }

    async fn subscribe(&self, _handler: Arc<dyn MessageHandler>) -> Result<()> {
        Err(BusError::SubscribeNotSupported)
    }
}

#[cfg(test)]
mod tests {
    use futures::future::BoxFuture;

    use super::*;
    use crate::bus::{BatchResponse, Delivery};

    fn entries(bodies: &[&str]) -> Vec<BatchEntry> {
        bodies
            .iter()
            .enumerate()
            .map(|(i, body)| BatchEntry {
                id: i.to_string(),
                body: body.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_mock_queue_send() {
        let queue = MockQueue::new("self-requeue");
        queue
            .send("{}".to_string(), Duration::from_secs(45))
            .await
            .unwrap();

        let sent = queue.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].delay, Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_mock_queue_fail_on_send() {
        let queue = MockQueue::default();
        queue.set_fail_on_send(true).await;
        assert!(queue.send("{}".to_string(), Duration::ZERO).await.is_err());
        assert_eq!(queue.sent_count().await, 0);
    }

    #[tokio::test]
    async fn test_mock_queue_rejects_matching_entries() {
        let queue = MockQueue::default();
        queue.reject_containing(Some("u2")).await;

        let result = queue.send_batch(entries(&["u1", "u2", "u3"])).await.unwrap();
        assert_eq!(result.failed, vec!["1".to_string()]);
        assert_eq!(queue.sent_count().await, 2);
    }

    #[tokio::test]
    async fn test_mock_queue_subscribe_not_supported() {
        struct DummyHandler;
        impl MessageHandler for DummyHandler {
            fn handle(&self, _deliveries: Vec<Delivery>) -> BoxFuture<'static, BatchResponse> {
                Box::pin(async { BatchResponse::ok() })
            }
        }

        let queue = MockQueue::default();
        let result = queue.subscribe(Arc::new(DummyHandler)).await;
        assert!(matches!(result, Err(BusError::SubscribeNotSupported)));
    }
}
