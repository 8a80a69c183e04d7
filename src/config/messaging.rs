//! Messaging configuration types.

use serde::Deserialize;

/// Messaging type discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process channel queues (no external broker).
    #[default]
    Channel,
    /// AWS SQS queues.
    Sqs,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Messaging type discriminator.
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Queue names shared by every backend.
    pub queues: QueueNames,
    /// Channel-specific configuration.
    pub channel: ChannelConfig,
    /// SQS-specific configuration.
    pub sqs: SqsConfig,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            messaging_type: MessagingType::Channel,
            queues: QueueNames::default(),
            channel: ChannelConfig::default(),
            sqs: SqsConfig::default(),
        }
    }
}

/// Names of the three pipeline queues.
///
/// For SQS these are queue names resolved to URLs at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueNames {
    pub requeue: String,
    pub scoring: String,
    pub score_batch: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            requeue: "self-requeue".to_string(),
            scoring: "scoring-trigger".to_string(),
            score_batch: "score-batch".to_string(),
        }
    }
}

/// In-process channel queue configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Delay before a failed message becomes visible again.
    pub redelivery_delay_ms: u64,
    /// Deliveries after which a failing message is dropped.
    pub max_receives: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            redelivery_delay_ms: 1_000,
            max_receives: 5,
        }
    }
}

/// AWS SQS configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqsConfig {
    /// Endpoint override (LocalStack).
    pub endpoint_url: Option<String>,
    /// Region override. Falls back to the default provider chain.
    pub region: Option<String>,
    /// Visibility timeout applied to received messages, in seconds.
    pub visibility_timeout_secs: i32,
    /// Long-poll wait time, in seconds (max 20).
    pub wait_time_secs: i32,
    /// Receives after which a failing message is deleted instead of retried.
    ///
    /// `0` leaves dead-lettering to the queue's redrive policy.
    pub max_receives: u32,
}

impl Default for SqsConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            region: None,
            visibility_timeout_secs: 60,
            wait_time_secs: 20,
            max_receives: 0,
        }
    }
}
