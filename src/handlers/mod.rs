//! Queue handlers for the pipeline stages.
//!
//! Each handler adapts one stage to `MessageHandler`: decode the delivered
//! bodies, run the stage, and report the deliveries that should come back.

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tracing::{debug, error, warn};

use crate::bus::{BatchResponse, Delivery, MessageHandler, RequeueMessage, ScoringTrigger};
use crate::services::{PipelineError, PointDistributor, Scorer, TrackMonitor};

/// Consumes `self-requeue`.
pub struct MonitorHandler {
    monitor: Arc<TrackMonitor>,
}

impl MonitorHandler {
    pub fn new(monitor: Arc<TrackMonitor>) -> Self {
        Self { monitor }
    }
}

impl MessageHandler for MonitorHandler {
    fn handle(&self, deliveries: Vec<Delivery>) -> BoxFuture<'static, BatchResponse> {
        let monitor = self.monitor.clone();

        Box::pin(async move {
            let mut response = BatchResponse::ok();
            for delivery in deliveries {
                // Unreadable state restarts the monitor idle.
                let prev = delivery.decode::<RequeueMessage>().unwrap_or_else(|e| {
                    warn!(error = %e, "Unreadable monitor state, restarting idle");
                    RequeueMessage::idle()
                });

                if let Err(e) = monitor.handle(prev, Utc::now()).await {
                    error!(id = %delivery.id, error = %e, "Monitor could not requeue itself");
                    response.failed.push(delivery.id);
                }
            }
            response
        })
    }
}

/// Consumes `scoring-trigger`.
pub struct ScoringHandler {
    scorer: Arc<Scorer>,
}

impl ScoringHandler {
    pub fn new(scorer: Arc<Scorer>) -> Self {
        Self { scorer }
    }
}

impl MessageHandler for ScoringHandler {
    fn handle(&self, deliveries: Vec<Delivery>) -> BoxFuture<'static, BatchResponse> {
        let scorer = self.scorer.clone();

        Box::pin(async move {
            let mut response = BatchResponse::ok();
            for delivery in deliveries {
                let trigger = match delivery.decode::<ScoringTrigger>() {
                    Ok(trigger) => trigger,
                    Err(e) => {
                        error!(id = %delivery.id, error = %e, "Dropping malformed scoring trigger");
                        continue;
                    }
                };

                match scorer.score(&trigger.song_id).await {
                    Ok(report) => {
                        debug!(song_id = %report.song_id, voters = report.voters, "Scoring done");
                    }
                    Err(PipelineError::Transient(e)) => {
                        warn!(song_id = %trigger.song_id, error = %e, "Scoring failed, will retry");
                        response.failed.push(delivery.id);
                    }
                    Err(e @ PipelineError::NotFound(_)) | Err(e @ PipelineError::Conflict(_)) => {
                        warn!(song_id = %trigger.song_id, error = %e, "Nothing to score");
                    }
                    Err(e @ PipelineError::Precondition(_)) => {
                        error!(song_id = %trigger.song_id, error = %e, "Dropping scoring trigger");
                    }
                }
            }
            response
        })
    }
}

/// Consumes `score-batch`.
pub struct DistributionHandler {
    distributor: Arc<PointDistributor>,
}

impl DistributionHandler {
    pub fn new(distributor: Arc<PointDistributor>) -> Self {
        Self { distributor }
    }
}

impl MessageHandler for DistributionHandler {
    fn handle(&self, deliveries: Vec<Delivery>) -> BoxFuture<'static, BatchResponse> {
        let distributor = self.distributor.clone();
        Box::pin(async move { distributor.apply(deliveries).await })
    }
}
