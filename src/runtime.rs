//! Pipeline runtime.
//!
//! Wires storage, queues, the feed and the catalog into the three stages
//! and subscribes each stage's handler to its queue:
//!
//! ```text
//! self-requeue --> monitor --> scoring-trigger --> scorer --> score-batch --> distributor
//!      ^              |
//!      +--------------+
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::bus::{init_queues, send_json, BusError, Queues, RequeueMessage};
use crate::catalog::{Catalog, HttpCatalog};
use crate::config::{Config, Stage, WorkerConfig};
use crate::feed::{HttpFeed, NowPlayingFeed};
use crate::handlers::{DistributionHandler, MonitorHandler, ScoringHandler};
use crate::services::{PointDistributor, Scorer, TrackMonitor};
use crate::storage::{init_storage, Store};

/// The assembled pipeline.
pub struct Pipeline {
    store: Arc<dyn Store>,
    queues: Queues,
    monitor: Arc<TrackMonitor>,
    scorer: Arc<Scorer>,
    distributor: Arc<PointDistributor>,
}

impl Pipeline {
    /// Assemble the stages from already-built components.
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        queues: Queues,
        feed: Arc<dyn NowPlayingFeed>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        let distributor = Arc::new(PointDistributor::new(
            store.clone(),
            queues.score_batch.clone(),
            config.limits.effective_batch_size(),
        ));
        let scorer = Arc::new(Scorer::new(
            store.clone(),
            distributor.clone(),
            &config.scoring,
        ));
        let monitor = Arc::new(TrackMonitor::new(
            store.clone(),
            feed,
            catalog,
            &queues,
            &config.monitor,
        ));

        Self {
            store,
            queues,
            monitor,
            scorer,
            distributor,
        }
    }

    /// Build every component from configuration.
    pub async fn from_config(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let store = init_storage(&config.storage).await?;
        let queues = init_queues(&config.messaging).await?;
        let feed = Arc::new(HttpFeed::new(&config.monitor)?);
        let catalog = Arc::new(HttpCatalog::new(&config.catalog)?);
        Ok(Self::new(config, store, queues, feed, catalog))
    }

    pub fn store(&self) -> Arc<dyn Store> {
        self.store.clone()
    }

    pub fn queues(&self) -> &Queues {
        &self.queues
    }

    pub fn monitor(&self) -> Arc<TrackMonitor> {
        self.monitor.clone()
    }

    pub fn scorer(&self) -> Arc<Scorer> {
        self.scorer.clone()
    }

    pub fn distributor(&self) -> Arc<PointDistributor> {
        self.distributor.clone()
    }

    /// Subscribe and start the consumers for the selected stages.
    pub async fn start(&self, worker: &WorkerConfig) -> Result<(), BusError> {
        if worker.runs(Stage::Monitor) {
            let handler = Arc::new(MonitorHandler::new(self.monitor.clone()));
            self.queues.requeue.subscribe(handler).await?;
            self.queues.requeue.start_consuming().await?;
            info!(queue = %self.queues.requeue.name(), "Monitor consuming");
        }
        if worker.runs(Stage::Scorer) {
            let handler = Arc::new(ScoringHandler::new(self.scorer.clone()));
            self.queues.scoring.subscribe(handler).await?;
            self.queues.scoring.start_consuming().await?;
            info!(queue = %self.queues.scoring.name(), "Scorer consuming");
        }
        if worker.runs(Stage::Distributor) {
            let handler = Arc::new(DistributionHandler::new(self.distributor.clone()));
            self.queues.score_batch.subscribe(handler).await?;
            self.queues.score_batch.start_consuming().await?;
            info!(queue = %self.queues.score_batch.name(), "Distributor consuming");
        }
        Ok(())
    }

    /// Seed the monitor loop with an idle state.
    ///
    /// Every extra kick-off adds another concurrent poll loop, so this runs
    /// once per deployment.
    pub async fn kick_off(&self) -> Result<(), BusError> {
        send_json(
            self.queues.requeue.as_ref(),
            &RequeueMessage::idle(),
            Duration::ZERO,
        )
        .await?;
        info!("Monitor loop started");
        Ok(())
    }

    /// Start the selected stages and block until Ctrl+C.
    pub async fn run(self, worker: &WorkerConfig) -> Result<(), Box<dyn std::error::Error>> {
        self.start(worker).await?;
        if worker.kick_off {
            self.kick_off().await?;
        }

        info!("Pipeline running, press Ctrl+C to exit");
        tokio::signal::ctrl_c().await?;
        info!("Shutting down pipeline");
        Ok(())
    }
}
