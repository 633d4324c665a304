// Pass runner: drives the schedule engine on a fixed interval

use crate::condition::ConditionEvaluator;
use crate::config::Settings;
use crate::errors::ValidationError;
use crate::models::Resource;
use crate::scheduler::engine::{PassSummary, ScheduleEngine};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Scheduler trait for the timer lifecycle
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Start the timer loop; returns after `stop`
    async fn start(&self) -> Result<(), BoxError>;

    /// Stop the timer loop. A pass in flight finishes first.
    async fn stop(&self) -> Result<(), BoxError>;

    /// Load the current definitions and run one pass
    async fn run_pass(&self) -> Result<PassSummary, BoxError>;
}

/// ResourceProvider supplies the resource definitions for each pass
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn load(&self) -> Result<Vec<Resource>, ValidationError>;
}

/// Fixed definitions, validated once
pub struct StaticResources {
    resources: Vec<Resource>,
}

impl StaticResources {
    pub fn new(resources: Vec<Resource>) -> Self {
        Self { resources }
    }
}

#[async_trait]
impl ResourceProvider for StaticResources {
    async fn load(&self) -> Result<Vec<Resource>, ValidationError> {
        Ok(self.resources.clone())
    }
}

/// Re-reads the configuration directory on every pass so edits take effect
/// without a restart. A definition broken by an edit is skipped, the rest
/// keep running.
pub struct ConfigResources {
    config_dir: PathBuf,
    evaluator: Arc<ConditionEvaluator>,
}

impl ConfigResources {
    pub fn new(config_dir: impl Into<PathBuf>, evaluator: Arc<ConditionEvaluator>) -> Self {
        Self {
            config_dir: config_dir.into(),
            evaluator,
        }
    }
}

#[async_trait]
impl ResourceProvider for ConfigResources {
    #[instrument(skip(self), fields(config_dir = %self.config_dir.display()))]
    async fn load(&self) -> Result<Vec<Resource>, ValidationError> {
        Settings::load_from_path(&self.config_dir)?.valid_resources(&self.evaluator)
    }
}

/// PassRunner runs a pass per tick until shut down
pub struct PassRunner {
    engine: Arc<ScheduleEngine>,
    provider: Arc<dyn ResourceProvider>,
    interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl PassRunner {
    pub fn new(
        engine: Arc<ScheduleEngine>,
        provider: Arc<dyn ResourceProvider>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = broadcast::channel(1);

        Self {
            engine,
            provider,
            interval,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }
}

#[async_trait]
impl Scheduler for PassRunner {
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), BoxError> {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "Starting pass runner"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    debug!("Timer fired");
                    if let Err(e) = self.run_pass().await {
                        error!(error = %e, "Pass could not start");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping pass runner");
                    break;
                }
            }
        }

        info!("Pass runner stopped");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn stop(&self) -> Result<(), BoxError> {
        info!("Stopping pass runner");
        let _ = self.shutdown_tx.send(());
        Ok(())
    }

    async fn run_pass(&self) -> Result<PassSummary, BoxError> {
        let resources = self.provider.load().await?;
        if resources.is_empty() {
            info!("No resources are provided, skipping");
        }
        Ok(self.engine.run(&resources, Utc::now()).await)
    }
}
