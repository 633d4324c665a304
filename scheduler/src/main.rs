// Scheduler binary entry point

use anyhow::{anyhow, Context, Result};
use common::bootstrap::{build_engine, init_azure_client, init_calendar, init_stores};
use common::condition::ConditionEvaluator;
use common::config::Settings;
use common::scheduler::{ConfigResources, PassRunner, Scheduler};
use common::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

const CONFIG_DIR_ENV: &str = "PERONDA_CONFIG_DIR";
const DEFAULT_CONFIG_DIR: &str = "config";

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir =
        std::env::var(CONFIG_DIR_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_DIR.to_string());

    let settings = Settings::load_from_path(&config_dir).context("Failed to load configuration")?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.log_format,
        settings.observability.tracing_endpoint.as_deref(),
    )?;

    info!(config_dir = %config_dir, "Starting Peronda scheduler");

    settings.validate().context("Invalid configuration")?;

    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    let evaluator = Arc::new(ConditionEvaluator::new().context("Failed to build condition evaluator")?);

    // Definitions are re-read on every pass; a broken file at startup is fatal
    let resources = settings
        .resources(&evaluator)
        .context("Invalid resource definitions")?;
    info!(resources = resources.len(), "Resource definitions validated");

    let stores = init_stores(&settings).await?;
    let calendar = init_calendar(&settings)?;
    let azure = init_azure_client(&settings).await?;
    let engine = Arc::new(build_engine(
        &settings,
        calendar,
        evaluator.clone(),
        &stores,
        azure,
    )?);

    let runner = Arc::new(PassRunner::new(
        engine,
        Arc::new(ConfigResources::new(&config_dir, evaluator)),
        Duration::from_millis(settings.scheduler.loop_interval_ms),
    ));

    if settings.scheduler.run_once {
        let summary = runner.run_pass().await.map_err(|e| anyhow!(e))?;
        info!(
            dispatched = summary.dispatched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Single pass finished"
        );
    } else {
        let runner_for_shutdown = runner.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            info!("Received shutdown signal");
            if let Err(e) = runner_for_shutdown.stop().await {
                error!(error = %e, "Failed to stop pass runner");
            }
        });

        runner.start().await.map_err(|e| anyhow!(e))?;
    }

    telemetry::shutdown_tracer();
    info!("Scheduler shutdown complete");
    Ok(())
}
