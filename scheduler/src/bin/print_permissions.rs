// Lists the effective Azure permissions held on every configured resource.
// Useful to check a role assignment before the scheduler needs it.

use anyhow::{Context, Result};
use common::bootstrap::init_azure_client;
use common::condition::ConditionEvaluator;
use common::config::Settings;
use common::telemetry;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config_dir = std::env::var("PERONDA_CONFIG_DIR").unwrap_or_else(|_| "config".to_string());
    let settings = Settings::load_from_path(&config_dir).context("Failed to load configuration")?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.log_format,
        None,
    )?;

    let evaluator = ConditionEvaluator::new().context("Failed to build condition evaluator")?;
    let resources = settings
        .resources(&evaluator)
        .context("Invalid resource definitions")?;
    if resources.is_empty() {
        info!("No resources are provided");
        return Ok(());
    }

    let client = init_azure_client(&settings).await?;

    let mut failures = 0usize;
    for resource in &resources {
        match client.list_permissions(&resource.resource_id).await {
            Ok(permissions) => {
                println!(
                    "Permission list for resource {}:",
                    resource.resource_id.human_readable()
                );
                println!("{}", serde_json::to_string_pretty(&permissions)?);
            }
            Err(e) => {
                failures += 1;
                error!(
                    resource = %resource.resource_id.human_readable(),
                    error = %e,
                    "Failed to list permissions"
                );
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} resources could not be inspected", failures, resources.len());
    }
    Ok(())
}
