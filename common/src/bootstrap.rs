// Bootstrap utilities for binary initialization
// Shared by the scheduler and print-permissions binaries

use crate::calendar::HolidayCalendar;
use crate::condition::ConditionEvaluator;
use crate::config::Settings;
use crate::executor::azure::AzureResourceClient;
use crate::executor::{ActionDispatcher, ResourceOperations};
use crate::scheduler::ScheduleEngine;
use crate::storage::{ActionHistoryStore, AutoscaleBaselineStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Persisted state used by every pass
pub struct Stores {
    pub history: Arc<ActionHistoryStore>,
    pub baselines: Arc<AutoscaleBaselineStore>,
}

/// Open the history and baseline stores under `storage.var_dir`
///
/// # Errors
/// Returns error if the state directory cannot be created
#[tracing::instrument(skip(settings), fields(var_dir = %settings.storage.var_dir.display()))]
pub async fn init_stores(settings: &Settings) -> Result<Stores> {
    info!("Opening state stores");

    let history = ActionHistoryStore::open(&settings.storage.var_dir)
        .await
        .context("Failed to open action history store")?;
    let baselines = AutoscaleBaselineStore::open(&settings.storage.var_dir)
        .await
        .context("Failed to open autoscale baseline store")?;

    info!(history_entries = history.len().await, "State stores opened");
    Ok(Stores {
        history: Arc::new(history),
        baselines: Arc::new(baselines),
    })
}

/// Load the holiday calendar from configured off-days and holiday tables
///
/// # Errors
/// Returns error if an off-day name is not a weekday
#[tracing::instrument(skip(settings))]
pub fn init_calendar(settings: &Settings) -> Result<HolidayCalendar> {
    HolidayCalendar::load(&settings.calendar.off_days, &settings.calendar.holidays_dir)
        .context("Failed to load holiday calendar")
}

/// Build the Azure client and fetch its first token
///
/// # Errors
/// Returns error if the HTTP client cannot be built or no token can be acquired
#[tracing::instrument(skip(settings))]
pub async fn init_azure_client(settings: &Settings) -> Result<Arc<AzureResourceClient>> {
    info!(
        endpoint = %settings.azure.management_endpoint,
        "Initializing Azure client"
    );

    let client =
        AzureResourceClient::from_config(&settings.azure).context("Failed to build Azure client")?;
    client
        .initialize()
        .await
        .context("Failed to acquire Azure access token")?;

    Ok(Arc::new(client))
}

/// Wire the engine from its parts
///
/// # Errors
/// Returns error if the configured timezone is invalid
pub fn build_engine(
    settings: &Settings,
    calendar: HolidayCalendar,
    evaluator: Arc<ConditionEvaluator>,
    stores: &Stores,
    operations: Arc<dyn ResourceOperations>,
) -> Result<ScheduleEngine> {
    let timezone = settings.timezone().context("Invalid scheduler timezone")?;
    let dispatcher = Arc::new(ActionDispatcher::new(operations, stores.baselines.clone()));

    Ok(ScheduleEngine::new(
        Arc::new(calendar),
        evaluator,
        stores.history.clone(),
        dispatcher,
        timezone,
    )
    .with_action_timeout(
        settings
            .scheduler
            .action_timeout_seconds
            .map(Duration::from_secs),
    ))
}
