// Configuration management with layered configuration (file, env)

use crate::calendar::parse_off_days;
use crate::condition::ConditionEvaluator;
use crate::errors::ValidationError;
use crate::models::{Resource, ResourceDefinition};
use crate::schedule::parse_timezone;
use chrono_tz::Tz;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Shortest allowed pause between two passes (30 minutes)
pub const MIN_LOOP_INTERVAL_MS: u64 = 1_800_000;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub azure: AzureConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// Optional JSON document with more resource definitions, either a list
    /// or an object with a `resources` list
    #[serde(default)]
    pub resources_file: Option<PathBuf>,
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub loop_interval_ms: u64,
    /// IANA name used to anchor "HH:MM" action times
    pub timezone: String,
    /// Run a single pass and exit
    pub run_once: bool,
    pub action_timeout_seconds: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            loop_interval_ms: MIN_LOOP_INTERVAL_MS,
            timezone: "UTC".to_string(),
            run_once: false,
            action_timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub var_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            var_dir: PathBuf::from("var"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// Weekday names treated as non-working days
    pub off_days: Vec<String>,
    /// Directory of `{year}.json` public holiday tables
    pub holidays_dir: PathBuf,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            off_days: Vec::new(),
            holidays_dir: PathBuf::from("holidays"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureConfig {
    pub management_endpoint: String,
    pub authority_host: String,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    pub request_timeout_seconds: u64,
}

impl Default for AzureConfig {
    fn default() -> Self {
        Self {
            management_endpoint: "https://management.azure.com".to_string(),
            authority_host: "https://login.microsoftonline.com".to_string(),
            tenant_id: None,
            client_id: None,
            client_secret: None,
            request_timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_port: Option<u16>,
    pub tracing_endpoint: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
            metrics_port: None,
            tracing_endpoint: None,
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ValidationError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ValidationError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("PERONDA")
                    .separator("__")
                    .try_parsing(true),
            )
            // Variables understood by existing deployments
            .set_override_option("storage.var_dir", std::env::var("VAR_DIR").ok())?
            .set_override_option(
                "observability.log_level",
                std::env::var("PERONDA_LOG_LEVEL").ok(),
            )?;

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.scheduler.loop_interval_ms < MIN_LOOP_INTERVAL_MS {
            return Err(ValidationError::IntervalBelowMinimum {
                configured: self.scheduler.loop_interval_ms,
                minimum: MIN_LOOP_INTERVAL_MS,
            });
        }

        self.timezone()?;
        parse_off_days(&self.calendar.off_days)?;

        if self.scheduler.action_timeout_seconds == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "scheduler.action_timeout_seconds".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.azure.request_timeout_seconds == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "azure.request_timeout_seconds".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.azure.management_endpoint.is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "azure.management_endpoint".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn timezone(&self) -> Result<Tz, ValidationError> {
        parse_timezone(&self.scheduler.timezone)
            .map_err(|_| ValidationError::InvalidTimezone(self.scheduler.timezone.clone()))
    }

    /// Normalize and validate every resource definition.
    ///
    /// Rejects malformed ids, action parameters that do not decode for their
    /// type, and condition expressions that do not parse. Time strings are
    /// checked per pass instead.
    pub fn resources(&self, evaluator: &ConditionEvaluator) -> Result<Vec<Resource>, ValidationError> {
        let resources = self
            .definitions()?
            .into_iter()
            .map(|definition| validate_definition(definition, evaluator))
            .collect::<Result<Vec<_>, _>>()?;

        info!(count = resources.len(), "Resource definitions loaded");
        Ok(resources)
    }

    /// Like `resources`, but an invalid definition is logged and dropped
    /// instead of failing the whole set. Used when reloading while running.
    ///
    /// # Errors
    /// Returns error only if the `resources_file` cannot be read
    pub fn valid_resources(
        &self,
        evaluator: &ConditionEvaluator,
    ) -> Result<Vec<Resource>, ValidationError> {
        let definitions = self.definitions()?;
        let total = definitions.len();

        let resources: Vec<Resource> = definitions
            .into_iter()
            .filter_map(|definition| {
                let raw_id = definition.resource_id.clone();
                match validate_definition(definition, evaluator) {
                    Ok(resource) => Some(resource),
                    Err(e) => {
                        error!(resource_id = %raw_id, error = %e, "Skipping invalid resource definition");
                        None
                    }
                }
            })
            .collect();

        if resources.len() < total {
            warn!(
                loaded = resources.len(),
                skipped = total - resources.len(),
                "Some resource definitions are invalid"
            );
        }
        Ok(resources)
    }

    fn definitions(&self) -> Result<Vec<ResourceDefinition>, ValidationError> {
        let mut definitions = self.resources.clone();
        if let Some(path) = &self.resources_file {
            definitions.extend(read_resources_file(path)?);
        }
        Ok(definitions)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ResourcesDocument {
    List(Vec<ResourceDefinition>),
    Wrapped { resources: Vec<ResourceDefinition> },
}

fn read_resources_file(path: &Path) -> Result<Vec<ResourceDefinition>, ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidFieldValue {
        field: "resources_file".to_string(),
        reason: format!("{}: {}", path.display(), reason),
    };

    let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let document: ResourcesDocument =
        serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

    Ok(match document {
        ResourcesDocument::List(resources) => resources,
        ResourcesDocument::Wrapped { resources } => resources,
    })
}

fn validate_definition(
    definition: ResourceDefinition,
    evaluator: &ConditionEvaluator,
) -> Result<Resource, ValidationError> {
    let resource = Resource::try_from(definition)?;
    let name = resource.resource_id.human_readable();

    for action in resource.actions() {
        action
            .validate_params()
            .map_err(|e| ValidationError::InvalidActionParams {
                resource: name.clone(),
                action_type: action.action_type.to_string(),
                reason: e.to_string(),
            })?;

        for condition in &action.conditions {
            evaluator
                .compile(&condition.custom_expr)
                .map_err(|e| ValidationError::InvalidCondition {
                    resource: name.clone(),
                    expression: condition.custom_expr.clone(),
                    reason: e.to_string(),
                })?;
        }
    }

    Ok(resource)
}
