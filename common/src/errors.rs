// Error handling framework

use thiserror::Error;

/// Time-of-day and timezone errors raised while ordering a group of actions
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid time value '{time}' in resource {resource}")]
    InvalidTime { time: String, resource: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Local time {time} does not exist on {date} in timezone {timezone}")]
    NonexistentLocalTime {
        time: String,
        date: String,
        timezone: String,
    },
}

/// Per-action execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Action timed out after {0} seconds")]
    Timeout(u64),

    #[error("Invalid parameters for action '{action_type}': {reason}")]
    InvalidActionParams { action_type: String, reason: String },

    #[error("Azure request failed: {0}")]
    AzureRequestFailed(String),

    #[error("Azure API returned {status} for {url}: {body}")]
    AzureApiError {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Unexpected response payload: {0}")]
    InvalidResponse(String),

    #[error("Condition evaluation failed: {0}")]
    Condition(#[from] ConditionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Configuration validation errors; fatal at startup
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("`loop_interval_ms` cannot be less than {minimum} ms (30 minutes), got {configured}")]
    IntervalBelowMinimum { configured: u64, minimum: u64 },

    #[error("Invalid resource id '{resource_id}': {reason}")]
    InvalidResourceId { resource_id: String, reason: String },

    #[error("Unknown off-day name: {0}")]
    InvalidOffDay(String),

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Resource {0} declares no actions")]
    NoActions(String),

    #[error("Invalid condition '{expression}' in resource {resource}: {reason}")]
    InvalidCondition {
        resource: String,
        expression: String,
        reason: String,
    },

    #[error("Invalid parameters for action '{action_type}' in resource {resource}: {reason}")]
    InvalidActionParams {
        resource: String,
        action_type: String,
        reason: String,
    },

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Condition expression errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("Unexpected character at offset {offset} in '{expression}'")]
    UnexpectedCharacter { expression: String, offset: usize },

    #[error("Unexpected token '{token}' in '{expression}'")]
    UnexpectedToken { expression: String, token: String },

    #[error("Unexpected end of expression '{0}'")]
    UnexpectedEnd(String),

    #[error("Empty expression")]
    Empty,

    #[error("Expression nests deeper than {limit} levels: '{expression}'")]
    TooDeep { expression: String, limit: usize },

    #[error("Regex compilation error: {0}")]
    RegexError(String),
}

/// Persistence errors for the file-backed stores
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Filesystem error: {0}")]
    FileSystemError(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::FileSystemError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidJson(err.to_string())
    }
}

impl From<reqwest::Error> for ExecutionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExecutionError::AzureRequestFailed(format!("request timed out: {}", err))
        } else {
            ExecutionError::AzureRequestFailed(err.to_string())
        }
    }
}
