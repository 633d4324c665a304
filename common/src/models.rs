use crate::errors::{ExecutionError, ValidationError};
use crate::resource_id::ResourceId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

// ============================================================================
// Action Models
// ============================================================================

/// ActionType is the closed set of operations an action can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    VmResize,
    VmStart,
    VmDeallocate,
    AutoscalingSettingSetZero,
    AutoscalingSettingRestore,
    MysqlFlexibleStart,
    MysqlFlexibleStop,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::VmResize => "vm_resize",
            ActionType::VmStart => "vm_start",
            ActionType::VmDeallocate => "vm_deallocate",
            ActionType::AutoscalingSettingSetZero => "autoscaling_setting_set_zero",
            ActionType::AutoscalingSettingRestore => "autoscaling_setting_restore",
            ActionType::MysqlFlexibleStart => "mysql_flexible_start",
            ActionType::MysqlFlexibleStop => "mysql_flexible_stop",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition gates an action on a boolean expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(alias = "customExpr")]
    pub custom_expr: String,
}

impl Condition {
    pub fn new(expr: impl Into<String>) -> Self {
        Self {
            custom_expr: expr.into(),
        }
    }
}

/// Action is a single scheduled operation on a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    /// Wall-clock "HH:MM" in the scheduler timezone
    pub time: String,
    #[serde(default, alias = "actionParams")]
    pub action_params: Map<String, Value>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default, alias = "preventNext", skip_serializing_if = "Option::is_none")]
    pub prevent_next: Option<bool>,
    #[serde(
        default,
        alias = "runActionOnlyOnce",
        skip_serializing_if = "Option::is_none"
    )]
    pub run_action_only_once: Option<bool>,
}

impl Action {
    pub fn new(action_type: ActionType, time: impl Into<String>) -> Self {
        Self {
            action_type,
            time: time.into(),
            action_params: Map::new(),
            conditions: Vec::new(),
            prevent_next: None,
            run_action_only_once: None,
        }
    }

    /// Replace the parameters; non-object values are ignored
    pub fn with_params(mut self, params: Value) -> Self {
        if let Value::Object(map) = params {
            self.action_params = map;
        }
        self
    }

    pub fn with_condition(mut self, expr: impl Into<String>) -> Self {
        self.conditions.push(Condition::new(expr));
        self
    }

    pub fn with_prevent_next(mut self, value: bool) -> Self {
        self.prevent_next = Some(value);
        self
    }

    pub fn with_run_action_only_once(mut self, value: bool) -> Self {
        self.run_action_only_once = Some(value);
        self
    }

    /// Whether handling this action ends its group for the pass. Defaults to true.
    pub fn prevents_next(&self) -> bool {
        self.prevent_next.unwrap_or(true)
    }

    /// Whether a recorded completion suppresses the action. Defaults to true.
    pub fn runs_only_once(&self) -> bool {
        self.run_action_only_once.unwrap_or(true)
    }

    /// Decode the operation-specific parameters
    pub fn params<T: DeserializeOwned>(&self) -> Result<T, ExecutionError> {
        serde_json::from_value(Value::Object(self.action_params.clone())).map_err(|e| {
            ExecutionError::InvalidActionParams {
                action_type: self.action_type.to_string(),
                reason: e.to_string(),
            }
        })
    }

    /// Check that the parameters decode for this action's type
    pub fn validate_params(&self) -> Result<(), ExecutionError> {
        match self.action_type {
            ActionType::VmResize => self.params::<VmResizeParams>().map(|_| ()),
            ActionType::AutoscalingSettingSetZero | ActionType::AutoscalingSettingRestore => {
                self.params::<AutoscaleSettingParams>().map(|_| ())
            }
            ActionType::VmStart
            | ActionType::VmDeallocate
            | ActionType::MysqlFlexibleStart
            | ActionType::MysqlFlexibleStop => Ok(()),
        }
    }
}

/// Actions of a group are mutually exclusive within one pass
pub type ActionGroup = Vec<Action>;

/// Parameters of `vm_resize`
#[derive(Debug, Clone, Deserialize)]
pub struct VmResizeParams {
    #[serde(alias = "sizeTarget")]
    pub size_target: String,
}

/// Parameters of the autoscale actions
#[derive(Debug, Clone, Deserialize)]
pub struct AutoscaleSettingParams {
    #[serde(default, alias = "autoscaleSettingSubscriptionId")]
    pub autoscale_setting_subscription_id: Option<String>,
    #[serde(default, alias = "autoscaleSettingResourceGroup")]
    pub autoscale_setting_resource_group: Option<String>,
    #[serde(alias = "autoscaleSettingName")]
    pub autoscale_setting_name: String,
}

impl AutoscaleSettingParams {
    /// Fill in subscription and resource group from the target resource when omitted
    pub fn resolve(self, resource: &ResourceId) -> AutoscaleSettingRef {
        AutoscaleSettingRef {
            subscription_id: self
                .autoscale_setting_subscription_id
                .unwrap_or_else(|| resource.subscription_id().to_string()),
            resource_group: self
                .autoscale_setting_resource_group
                .unwrap_or_else(|| resource.resource_group().to_string()),
            name: self.autoscale_setting_name,
        }
    }
}

/// Location of an autoscale setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoscaleSettingRef {
    pub subscription_id: String,
    pub resource_group: String,
    pub name: String,
}

/// Capacity of an autoscale profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscaleCapacity {
    pub min: u32,
    pub max: u32,
    pub default: u32,
}

impl AutoscaleCapacity {
    pub const ZERO: AutoscaleCapacity = AutoscaleCapacity {
        min: 0,
        max: 0,
        default: 0,
    };
}

// ============================================================================
// Resource Models
// ============================================================================

/// ActionList accepts either a flat list (one implicit group) or explicit groups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionList {
    Grouped(Vec<Vec<Action>>),
    Flat(Vec<Action>),
}

/// ResourceDefinition is the configuration shape of a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDefinition {
    #[serde(alias = "resourceId")]
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<ActionList>,
    #[serde(default, alias = "actionGroups", skip_serializing_if = "Option::is_none")]
    pub action_groups: Option<Vec<Vec<Action>>>,
}

/// Resource is a validated definition with its groups normalized
#[derive(Debug, Clone)]
pub struct Resource {
    pub resource_id: ResourceId,
    pub action_groups: Vec<ActionGroup>,
}

impl Resource {
    pub fn new(resource_id: ResourceId, action_groups: Vec<ActionGroup>) -> Self {
        Self {
            resource_id,
            action_groups,
        }
    }

    /// A resource whose actions form a single group
    pub fn single_group(resource_id: ResourceId, actions: Vec<Action>) -> Self {
        Self::new(resource_id, vec![actions])
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.action_groups.iter().flatten()
    }
}

impl TryFrom<ResourceDefinition> for Resource {
    type Error = ValidationError;

    fn try_from(definition: ResourceDefinition) -> Result<Self, Self::Error> {
        let resource_id = ResourceId::parse(&definition.resource_id)?;

        let action_groups = match (definition.actions, definition.action_groups) {
            (Some(ActionList::Grouped(groups)), _) if !groups.is_empty() => groups,
            (_, Some(groups)) => groups,
            (Some(ActionList::Flat(actions)), None) => vec![actions],
            (Some(ActionList::Grouped(_)), None) => Vec::new(),
            (None, None) => return Err(ValidationError::NoActions(definition.resource_id)),
        };

        Ok(Self {
            resource_id,
            action_groups,
        })
    }
}

// ============================================================================
// Persisted Records
// ============================================================================

/// ActionHistoryRecord is the last completion of one action fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionHistoryRecord {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_completed_at: DateTime<Utc>,
    pub action: RecordedAction,
    pub resource_id: String,
}

/// RecordedAction identifies the action a history record belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub time: String,
}

impl ActionHistoryRecord {
    pub fn completed(resource_id: &ResourceId, action: &Action, at: DateTime<Utc>) -> Self {
        Self {
            last_completed_at: at,
            action: RecordedAction {
                action_type: action.action_type.to_string(),
                time: action.time.clone(),
            },
            resource_id: resource_id.as_str().to_string(),
        }
    }
}
