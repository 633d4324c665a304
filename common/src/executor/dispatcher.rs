// Action dispatcher
//
// Maps an action type onto the matching resource operation. No retries here:
// a failed action stays eligible and is picked up by the next pass.

use crate::errors::ExecutionError;
use crate::executor::ResourceOperations;
use crate::models::{Action, ActionType, AutoscaleCapacity, AutoscaleSettingParams, VmResizeParams};
use crate::resource_id::ResourceId;
use crate::storage::AutoscaleBaselineStore;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// ActionDispatcher executes a single action against its resource
pub struct ActionDispatcher {
    operations: Arc<dyn ResourceOperations>,
    baselines: Arc<AutoscaleBaselineStore>,
}

impl ActionDispatcher {
    pub fn new(
        operations: Arc<dyn ResourceOperations>,
        baselines: Arc<AutoscaleBaselineStore>,
    ) -> Self {
        Self {
            operations,
            baselines,
        }
    }

    #[instrument(
        skip(self, action, resource_id),
        fields(resource = %resource_id, action_type = %action.action_type, time = %action.time)
    )]
    pub async fn dispatch(
        &self,
        action: &Action,
        resource_id: &ResourceId,
    ) -> Result<(), ExecutionError> {
        match action.action_type {
            ActionType::VmResize => {
                let params: VmResizeParams = action.params()?;
                info!(size_target = %params.size_target, "Resizing VM");
                self.operations
                    .resize_vm(resource_id, &params.size_target)
                    .await
            }
            ActionType::VmStart => {
                info!("Starting VM");
                self.operations.start_vm(resource_id).await
            }
            ActionType::VmDeallocate => {
                info!("Deallocating VM");
                self.operations.deallocate_vm(resource_id).await
            }
            ActionType::AutoscalingSettingSetZero => {
                self.set_autoscale_zero(action, resource_id).await
            }
            ActionType::AutoscalingSettingRestore => {
                self.restore_autoscale(action, resource_id).await
            }
            ActionType::MysqlFlexibleStart => {
                info!("Starting MySQL flexible server");
                self.operations.start_mysql_flexible_server(resource_id).await
            }
            ActionType::MysqlFlexibleStop => {
                info!("Stopping MySQL flexible server");
                self.operations.stop_mysql_flexible_server(resource_id).await
            }
        }
    }

    /// Capture the current capacity once, then scale the setting to zero.
    ///
    /// The baseline is persisted before scaling so a crash in between cannot
    /// lose it. An existing baseline is never overwritten.
    async fn set_autoscale_zero(
        &self,
        action: &Action,
        resource_id: &ResourceId,
    ) -> Result<(), ExecutionError> {
        let setting = action.params::<AutoscaleSettingParams>()?.resolve(resource_id);

        if self.baselines.get(resource_id).await.is_none() {
            match self.operations.get_autoscale_capacity(&setting).await? {
                Some(capacity) => {
                    self.baselines.put(resource_id, capacity).await?;
                    info!(
                        setting = %setting.name,
                        min = capacity.min,
                        max = capacity.max,
                        default = capacity.default,
                        "Recorded original autoscale capacity"
                    );
                }
                None => {
                    warn!(setting = %setting.name, "Autoscale setting has no profile, no baseline recorded");
                }
            }
        }

        info!(setting = %setting.name, "Setting autoscale capacity to zero");
        self.operations
            .set_autoscale_capacity(&setting, AutoscaleCapacity::ZERO)
            .await
    }

    /// Put back the recorded baseline. Without one this is a logged no-op.
    async fn restore_autoscale(
        &self,
        action: &Action,
        resource_id: &ResourceId,
    ) -> Result<(), ExecutionError> {
        let setting = action.params::<AutoscaleSettingParams>()?.resolve(resource_id);

        let Some(baseline) = self.baselines.get(resource_id).await else {
            info!(setting = %setting.name, "No original autoscale capacity recorded, nothing to restore");
            return Ok(());
        };

        info!(
            setting = %setting.name,
            min = baseline.min,
            max = baseline.max,
            default = baseline.default,
            "Restoring autoscale capacity"
        );
        self.operations
            .set_autoscale_capacity(&setting, baseline)
            .await
    }
}
