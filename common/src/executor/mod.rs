// Executor module for action execution
// Provides the resource operation seam and the action dispatcher

pub mod azure;
pub mod dispatcher;

use crate::errors::ExecutionError;
use crate::models::{AutoscaleCapacity, AutoscaleSettingRef};
use crate::resource_id::ResourceId;
use async_trait::async_trait;

pub use dispatcher::ActionDispatcher;

/// ResourceOperations is the set of control-plane calls actions are mapped onto
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceOperations: Send + Sync {
    async fn resize_vm(&self, vm: &ResourceId, size: &str) -> Result<(), ExecutionError>;

    async fn start_vm(&self, vm: &ResourceId) -> Result<(), ExecutionError>;

    async fn deallocate_vm(&self, vm: &ResourceId) -> Result<(), ExecutionError>;

    /// Capacity of the first profile, `None` when the setting has no profile
    async fn get_autoscale_capacity(
        &self,
        setting: &AutoscaleSettingRef,
    ) -> Result<Option<AutoscaleCapacity>, ExecutionError>;

    async fn set_autoscale_capacity(
        &self,
        setting: &AutoscaleSettingRef,
        capacity: AutoscaleCapacity,
    ) -> Result<(), ExecutionError>;

    async fn start_mysql_flexible_server(&self, server: &ResourceId)
        -> Result<(), ExecutionError>;

    async fn stop_mysql_flexible_server(&self, server: &ResourceId) -> Result<(), ExecutionError>;
}
