// Original autoscale capacity captured before scaling to zero

use crate::errors::StorageError;
use crate::models::AutoscaleCapacity;
use crate::resource_id::ResourceId;
use crate::storage::file_store::JsonFileStore;
use std::path::Path;

pub const BASELINE_FILE: &str = "autoscale_settings/original_autoscaling_config.json";

/// AutoscaleBaselineStore maps a resource id to its pre-scale-down capacity
pub struct AutoscaleBaselineStore {
    store: JsonFileStore<AutoscaleCapacity>,
}

impl AutoscaleBaselineStore {
    /// Open `{var_dir}/autoscale_settings/original_autoscaling_config.json`
    pub async fn open(var_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_file(var_dir.as_ref().join(BASELINE_FILE)).await
    }

    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self {
            store: JsonFileStore::open(path).await?,
        })
    }

    pub async fn get(&self, resource_id: &ResourceId) -> Option<AutoscaleCapacity> {
        self.store.get(resource_id.as_str()).await
    }

    pub async fn put(
        &self,
        resource_id: &ResourceId,
        capacity: AutoscaleCapacity,
    ) -> Result<(), StorageError> {
        self.store.put(resource_id.as_str(), capacity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_baseline_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let id = ResourceId::parse(
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachineScaleSets/ss",
        )
        .unwrap();
        let capacity = AutoscaleCapacity {
            min: 1,
            max: 5,
            default: 2,
        };

        {
            let store = AutoscaleBaselineStore::open(dir.path()).await.unwrap();
            assert!(store.get(&id).await.is_none());
            store.put(&id, capacity).await.unwrap();
        }

        let reopened = AutoscaleBaselineStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.get(&id).await, Some(capacity));
        assert!(dir.path().join(BASELINE_FILE).exists());
    }
}
