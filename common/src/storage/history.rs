// Action completion history keyed by action fingerprint

use crate::errors::StorageError;
use crate::models::{Action, ActionHistoryRecord};
use crate::resource_id::ResourceId;
use crate::storage::file_store::JsonFileStore;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::instrument;

pub const HISTORY_FILE: &str = "action_history.json";

/// Identity of an action for idempotency purposes.
///
/// SHA-256 of the canonical (key-sorted) JSON `{"actionParams", "type"}`
/// followed by the raw resource id. Time and conditions are not included, so
/// two actions that differ only in those share a fingerprint.
pub fn fingerprint(resource_id: &ResourceId, action: &Action) -> String {
    let payload = canonicalize(&json!({
        "actionParams": Value::Object(action.action_params.clone()),
        "type": action.action_type.as_str(),
    }));
    let serialized = serde_json::to_string(&payload).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(serialized.as_bytes());
    hasher.update(resource_id.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// ActionHistoryStore persists the last completion of each fingerprint
pub struct ActionHistoryStore {
    store: JsonFileStore<ActionHistoryRecord>,
}

impl ActionHistoryStore {
    /// Open `{var_dir}/action_history.json`
    pub async fn open(var_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        Self::open_file(var_dir.as_ref().join(HISTORY_FILE)).await
    }

    pub async fn open_file(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        Ok(Self {
            store: JsonFileStore::open(path).await?,
        })
    }

    pub async fn get(&self, fingerprint: &str) -> Option<ActionHistoryRecord> {
        self.store.get(fingerprint).await
    }

    pub async fn put(
        &self,
        fingerprint: &str,
        record: ActionHistoryRecord,
    ) -> Result<(), StorageError> {
        self.store.put(fingerprint, record).await
    }

    /// Whether the fingerprint has a completion at or after `at`
    pub async fn has_completed_since(&self, fingerprint: &str, at: DateTime<Utc>) -> bool {
        self.get(fingerprint)
            .await
            .is_some_and(|record| record.last_completed_at >= at)
    }

    #[instrument(skip(self, action), fields(resource = %resource_id, action_type = %action.action_type))]
    pub async fn record_completion(
        &self,
        resource_id: &ResourceId,
        action: &Action,
        completed_at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let record = ActionHistoryRecord::completed(resource_id, action, completed_at);
        self.put(&fingerprint(resource_id, action), record).await
    }

    pub async fn len(&self) -> usize {
        self.store.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.store.is_empty().await
    }
}
