// Property-based tests for action fingerprints and the completion history

use chrono::{Duration, TimeZone, Utc};
use common::models::{Action, ActionType};
use common::resource_id::ResourceId;
use common::storage::{fingerprint, ActionHistoryStore};
use proptest::prelude::*;
use serde_json::{json, Map, Value};

const VM: &str =
    "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/vm";

fn vm() -> ResourceId {
    ResourceId::parse(VM).unwrap()
}

fn params_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::btree_map("[a-zA-Z]{1,12}", "[a-zA-Z0-9_]{0,16}", 0..6)
        .prop_map(|map| map.into_iter().collect())
}

fn action_with(entries: &[(String, String)], time: &str) -> Action {
    let mut params = Map::new();
    for (key, value) in entries {
        params.insert(key.clone(), Value::String(value.clone()));
    }
    Action::new(ActionType::VmResize, time).with_params(Value::Object(params))
}

/// Parameter insertion order never changes the fingerprint
#[test]
fn property_fingerprint_ignores_key_order() {
    proptest!(|(entries in params_strategy())| {
        let forward = action_with(&entries, "08:00");
        let mut reversed_entries = entries.clone();
        reversed_entries.reverse();
        let reversed = action_with(&reversed_entries, "08:00");

        prop_assert_eq!(fingerprint(&vm(), &forward), fingerprint(&vm(), &reversed));
    });
}

/// Time and conditions are not part of an action's identity
#[test]
fn property_fingerprint_ignores_time_and_conditions() {
    proptest!(|(
        entries in params_strategy(),
        hour in 0u32..24,
        minute in 0u32..60
    )| {
        let base = action_with(&entries, "08:00");
        let moved = action_with(&entries, &format!("{:02}:{:02}", hour, minute))
            .with_condition("$isHoliday")
            .with_prevent_next(false);

        prop_assert_eq!(fingerprint(&vm(), &base), fingerprint(&vm(), &moved));
    });
}

/// Different target resources never share a fingerprint
#[test]
fn property_fingerprint_depends_on_resource() {
    proptest!(|(a in "[a-z][a-z0-9-]{0,15}", b in "[a-z][a-z0-9-]{0,15}")| {
        prop_assume!(a != b);
        let id = |name: &str| {
            ResourceId::parse(&format!(
                "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachines/{}",
                name
            ))
            .unwrap()
        };
        let action = Action::new(ActionType::VmStart, "08:00");

        prop_assert_ne!(fingerprint(&id(&a), &action), fingerprint(&id(&b), &action));
    });
}

/// A different action type changes the fingerprint
#[test]
fn property_fingerprint_depends_on_type() {
    let params = json!({ "sizeTarget": "Standard_B2s" });
    let resize = Action::new(ActionType::VmResize, "08:00").with_params(params.clone());
    let start = Action::new(ActionType::VmStart, "08:00").with_params(params);
    assert_ne!(fingerprint(&vm(), &resize), fingerprint(&vm(), &start));
}

/// A completion counts for an occurrence exactly when it is not earlier
/// than the occurrence's scheduled instant.
#[test]
fn property_completion_gate_compares_against_schedule() {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    proptest!(ProptestConfig::with_cases(32), |(offset_minutes in -600i64..600)| {
        let dir = tempfile::tempdir().unwrap();
        let scheduled = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        let completed = scheduled + Duration::minutes(offset_minutes);
        let action = Action::new(ActionType::VmStart, "08:00");

        let done = runtime.block_on(async {
            let store = ActionHistoryStore::open(dir.path()).await.unwrap();
            store.record_completion(&vm(), &action, completed).await.unwrap();
            store
                .has_completed_since(&fingerprint(&vm(), &action), scheduled)
                .await
        });

        prop_assert_eq!(done, offset_minutes >= 0);
    });
}

/// Recorded completions survive reopening the store
#[test]
fn property_history_survives_reopen() {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    proptest!(ProptestConfig::with_cases(16), |(names in prop::collection::btree_set("[a-z]{1,10}", 1..6))| {
        let dir = tempfile::tempdir().unwrap();
        let at = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let actions: Vec<Action> = names
            .iter()
            .map(|name| {
                Action::new(ActionType::AutoscalingSettingSetZero, "21:00")
                    .with_params(json!({ "autoscaleSettingName": name }))
            })
            .collect();

        let reopened_len = runtime.block_on(async {
            let store = ActionHistoryStore::open(dir.path()).await.unwrap();
            for action in &actions {
                store.record_completion(&vm(), action, at).await.unwrap();
            }
            drop(store);

            let reopened = ActionHistoryStore::open(dir.path()).await.unwrap();
            for action in &actions {
                assert!(reopened.has_completed_since(&fingerprint(&vm(), action), at).await);
            }
            reopened.len().await
        });

        prop_assert_eq!(reopened_len, actions.len());
    });
}
