use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use vigil_common::{
    Action, Alert, CompareOp, Condition, ConditionKind, Dampening, DampeningType, Trigger,
    TriggerMode,
};

use crate::bootstrap::{self, import_init_data};
use crate::error::StoreError;
use crate::memory::{InMemoryAlertsStore, InMemoryDefinitionsStore};
use crate::{AlertsStore, DefinitionsStore};

const TIMEOUT: Duration = Duration::from_secs(60);

fn threshold(tenant: &str, trigger: &str, data_id: &str, value: f64) -> Condition {
    Condition::new(
        tenant,
        trigger,
        TriggerMode::Firing,
        ConditionKind::Threshold {
            data_id: data_id.into(),
            operator: CompareOp::Gt,
            threshold: value,
        },
    )
}

#[test]
fn trigger_crud_round_trip() {
    let store = InMemoryDefinitionsStore::new();

    let mut trigger = Trigger::new("acme", "t1", "cpu high");
    trigger.enabled = true;
    store.create_trigger(trigger.clone()).unwrap();

    let loaded = store.trigger("acme", "t1").unwrap().unwrap();
    assert_eq!(loaded.name, "cpu high");
    assert!(loaded.enabled);

    trigger.name = "cpu very high".into();
    store.save_trigger(trigger).unwrap();
    assert_eq!(
        store.trigger("acme", "t1").unwrap().unwrap().name,
        "cpu very high"
    );

    store.delete_trigger("acme", "t1").unwrap();
    assert!(store.trigger("acme", "t1").unwrap().is_none());
}

#[test]
fn create_trigger_rejects_duplicate_id() {
    let store = InMemoryDefinitionsStore::new();
    store
        .create_trigger(Trigger::new("acme", "t1", "first"))
        .unwrap();

    let err = store
        .create_trigger(Trigger::new("acme", "t1", "second"))
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));

    // same id under another tenant is a distinct key
    store
        .create_trigger(Trigger::new("globex", "t1", "other tenant"))
        .unwrap();
}

#[test]
fn triggers_are_tenant_scoped() {
    let store = InMemoryDefinitionsStore::new();
    store
        .create_trigger(Trigger::new("acme", "t1", "a"))
        .unwrap();
    store
        .create_trigger(Trigger::new("globex", "t2", "b"))
        .unwrap();

    assert_eq!(store.triggers("acme").unwrap().len(), 1);
    assert_eq!(store.all_triggers(TIMEOUT).unwrap().len(), 2);
}

#[test]
fn triggers_by_tag_scans_across_tenants() {
    let store = InMemoryDefinitionsStore::new();
    let mut t1 = Trigger::new("acme", "t1", "a");
    t1.tags.insert("service".into(), "checkout".into());
    let mut t2 = Trigger::new("globex", "t2", "b");
    t2.tags.insert("service".into(), "checkout".into());
    let mut t3 = Trigger::new("acme", "t3", "c");
    t3.tags.insert("service".into(), "billing".into());
    for t in [t1, t2, t3] {
        store.create_trigger(t).unwrap();
    }

    let hits = store
        .all_triggers_by_tag(TIMEOUT, "service", "checkout")
        .unwrap();
    assert_eq!(hits.len(), 2);
}

#[test]
fn set_conditions_replaces_mode_set() {
    let store = InMemoryDefinitionsStore::new();
    let mut set = vec![
        threshold("acme", "t1", "x", 1.0),
        threshold("acme", "t1", "y", 2.0),
    ];
    vigil_common::condition::set_coordinates(&mut set, "acme", "t1", TriggerMode::Firing);
    store
        .set_conditions("acme", "t1", TriggerMode::Firing, set)
        .unwrap();

    assert_eq!(
        store
            .conditions("acme", "t1", Some(TriggerMode::Firing))
            .unwrap()
            .len(),
        2
    );

    let mut replacement = vec![threshold("acme", "t1", "z", 3.0)];
    vigil_common::condition::set_coordinates(&mut replacement, "acme", "t1", TriggerMode::Firing);
    store
        .set_conditions("acme", "t1", TriggerMode::Firing, replacement)
        .unwrap();

    let loaded = store
        .conditions("acme", "t1", Some(TriggerMode::Firing))
        .unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].data_id(), "z");
    assert_eq!(loaded[0].condition_set_size, 1);
}

#[test]
fn dampening_keyed_per_trigger_mode() {
    let store = InMemoryDefinitionsStore::new();
    store
        .create_dampening(Dampening::for_strict("acme", "t1", TriggerMode::Firing, 2))
        .unwrap();
    store
        .create_dampening(Dampening::for_relaxed_count(
            "acme",
            "t1",
            TriggerMode::Autoresolve,
            1,
            2,
        ))
        .unwrap();

    let err = store
        .create_dampening(Dampening::for_strict("acme", "t1", TriggerMode::Firing, 9))
        .unwrap_err();
    assert!(matches!(err, StoreError::Duplicate(_)));

    let firing = store
        .dampening("acme", "t1", TriggerMode::Firing)
        .unwrap()
        .unwrap();
    assert_eq!(firing.eval_true_setting, 2);

    assert_eq!(store.trigger_dampenings("acme", "t1", None).unwrap().len(), 2);

    store.delete_dampenings("acme", "t1").unwrap();
    assert!(store
        .dampening("acme", "t1", TriggerMode::Firing)
        .unwrap()
        .is_none());
}

#[test]
fn alerts_store_filters_open_lifecycles() {
    let alerts = InMemoryAlertsStore::new();
    let trigger = Trigger::new("acme", "t1", "cpu");
    let dampening = Dampening::default_for("acme", "t1", TriggerMode::Firing);

    let open = Alert::new(&trigger, &dampening, Vec::new(), Utc::now());
    let mut resolved = Alert::new(&trigger, &dampening, Vec::new(), Utc::now());
    resolved.resolve(
        vigil_common::AlertLifecycle::Resolved,
        "operator",
        None,
        Utc::now(),
    );

    alerts.add_alert(open.clone()).unwrap();
    alerts.add_alert(resolved).unwrap();

    let found = alerts.open_alerts("acme", "t1").unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].alert_id, open.alert_id);

    assert_eq!(alerts.tenant_alerts("acme").unwrap().len(), 2);
}

#[test]
fn import_reads_all_init_files() {
    let dir = TempDir::new().unwrap();

    std::fs::write(
        dir.path().join(bootstrap::TRIGGERS_FILE),
        r#"{"triggers":[
            {"tenantId":"acme","id":"t1","name":"cpu high","enabled":true},
            {"tenantId":"acme","id":"t2","name":"mem high","enabled":false}
        ]}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join(bootstrap::CONDITIONS_FILE),
        r#"{"conditions":[
            {"tenantId":"acme","triggerId":"t1","triggerMode":"FIRING",
             "type":"THRESHOLD","dataId":"cpu","operator":"GT","threshold":90.0},
            {"tenantId":"acme","triggerId":"t1","triggerMode":"FIRING",
             "type":"AVAILABILITY","dataId":"ping","operator":"DOWN"}
        ]}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join(bootstrap::DAMPENING_FILE),
        r#"{"dampenings":[
            {"tenantId":"acme","triggerId":"t1","triggerMode":"FIRING",
             "type":"RELAXED_COUNT","evalTrueSetting":2,"evalTotalSetting":3}
        ]}"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join(bootstrap::ACTIONS_FILE),
        r#"{"actions":[
            {"tenantId":"acme","actionPlugin":"webhook","actionId":"ops-hook",
             "properties":{"url":"http://hooks.local/ops"},
             "plugin":{"properties":["method"],"defaults":{"timeout_secs":"5"}}},
            {"tenantId":"acme","actionPlugin":"pager","actionId":"oncall",
             "properties":{"routing_key":"abc"}}
        ]}"#,
    )
    .unwrap();

    let store = InMemoryDefinitionsStore::new();
    let summary = import_init_data(dir.path(), &store).unwrap();

    assert_eq!(summary.triggers, 2);
    assert_eq!(summary.conditions, 2);
    assert_eq!(summary.dampenings, 1);
    assert_eq!(summary.actions, 2);

    // condition set coordinates are normalized on import
    let conditions = store
        .conditions("acme", "t1", Some(TriggerMode::Firing))
        .unwrap();
    assert_eq!(conditions.len(), 2);
    assert!(conditions
        .iter()
        .enumerate()
        .all(|(i, c)| c.condition_set_size == 2 && c.condition_set_index == i + 1));

    let dampening = store
        .dampening("acme", "t1", TriggerMode::Firing)
        .unwrap()
        .unwrap();
    assert_eq!(dampening.dampening_type, DampeningType::RelaxedCount);

    // the inline declaration registered the plugin with its defaults
    let webhook = store.action_plugin("webhook").unwrap().unwrap();
    assert!(webhook.properties.contains("method"));
    assert!(webhook.properties.contains("timeout_secs"));
    assert_eq!(
        webhook.defaults.get("timeout_secs").map(String::as_str),
        Some("5")
    );

    // without a declaration, the plugin is back-filled from the action's
    // own property names
    let pager = store.action_plugin("pager").unwrap().unwrap();
    assert!(pager.properties.contains("routing_key"));
    assert!(pager.defaults.is_empty());
}

#[test]
fn import_skips_existing_entities() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(bootstrap::TRIGGERS_FILE),
        r#"{"triggers":[{"tenantId":"acme","id":"t1","name":"from file"}]}"#,
    )
    .unwrap();

    let store = InMemoryDefinitionsStore::new();
    let mut existing = Trigger::new("acme", "t1", "already here");
    existing.enabled = true;
    store.create_trigger(existing).unwrap();

    let summary = import_init_data(dir.path(), &store).unwrap();
    assert_eq!(summary.triggers, 0);
    assert_eq!(
        store.trigger("acme", "t1").unwrap().unwrap().name,
        "already here"
    );
}

#[test]
fn import_ignores_missing_files() {
    let dir = TempDir::new().unwrap();
    let store = InMemoryDefinitionsStore::new();
    let summary = import_init_data(dir.path(), &store).unwrap();
    assert_eq!(summary, crate::ImportSummary::default());
}

#[test]
fn actions_crud_round_trip() {
    let store = InMemoryDefinitionsStore::new();
    store
        .create_action_plugin(vigil_common::ActionPlugin::with_defaults(
            "email",
            [("from".to_string(), "vigil@local".to_string())]
                .into_iter()
                .collect(),
        ))
        .unwrap();

    let action = Action {
        tenant_id: "acme".into(),
        action_plugin: "email".into(),
        action_id: "ops".into(),
        properties: [("to".to_string(), "ops@acme.io".to_string())]
            .into_iter()
            .collect(),
    };
    store.create_action(action.clone()).unwrap();

    assert!(store.action("acme", "email", "ops").unwrap().is_some());
    assert_eq!(store.actions("acme").unwrap().len(), 1);
    assert_eq!(store.all_actions(TIMEOUT).unwrap().len(), 1);

    store.delete_action("acme", "email", "ops").unwrap();
    assert!(store.action("acme", "email", "ops").unwrap().is_none());
}
