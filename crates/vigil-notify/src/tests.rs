use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use vigil_common::{
    Action, ActionPlugin, ActionRequest, ActionSink, Alert, Dampening, Trigger, TriggerMode,
};
use vigil_storage::{DefinitionsStore, InMemoryDefinitionsStore};

use crate::dispatcher::{ActionDispatcher, DispatcherConfig};
use crate::plugin::PluginRegistry;
use crate::ActionExecutor;

fn sample_request(plugin: &str, action_id: &str) -> ActionRequest {
    let trigger = Trigger::new("acme", "t1", "cpu high");
    let dampening = Dampening::default_for("acme", "t1", TriggerMode::Firing);
    let alert = Alert::new(&trigger, &dampening, Vec::new(), Utc::now());
    ActionRequest {
        tenant_id: "acme".into(),
        action_plugin: plugin.into(),
        action_id: action_id.into(),
        alert,
    }
}

/// Records every delivery it sees, together with the resolved properties.
struct RecordingExecutor {
    deliveries: Arc<Mutex<Vec<(String, HashMap<String, String>)>>>,
    block_on: Option<Arc<tokio::sync::Semaphore>>,
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    fn name(&self) -> &str {
        "recording"
    }

    fn default_properties(&self) -> HashMap<String, String> {
        [
            ("level".to_string(), "builtin".to_string()),
            ("extra".to_string(), "builtin".to_string()),
        ]
        .into_iter()
        .collect()
    }

    async fn execute(
        &self,
        request: &ActionRequest,
        properties: &HashMap<String, String>,
    ) -> anyhow::Result<()> {
        if let Some(gate) = &self.block_on {
            let _permit = gate.acquire().await?;
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((request.action_id.clone(), properties.clone()));
        Ok(())
    }
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within timeout");
}

#[test]
fn default_registry_carries_builtin_plugins() {
    let registry = PluginRegistry::default();
    assert!(registry.has_plugin("log"));
    assert!(registry.has_plugin("webhook"));

    let definitions = registry.plugin_definitions();
    let webhook = definitions.iter().find(|p| p.name == "webhook").unwrap();
    assert!(webhook.properties.contains("url"));
    assert!(webhook.properties.contains("timeout_secs"));
    assert_eq!(
        webhook.defaults.get("method").map(String::as_str),
        Some("POST")
    );
}

#[tokio::test]
async fn dispatcher_merges_plugin_defaults_under_action_properties() {
    let deliveries = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(RecordingExecutor {
        deliveries: Arc::clone(&deliveries),
        block_on: None,
    }));

    let store: Arc<dyn DefinitionsStore> = Arc::new(InMemoryDefinitionsStore::new());
    store
        .create_action_plugin(ActionPlugin::with_defaults(
            "recording",
            [("level".to_string(), "stored-default".to_string())]
                .into_iter()
                .collect(),
        ))
        .unwrap();
    store
        .create_action(Action {
            tenant_id: "acme".into(),
            action_plugin: "recording".into(),
            action_id: "ops".into(),
            properties: [("level".to_string(), "action-value".to_string())]
                .into_iter()
                .collect(),
        })
        .unwrap();

    let dispatcher = ActionDispatcher::spawn(DispatcherConfig::default(), registry, store);
    dispatcher.dispatch(sample_request("recording", "ops"));

    wait_until(|| !deliveries.lock().unwrap().is_empty()).await;

    let recorded = deliveries.lock().unwrap();
    let (action_id, properties) = &recorded[0];
    assert_eq!(action_id, "ops");
    // action property wins over the stored plugin default and the built-in
    assert_eq!(properties.get("level").unwrap(), "action-value");
    // untouched built-in default survives
    assert_eq!(properties.get("extra").unwrap(), "builtin");
}

#[tokio::test]
async fn dispatcher_delivers_with_defaults_when_action_is_undefined() {
    let deliveries = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(RecordingExecutor {
        deliveries: Arc::clone(&deliveries),
        block_on: None,
    }));
    let store: Arc<dyn DefinitionsStore> = Arc::new(InMemoryDefinitionsStore::new());

    let dispatcher = ActionDispatcher::spawn(DispatcherConfig::default(), registry, store);
    dispatcher.dispatch(sample_request("recording", "missing"));

    wait_until(|| !deliveries.lock().unwrap().is_empty()).await;
    let recorded = deliveries.lock().unwrap();
    assert_eq!(recorded[0].1.get("level").unwrap(), "builtin");
}

#[tokio::test]
async fn dispatcher_drops_on_overflow_and_counts() {
    let deliveries = Arc::new(Mutex::new(Vec::new()));
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    let mut registry = PluginRegistry::new();
    registry.register(Arc::new(RecordingExecutor {
        deliveries: Arc::clone(&deliveries),
        block_on: Some(Arc::clone(&gate)),
    }));
    let store: Arc<dyn DefinitionsStore> = Arc::new(InMemoryDefinitionsStore::new());

    let dispatcher =
        ActionDispatcher::spawn(DispatcherConfig { queue_capacity: 1 }, registry, store);

    for i in 0..10 {
        dispatcher.dispatch(sample_request("recording", &format!("a{i}")));
    }
    // worker can hold at most one in-flight request plus one queued
    assert!(dispatcher.dropped() >= 8);

    gate.add_permits(10);
    wait_until(|| !deliveries.lock().unwrap().is_empty()).await;
    assert!(deliveries.lock().unwrap().len() <= 2);
}

#[tokio::test]
async fn unknown_plugin_is_dropped_quietly() {
    let store: Arc<dyn DefinitionsStore> = Arc::new(InMemoryDefinitionsStore::new());
    let dispatcher =
        ActionDispatcher::spawn(DispatcherConfig::default(), PluginRegistry::new(), store);

    dispatcher.dispatch(sample_request("nonexistent", "ops"));
    // nothing to assert beyond "does not panic"; give the worker a beat
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(dispatcher.dropped(), 0);
}

#[tokio::test]
async fn log_executor_accepts_any_level() {
    let executor = crate::plugins::log::LogExecutor;
    let request = sample_request("log", "ops");

    for level in ["info", "warn", "error", "bogus"] {
        let properties = [("level".to_string(), level.to_string())]
            .into_iter()
            .collect();
        executor.execute(&request, &properties).await.unwrap();
    }
}
