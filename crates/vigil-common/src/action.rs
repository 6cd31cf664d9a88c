use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::alert::Alert;

/// An action plugin definition: the plugin advertises the property names it
/// understands and their default values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionPlugin {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeSet<String>,
    #[serde(default)]
    pub defaults: HashMap<String, String>,
}

impl ActionPlugin {
    pub fn new(name: impl Into<String>) -> Self {
        ActionPlugin {
            name: name.into(),
            properties: BTreeSet::new(),
            defaults: HashMap::new(),
        }
    }

    pub fn with_defaults(name: impl Into<String>, defaults: HashMap<String, String>) -> Self {
        let properties = defaults.keys().cloned().collect();
        ActionPlugin {
            name: name.into(),
            properties,
            defaults,
        }
    }
}

/// A tenant-scoped action instance: a plugin bound with concrete property
/// values. Identity is `(tenant_id, action_plugin, action_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default)]
    pub tenant_id: String,
    pub action_plugin: String,
    pub action_id: String,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

/// One fire-and-forget dispatch request handed to the action sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub tenant_id: String,
    pub action_plugin: String,
    pub action_id: String,
    pub alert: Alert,
}

/// The narrow seam between the engine and action delivery. Dispatch must not
/// block the rule engine; implementations queue and drop on overflow.
pub trait ActionSink: Send + Sync {
    fn dispatch(&self, request: ActionRequest);
}
