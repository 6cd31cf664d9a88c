use std::collections::HashMap;
use std::sync::Arc;

use vigil_common::ActionPlugin;

use crate::ActionExecutor;

pub struct PluginRegistry {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    pub fn register(&mut self, executor: Arc<dyn ActionExecutor>) {
        let name = executor.name().to_string();
        self.executors.insert(name, executor);
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(type_name).cloned()
    }

    pub fn has_plugin(&self, type_name: &str) -> bool {
        self.executors.contains_key(type_name)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.executors.keys().map(|s| s.as_str()).collect()
    }

    /// Definitions-store entries advertising the registered plugins, suitable
    /// for seeding `DefinitionsStore::create_action_plugin`.
    pub fn plugin_definitions(&self) -> Vec<ActionPlugin> {
        self.executors
            .values()
            .map(|e| ActionPlugin::with_defaults(e.name(), e.default_properties()))
            .collect()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::plugins::log::LogExecutor));
        registry.register(Arc::new(crate::plugins::webhook::WebhookExecutor::new()));
        registry
    }
}
