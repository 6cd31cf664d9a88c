//! Bounded-queue action dispatcher.
//!
//! `dispatch` never blocks the rule engine: requests land on a bounded
//! channel via `try_send` and a worker task drains it. When the queue is
//! full the request is dropped and counted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

use vigil_common::{ActionRequest, ActionSink};
use vigil_storage::DefinitionsStore;

use crate::PluginRegistry;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Max queued action requests before drops apply.
    pub queue_capacity: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
        }
    }
}

pub struct ActionDispatcher {
    tx: mpsc::Sender<ActionRequest>,
    dropped: AtomicU64,
}

impl ActionDispatcher {
    /// Spawns the worker task on the current tokio runtime.
    pub fn spawn(
        config: DispatcherConfig,
        registry: PluginRegistry,
        definitions: Arc<dyn DefinitionsStore>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        tokio::spawn(worker_loop(rx, registry, definitions));
        Arc::new(Self {
            tx,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl ActionSink for ActionDispatcher {
    fn dispatch(&self, request: ActionRequest) {
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) | Err(TrySendError::Closed(request)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    tenant_id = %request.tenant_id,
                    action_plugin = %request.action_plugin,
                    action_id = %request.action_id,
                    "Action queue unavailable, dropping request"
                );
            }
        }
    }
}

async fn worker_loop(
    mut rx: mpsc::Receiver<ActionRequest>,
    registry: PluginRegistry,
    definitions: Arc<dyn DefinitionsStore>,
) {
    while let Some(request) = rx.recv().await {
        deliver(&registry, definitions.as_ref(), request).await;
    }
    tracing::debug!("Action dispatcher worker stopped");
}

async fn deliver(registry: &PluginRegistry, definitions: &dyn DefinitionsStore, request: ActionRequest) {
    let Some(executor) = registry.get(&request.action_plugin) else {
        tracing::warn!(
            action_plugin = %request.action_plugin,
            "Unknown action plugin, dropping request"
        );
        return;
    };

    let properties = resolve_properties(definitions, &request, executor.default_properties());

    if let Err(e) = executor.execute(&request, &properties).await {
        tracing::error!(
            tenant_id = %request.tenant_id,
            action_plugin = %request.action_plugin,
            action_id = %request.action_id,
            alert_id = %request.alert.alert_id,
            error = %e,
            "Action delivery failed"
        );
    }
}

/// Layered property resolution: executor built-ins, then the plugin
/// definition's stored defaults, then the action's own properties.
fn resolve_properties(
    definitions: &dyn DefinitionsStore,
    request: &ActionRequest,
    mut properties: HashMap<String, String>,
) -> HashMap<String, String> {
    match definitions.action_plugin(&request.action_plugin) {
        Ok(Some(plugin)) => properties.extend(plugin.defaults),
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(
                action_plugin = %request.action_plugin,
                error = %e,
                "Failed to load plugin defaults"
            );
        }
    }

    match definitions.action(&request.tenant_id, &request.action_plugin, &request.action_id) {
        Ok(Some(action)) => properties.extend(action.properties),
        Ok(None) => {
            tracing::warn!(
                tenant_id = %request.tenant_id,
                action_plugin = %request.action_plugin,
                action_id = %request.action_id,
                "Action not defined, delivering with plugin defaults"
            );
        }
        Err(e) => {
            tracing::warn!(
                tenant_id = %request.tenant_id,
                action_id = %request.action_id,
                error = %e,
                "Failed to load action properties"
            );
        }
    }

    properties
}
