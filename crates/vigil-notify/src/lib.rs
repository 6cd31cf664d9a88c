//! Action delivery: the engine's action sink.
//!
//! Alerts reach this crate as fire-and-forget [`ActionRequest`]s through a
//! bounded queue; a worker task resolves the bound action's stored properties
//! against the plugin's advertised defaults and hands the merged set to the
//! [`ActionExecutor`] implementation. Delivery failures are logged and never
//! surface back to the rule engine.

pub mod dispatcher;
pub mod plugin;
pub mod plugins;

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use async_trait::async_trait;

use vigil_common::ActionRequest;

pub use dispatcher::{ActionDispatcher, DispatcherConfig};
pub use plugin::PluginRegistry;

/// An executable action plugin (e.g. webhook POST, log line).
///
/// Implementations are registered in the [`PluginRegistry`]; the dispatcher
/// resolves properties before calling `execute`, so implementations see the
/// plugin defaults already overlaid with the action's stored values.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Plugin type name (e.g. `"webhook"`).
    fn name(&self) -> &str;

    /// Property names this plugin understands, with their default values.
    fn default_properties(&self) -> HashMap<String, String>;

    /// Delivers the alert carried by `request`.
    ///
    /// # Errors
    ///
    /// Returns an error when delivery fails after retries (if applicable);
    /// the dispatcher logs it and moves on.
    async fn execute(
        &self,
        request: &ActionRequest,
        properties: &HashMap<String, String>,
    ) -> anyhow::Result<()>;
}
