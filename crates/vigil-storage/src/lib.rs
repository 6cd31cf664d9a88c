//! Storage seams for the vigil alerting engine.
//!
//! The engine talks to its collaborators only through the narrow traits in
//! this crate: [`DefinitionsStore`] for trigger/condition/dampening/action
//! definitions and [`AlertsStore`] for emitted alerts. The in-memory
//! implementations back the registry in a single-node deployment and serve as
//! the test substrate; a clustered deployment swaps in a remote store behind
//! the same traits.

pub mod bootstrap;
pub mod error;
pub mod memory;

#[cfg(test)]
mod tests;

use std::time::Duration;

use uuid::Uuid;

use vigil_common::{
    Action, ActionPlugin, Alert, Condition, Dampening, Trigger, TriggerMode,
};

pub use bootstrap::{import_init_data, ImportSummary};
pub use error::StoreError;
pub use memory::{InMemoryAlertsStore, InMemoryDefinitionsStore};

/// CRUD over alerting definitions, tenant-scoped except where noted.
///
/// The `all_*` fetches are cross-tenant admin scans; the `timeout` bounds how
/// long a remote backend may take before giving up with
/// [`StoreError::Backend`]. The in-memory store answers immediately and
/// ignores it.
pub trait DefinitionsStore: Send + Sync {
    // triggers

    fn create_trigger(&self, trigger: Trigger) -> error::Result<()>;
    fn save_trigger(&self, trigger: Trigger) -> error::Result<()>;
    fn delete_trigger(&self, tenant_id: &str, trigger_id: &str) -> error::Result<()>;
    fn trigger(&self, tenant_id: &str, trigger_id: &str) -> error::Result<Option<Trigger>>;
    fn triggers(&self, tenant_id: &str) -> error::Result<Vec<Trigger>>;
    fn all_triggers(&self, timeout: Duration) -> error::Result<Vec<Trigger>>;
    fn all_triggers_by_tag(
        &self,
        timeout: Duration,
        name: &str,
        value: &str,
    ) -> error::Result<Vec<Trigger>>;

    // conditions

    /// Replaces the full condition set of one `(trigger, mode)`. Set
    /// coordinates (size, contiguous indices) must already be assigned by the
    /// caller.
    fn set_conditions(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: TriggerMode,
        conditions: Vec<Condition>,
    ) -> error::Result<()>;
    /// Conditions of one trigger, all modes or one, ordered by (mode, index).
    fn conditions(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: Option<TriggerMode>,
    ) -> error::Result<Vec<Condition>>;
    fn tenant_conditions(&self, tenant_id: &str) -> error::Result<Vec<Condition>>;
    fn all_conditions(&self, timeout: Duration) -> error::Result<Vec<Condition>>;
    fn delete_conditions(&self, tenant_id: &str, trigger_id: &str) -> error::Result<()>;

    // dampenings

    fn create_dampening(&self, dampening: Dampening) -> error::Result<()>;
    fn save_dampening(&self, dampening: Dampening) -> error::Result<()>;
    fn delete_dampening(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: TriggerMode,
    ) -> error::Result<()>;
    fn delete_dampenings(&self, tenant_id: &str, trigger_id: &str) -> error::Result<()>;
    fn dampening(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: TriggerMode,
    ) -> error::Result<Option<Dampening>>;
    fn trigger_dampenings(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: Option<TriggerMode>,
    ) -> error::Result<Vec<Dampening>>;
    fn dampenings(&self, tenant_id: &str) -> error::Result<Vec<Dampening>>;
    fn all_dampenings(&self, timeout: Duration) -> error::Result<Vec<Dampening>>;

    // action plugins (process-wide, not tenant scoped)

    fn create_action_plugin(&self, plugin: ActionPlugin) -> error::Result<()>;
    fn save_action_plugin(&self, plugin: ActionPlugin) -> error::Result<()>;
    fn delete_action_plugin(&self, name: &str) -> error::Result<()>;
    fn action_plugin(&self, name: &str) -> error::Result<Option<ActionPlugin>>;
    fn action_plugins(&self) -> error::Result<Vec<String>>;

    // actions

    fn create_action(&self, action: Action) -> error::Result<()>;
    fn save_action(&self, action: Action) -> error::Result<()>;
    fn delete_action(
        &self,
        tenant_id: &str,
        action_plugin: &str,
        action_id: &str,
    ) -> error::Result<()>;
    fn action(
        &self,
        tenant_id: &str,
        action_plugin: &str,
        action_id: &str,
    ) -> error::Result<Option<Action>>;
    fn actions(&self, tenant_id: &str) -> error::Result<Vec<Action>>;
    fn all_actions(&self, timeout: Duration) -> error::Result<Vec<Action>>;
}

/// Sink and query surface for emitted alerts.
pub trait AlertsStore: Send + Sync {
    fn add_alert(&self, alert: Alert) -> error::Result<()>;
    fn update_alert(&self, alert: Alert) -> error::Result<()>;
    fn alert(&self, tenant_id: &str, alert_id: &Uuid) -> error::Result<Option<Alert>>;
    /// Alerts still in the OPEN or ACKNOWLEDGED lifecycle for one trigger.
    fn open_alerts(&self, tenant_id: &str, trigger_id: &str) -> error::Result<Vec<Alert>>;
    fn tenant_alerts(&self, tenant_id: &str) -> error::Result<Vec<Alert>>;
}
