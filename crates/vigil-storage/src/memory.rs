use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use uuid::Uuid;

use vigil_common::{Action, ActionPlugin, Alert, Condition, Dampening, Trigger, TriggerMode};

use crate::error::{Result, StoreError};
use crate::{AlertsStore, DefinitionsStore};

type TriggerKey = (String, String);
type ModeKey = (String, String, TriggerMode);
type ActionKey = (String, String, String);

#[derive(Default)]
struct DefinitionsInner {
    triggers: BTreeMap<TriggerKey, Trigger>,
    conditions: BTreeMap<ModeKey, Vec<Condition>>,
    dampenings: BTreeMap<ModeKey, Dampening>,
    plugins: BTreeMap<String, ActionPlugin>,
    actions: BTreeMap<ActionKey, Action>,
}

/// Map-backed definitions store. Serves as the single-node backend and the
/// test substrate; all reads hand out clones so callers never observe a
/// partially applied mutation.
#[derive(Default)]
pub struct InMemoryDefinitionsStore {
    inner: RwLock<DefinitionsInner>,
}

impl InMemoryDefinitionsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn trigger_key(tenant_id: &str, trigger_id: &str) -> TriggerKey {
    (tenant_id.to_string(), trigger_id.to_string())
}

fn mode_key(tenant_id: &str, trigger_id: &str, mode: TriggerMode) -> ModeKey {
    (tenant_id.to_string(), trigger_id.to_string(), mode)
}

impl DefinitionsStore for InMemoryDefinitionsStore {
    fn create_trigger(&self, trigger: Trigger) -> Result<()> {
        let key = trigger_key(&trigger.tenant_id, &trigger.id);
        let mut inner = self.inner.write().unwrap();
        if inner.triggers.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("{}/{}", key.0, key.1)));
        }
        inner.triggers.insert(key, trigger);
        Ok(())
    }

    fn save_trigger(&self, trigger: Trigger) -> Result<()> {
        let key = trigger_key(&trigger.tenant_id, &trigger.id);
        let mut inner = self.inner.write().unwrap();
        if !inner.triggers.contains_key(&key) {
            return Err(StoreError::Missing(format!("{}/{}", key.0, key.1)));
        }
        inner.triggers.insert(key, trigger);
        Ok(())
    }

    fn delete_trigger(&self, tenant_id: &str, trigger_id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .triggers
            .remove(&trigger_key(tenant_id, trigger_id))
            .map(|_| ())
            .ok_or_else(|| StoreError::Missing(format!("{tenant_id}/{trigger_id}")))
    }

    fn trigger(&self, tenant_id: &str, trigger_id: &str) -> Result<Option<Trigger>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.triggers.get(&trigger_key(tenant_id, trigger_id)).cloned())
    }

    fn triggers(&self, tenant_id: &str) -> Result<Vec<Trigger>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .triggers
            .values()
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn all_triggers(&self, _timeout: Duration) -> Result<Vec<Trigger>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.triggers.values().cloned().collect())
    }

    fn all_triggers_by_tag(
        &self,
        _timeout: Duration,
        name: &str,
        value: &str,
    ) -> Result<Vec<Trigger>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .triggers
            .values()
            .filter(|t| t.tags.get(name).map(String::as_str) == Some(value))
            .cloned()
            .collect())
    }

    fn set_conditions(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: TriggerMode,
        conditions: Vec<Condition>,
    ) -> Result<()> {
        let key = mode_key(tenant_id, trigger_id, trigger_mode);
        let mut inner = self.inner.write().unwrap();
        if conditions.is_empty() {
            inner.conditions.remove(&key);
        } else {
            inner.conditions.insert(key, conditions);
        }
        Ok(())
    }

    fn conditions(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: Option<TriggerMode>,
    ) -> Result<Vec<Condition>> {
        let inner = self.inner.read().unwrap();
        let modes = match trigger_mode {
            Some(mode) => vec![mode],
            None => vec![TriggerMode::Firing, TriggerMode::Autoresolve],
        };
        let mut out = Vec::new();
        for mode in modes {
            if let Some(set) = inner.conditions.get(&mode_key(tenant_id, trigger_id, mode)) {
                out.extend(set.iter().cloned());
            }
        }
        Ok(out)
    }

    fn tenant_conditions(&self, tenant_id: &str) -> Result<Vec<Condition>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .conditions
            .iter()
            .filter(|((tenant, _, _), _)| tenant == tenant_id)
            .flat_map(|(_, set)| set.iter().cloned())
            .collect())
    }

    fn all_conditions(&self, _timeout: Duration) -> Result<Vec<Condition>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .conditions
            .values()
            .flat_map(|set| set.iter().cloned())
            .collect())
    }

    fn delete_conditions(&self, tenant_id: &str, trigger_id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .conditions
            .remove(&mode_key(tenant_id, trigger_id, TriggerMode::Firing));
        inner
            .conditions
            .remove(&mode_key(tenant_id, trigger_id, TriggerMode::Autoresolve));
        Ok(())
    }

    fn create_dampening(&self, dampening: Dampening) -> Result<()> {
        let key = mode_key(
            &dampening.tenant_id,
            &dampening.trigger_id,
            dampening.trigger_mode,
        );
        let mut inner = self.inner.write().unwrap();
        if inner.dampenings.contains_key(&key) {
            return Err(StoreError::Duplicate(format!(
                "{}/{}",
                key.0,
                dampening.dampening_id()
            )));
        }
        inner.dampenings.insert(key, dampening);
        Ok(())
    }

    fn save_dampening(&self, dampening: Dampening) -> Result<()> {
        let key = mode_key(
            &dampening.tenant_id,
            &dampening.trigger_id,
            dampening.trigger_mode,
        );
        let mut inner = self.inner.write().unwrap();
        if !inner.dampenings.contains_key(&key) {
            return Err(StoreError::Missing(format!(
                "{}/{}",
                key.0,
                dampening.dampening_id()
            )));
        }
        inner.dampenings.insert(key, dampening);
        Ok(())
    }

    fn delete_dampening(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: TriggerMode,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .dampenings
            .remove(&mode_key(tenant_id, trigger_id, trigger_mode))
            .map(|_| ())
            .ok_or_else(|| {
                StoreError::Missing(format!("{tenant_id}/{trigger_id}-{trigger_mode}"))
            })
    }

    fn delete_dampenings(&self, tenant_id: &str, trigger_id: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .dampenings
            .remove(&mode_key(tenant_id, trigger_id, TriggerMode::Firing));
        inner
            .dampenings
            .remove(&mode_key(tenant_id, trigger_id, TriggerMode::Autoresolve));
        Ok(())
    }

    fn dampening(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: TriggerMode,
    ) -> Result<Option<Dampening>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .dampenings
            .get(&mode_key(tenant_id, trigger_id, trigger_mode))
            .cloned())
    }

    fn trigger_dampenings(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: Option<TriggerMode>,
    ) -> Result<Vec<Dampening>> {
        let inner = self.inner.read().unwrap();
        let modes = match trigger_mode {
            Some(mode) => vec![mode],
            None => vec![TriggerMode::Firing, TriggerMode::Autoresolve],
        };
        Ok(modes
            .into_iter()
            .filter_map(|mode| {
                inner
                    .dampenings
                    .get(&mode_key(tenant_id, trigger_id, mode))
                    .cloned()
            })
            .collect())
    }

    fn dampenings(&self, tenant_id: &str) -> Result<Vec<Dampening>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .dampenings
            .iter()
            .filter(|((tenant, _, _), _)| tenant == tenant_id)
            .map(|(_, d)| d.clone())
            .collect())
    }

    fn all_dampenings(&self, _timeout: Duration) -> Result<Vec<Dampening>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.dampenings.values().cloned().collect())
    }

    fn create_action_plugin(&self, plugin: ActionPlugin) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if inner.plugins.contains_key(&plugin.name) {
            return Err(StoreError::Duplicate(plugin.name));
        }
        inner.plugins.insert(plugin.name.clone(), plugin);
        Ok(())
    }

    fn save_action_plugin(&self, plugin: ActionPlugin) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        if !inner.plugins.contains_key(&plugin.name) {
            return Err(StoreError::Missing(plugin.name));
        }
        inner.plugins.insert(plugin.name.clone(), plugin);
        Ok(())
    }

    fn delete_action_plugin(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        inner
            .plugins
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::Missing(name.to_string()))
    }

    fn action_plugin(&self, name: &str) -> Result<Option<ActionPlugin>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.plugins.get(name).cloned())
    }

    fn action_plugins(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.plugins.keys().cloned().collect())
    }

    fn create_action(&self, action: Action) -> Result<()> {
        let key = (
            action.tenant_id.clone(),
            action.action_plugin.clone(),
            action.action_id.clone(),
        );
        let mut inner = self.inner.write().unwrap();
        if inner.actions.contains_key(&key) {
            return Err(StoreError::Duplicate(format!(
                "{}/{}/{}",
                key.0, key.1, key.2
            )));
        }
        inner.actions.insert(key, action);
        Ok(())
    }

    fn save_action(&self, action: Action) -> Result<()> {
        let key = (
            action.tenant_id.clone(),
            action.action_plugin.clone(),
            action.action_id.clone(),
        );
        let mut inner = self.inner.write().unwrap();
        if !inner.actions.contains_key(&key) {
            return Err(StoreError::Missing(format!(
                "{}/{}/{}",
                key.0, key.1, key.2
            )));
        }
        inner.actions.insert(key, action);
        Ok(())
    }

    fn delete_action(&self, tenant_id: &str, action_plugin: &str, action_id: &str) -> Result<()> {
        let key = (
            tenant_id.to_string(),
            action_plugin.to_string(),
            action_id.to_string(),
        );
        let mut inner = self.inner.write().unwrap();
        inner
            .actions
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| StoreError::Missing(format!("{tenant_id}/{action_plugin}/{action_id}")))
    }

    fn action(
        &self,
        tenant_id: &str,
        action_plugin: &str,
        action_id: &str,
    ) -> Result<Option<Action>> {
        let inner = self.inner.read().unwrap();
        let key = (
            tenant_id.to_string(),
            action_plugin.to_string(),
            action_id.to_string(),
        );
        Ok(inner.actions.get(&key).cloned())
    }

    fn actions(&self, tenant_id: &str) -> Result<Vec<Action>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .actions
            .iter()
            .filter(|((tenant, _, _), _)| tenant == tenant_id)
            .map(|(_, a)| a.clone())
            .collect())
    }

    fn all_actions(&self, _timeout: Duration) -> Result<Vec<Action>> {
        let inner = self.inner.read().unwrap();
        Ok(inner.actions.values().cloned().collect())
    }
}

/// Map-backed alerts store keyed by `(tenant, alert id)`.
#[derive(Default)]
pub struct InMemoryAlertsStore {
    alerts: RwLock<BTreeMap<(String, Uuid), Alert>>,
}

impl InMemoryAlertsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AlertsStore for InMemoryAlertsStore {
    fn add_alert(&self, alert: Alert) -> Result<()> {
        let key = (alert.tenant_id.clone(), alert.alert_id);
        let mut alerts = self.alerts.write().unwrap();
        if alerts.contains_key(&key) {
            return Err(StoreError::Duplicate(format!("{}/{}", key.0, key.1)));
        }
        alerts.insert(key, alert);
        Ok(())
    }

    fn update_alert(&self, alert: Alert) -> Result<()> {
        let key = (alert.tenant_id.clone(), alert.alert_id);
        let mut alerts = self.alerts.write().unwrap();
        if !alerts.contains_key(&key) {
            return Err(StoreError::Missing(format!("{}/{}", key.0, key.1)));
        }
        alerts.insert(key, alert);
        Ok(())
    }

    fn alert(&self, tenant_id: &str, alert_id: &Uuid) -> Result<Option<Alert>> {
        let alerts = self.alerts.read().unwrap();
        Ok(alerts.get(&(tenant_id.to_string(), *alert_id)).cloned())
    }

    fn open_alerts(&self, tenant_id: &str, trigger_id: &str) -> Result<Vec<Alert>> {
        let alerts = self.alerts.read().unwrap();
        Ok(alerts
            .values()
            .filter(|a| a.tenant_id == tenant_id && a.trigger_id == trigger_id && a.is_open())
            .cloned()
            .collect())
    }

    fn tenant_alerts(&self, tenant_id: &str) -> Result<Vec<Alert>> {
        let alerts = self.alerts.read().unwrap();
        Ok(alerts
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
            .collect())
    }
}
