//! Working memory and the rule engine.
//!
//! The engine holds the active triggers (standalone and member, enabled) with
//! their per-mode condition sets and dampening state, plus a
//! `(tenant, dataId) -> triggers` index rebuilt on every definition load.
//! Ingested data is processed one batch at a time under a single-writer lock:
//! each datum is matched against the candidate conditions of each trigger's
//! current mode, evaluations are buffered per condition-set index, and a
//! complete tuple advances the trigger's dampening. A satisfied dampening
//! mints an alert, dispatches bound actions, and drives the
//! auto-disable/auto-resolve lifecycle. The batch is retracted at the end of
//! the tick, so no sample is ever evaluated twice.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use vigil_common::{
    ActionRequest, ActionSink, Alert, AlertLifecycle, Condition, ConditionEval, Dampening, Data,
    DataValue, MatchPolicy, Trigger, TriggerMode,
};
use vigil_storage::{AlertsStore, DefinitionsStore, StoreError};

use crate::matcher::{self, ExternalMatcher, ExternalMatchers};

/// (tenant id, trigger id)
pub type TriggerKey = (String, String);

/// Default bound on cross-tenant scans during engine startup.
pub const ADMIN_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-mode runtime state of one active trigger.
struct ModeRuntime {
    conditions: Vec<Condition>,
    dampening: Dampening,
    /// Latest evaluation per condition-set index; flushed when complete.
    partial: BTreeMap<usize, ConditionEval>,
}

impl ModeRuntime {
    fn new(conditions: Vec<Condition>, mut dampening: Dampening) -> Self {
        dampening.reset();
        ModeRuntime {
            conditions,
            dampening,
            partial: BTreeMap::new(),
        }
    }

    fn reset(&mut self) {
        self.dampening.reset();
        self.partial.clear();
    }
}

struct ActiveTrigger {
    trigger: Trigger,
    firing: ModeRuntime,
    autoresolve: ModeRuntime,
}

impl ActiveTrigger {
    fn runtime_mut(&mut self, mode: TriggerMode) -> &mut ModeRuntime {
        match mode {
            TriggerMode::Firing => &mut self.firing,
            TriggerMode::Autoresolve => &mut self.autoresolve,
        }
    }
}

#[derive(Default)]
struct WorkingMemory {
    triggers: HashMap<TriggerKey, ActiveTrigger>,
    /// (tenant, dataId) -> triggers holding a condition over that stream, in
    /// either mode (COMPARE right-hand streams included).
    data_index: HashMap<(String, String), BTreeSet<TriggerKey>>,
    pending: Vec<Data>,
    dropped_data: u64,
}

/// The process-wide evaluation engine.
pub struct AlertEngine {
    definitions: Arc<dyn DefinitionsStore>,
    alerts: Arc<dyn AlertsStore>,
    actions: Arc<dyn ActionSink>,
    externals: RwLock<ExternalMatchers>,
    memory: Mutex<WorkingMemory>,
    admin_timeout: Duration,
}

impl AlertEngine {
    pub fn new(
        definitions: Arc<dyn DefinitionsStore>,
        alerts: Arc<dyn AlertsStore>,
        actions: Arc<dyn ActionSink>,
    ) -> Self {
        AlertEngine {
            definitions,
            alerts,
            actions,
            externals: RwLock::new(HashMap::new()),
            memory: Mutex::new(WorkingMemory::default()),
            admin_timeout: ADMIN_FETCH_TIMEOUT,
        }
    }

    pub fn with_admin_timeout(mut self, timeout: Duration) -> Self {
        self.admin_timeout = timeout;
        self
    }

    /// Registers the external system answering EXTERNAL conditions carrying
    /// this `system_id`.
    pub fn register_external_matcher(&self, system_id: &str, matcher: Arc<dyn ExternalMatcher>) {
        self.externals
            .write()
            .unwrap()
            .insert(system_id.to_string(), matcher);
    }

    /// Loads every evaluable trigger from the definitions store. Returns the
    /// number of triggers now in working memory.
    pub fn initialize(&self) -> Result<usize, StoreError> {
        let triggers = self.definitions.all_triggers(self.admin_timeout)?;
        let mut mem = self.memory.lock().unwrap();
        mem.triggers.clear();
        for trigger in triggers {
            if trigger.is_loadable() {
                self.load_into(&mut mem, &trigger.tenant_id, &trigger.id)?;
            }
        }
        rebuild_index(&mut mem);
        let count = mem.triggers.len();
        tracing::info!(triggers = count, "Alert engine initialized");
        Ok(count)
    }

    pub fn shutdown(&self) {
        let mut mem = self.memory.lock().unwrap();
        mem.triggers.clear();
        mem.data_index.clear();
        mem.pending.clear();
        tracing::info!("Alert engine shut down");
    }

    /// Loads a newly created trigger into working memory (no-op for group or
    /// disabled triggers).
    pub fn add_trigger(&self, tenant_id: &str, trigger_id: &str) -> Result<(), StoreError> {
        let mut mem = self.memory.lock().unwrap();
        self.load_into(&mut mem, tenant_id, trigger_id)?;
        rebuild_index(&mut mem);
        Ok(())
    }

    /// Atomically swaps the trigger's definition in working memory. Dampening
    /// state restarts from scratch; a definition edit invalidates any partial
    /// progress.
    pub fn reload_trigger(&self, tenant_id: &str, trigger_id: &str) -> Result<(), StoreError> {
        let mut mem = self.memory.lock().unwrap();
        mem.triggers
            .remove(&(tenant_id.to_string(), trigger_id.to_string()));
        self.load_into(&mut mem, tenant_id, trigger_id)?;
        rebuild_index(&mut mem);
        Ok(())
    }

    pub fn remove_trigger(&self, tenant_id: &str, trigger_id: &str) {
        let mut mem = self.memory.lock().unwrap();
        mem.triggers
            .remove(&(tenant_id.to_string(), trigger_id.to_string()));
        rebuild_index(&mut mem);
    }

    /// Number of triggers currently evaluable.
    pub fn active_triggers(&self) -> usize {
        self.memory.lock().unwrap().triggers.len()
    }

    /// Count of ingested samples dropped because no enabled trigger holds a
    /// condition over their dataId.
    pub fn dropped_data(&self) -> u64 {
        self.memory.lock().unwrap().dropped_data
    }

    /// Ingests one batch of data for a tenant and runs an evaluation tick.
    /// Relative order within a dataId is preserved; returns the alerts fired
    /// by this batch.
    ///
    /// The embedded tenant of each datum is overwritten with the caller's
    /// tenant; the service edge is the trust boundary.
    pub fn ingest(&self, tenant_id: &str, mut batch: Vec<Data>) -> Vec<Alert> {
        for datum in &mut batch {
            if datum.tenant_id != tenant_id {
                datum.tenant_id = tenant_id.to_string();
            }
        }
        let mut mem = self.memory.lock().unwrap();
        mem.pending.append(&mut batch);
        self.tick(&mut mem)
    }

    fn tick(&self, mem: &mut WorkingMemory) -> Vec<Alert> {
        let mut batch = std::mem::take(&mut mem.pending);
        if batch.is_empty() {
            return Vec::new();
        }
        // Stable sort: per-dataId arrival order survives equal timestamps.
        batch.sort_by_key(|d| d.timestamp);

        // Latest value per stream in this batch, the right-hand operand pool
        // for COMPARE conditions.
        let mut latest: HashMap<(String, String), DataValue> = HashMap::new();
        for datum in &batch {
            latest.insert(
                (datum.tenant_id.clone(), datum.data_id.clone()),
                datum.value.clone(),
            );
        }

        let externals = self.externals.read().unwrap();
        let mut fired = Vec::new();

        for datum in &batch {
            let index_key = (datum.tenant_id.clone(), datum.data_id.clone());
            let Some(candidates) = mem.data_index.get(&index_key).cloned() else {
                mem.dropped_data += 1;
                tracing::trace!(
                    tenant_id = %datum.tenant_id,
                    data_id = %datum.data_id,
                    "No condition consumes dataId, dropping datum"
                );
                continue;
            };

            for trigger_key in candidates {
                let Some(active) = mem.triggers.get_mut(&trigger_key) else {
                    continue;
                };
                if !active.trigger.enabled {
                    continue;
                }

                let mode = active.trigger.mode;
                let policy = active.trigger.match_policy(mode);
                let runtime = active.runtime_mut(mode);

                for condition in &runtime.conditions {
                    if condition.data_id() != datum.data_id {
                        continue;
                    }
                    let value2 = condition.data2_id().and_then(|d2| {
                        latest
                            .get(&(datum.tenant_id.clone(), d2.to_string()))
                            .cloned()
                    });
                    if let Some(matched) =
                        matcher::evaluate(condition, datum, value2.as_ref(), &externals)
                    {
                        let eval = ConditionEval::new(
                            condition,
                            datum.value.clone(),
                            value2,
                            datum.timestamp,
                            matched,
                        );
                        tracing::trace!(eval = %eval.log_line(), "Condition evaluated");
                        runtime.partial.insert(condition.condition_set_index, eval);
                    }
                }

                let complete = !runtime.conditions.is_empty()
                    && runtime.partial.len() == runtime.conditions.len();
                if !complete {
                    continue;
                }

                // Complete tuple: consume the buffered evaluations and step
                // the dampening state machine on the tuple timestamp.
                let tuple: Vec<ConditionEval> =
                    std::mem::take(&mut runtime.partial).into_values().collect();
                let true_eval = match policy {
                    MatchPolicy::All => tuple.iter().all(|e| e.matched),
                    MatchPolicy::Any => tuple.iter().any(|e| e.matched),
                };
                let now = tuple
                    .iter()
                    .map(|e| e.timestamp)
                    .max()
                    .unwrap_or(datum.timestamp);
                runtime.dampening.perform(true_eval, tuple, now);
                tracing::trace!(dampening = %runtime.dampening.log_line(), "Dampening advanced");

                if runtime.dampening.satisfied {
                    if let Some(alert) = self.on_dampening_satisfied(active, mode) {
                        fired.push(alert);
                    }
                }
            }
        }

        // The batch is fully consumed here; nothing carries into the next
        // tick and no sample is evaluated twice.
        fired
    }

    fn on_dampening_satisfied(&self, active: &mut ActiveTrigger, mode: TriggerMode) -> Option<Alert> {
        match mode {
            TriggerMode::Firing => {
                let (snapshot, eval_sets) = {
                    let runtime = active.runtime_mut(mode);
                    let snapshot = runtime.dampening.clone();
                    let eval_sets = runtime.dampening.take_satisfying_evals();
                    (snapshot, eval_sets)
                };

                let alert = Alert::new(&active.trigger, &snapshot, eval_sets, Utc::now());
                tracing::info!(
                    tenant_id = %alert.tenant_id,
                    trigger_id = %alert.trigger_id,
                    alert_id = %alert.alert_id,
                    severity = %alert.severity,
                    "Alert fired"
                );
                if let Err(e) = self.alerts.add_alert(alert.clone()) {
                    tracing::error!(
                        tenant_id = %alert.tenant_id,
                        trigger_id = %alert.trigger_id,
                        error = %e,
                        "Failed to persist alert"
                    );
                }

                for (plugin, action_ids) in &active.trigger.actions {
                    for action_id in action_ids {
                        self.actions.dispatch(ActionRequest {
                            tenant_id: alert.tenant_id.clone(),
                            action_plugin: plugin.clone(),
                            action_id: action_id.clone(),
                            alert: alert.clone(),
                        });
                    }
                }

                if active.trigger.auto_disable {
                    active.trigger.enabled = false;
                    if let Err(e) = self.definitions.save_trigger(active.trigger.clone()) {
                        tracing::error!(
                            tenant_id = %alert.tenant_id,
                            trigger_id = %alert.trigger_id,
                            error = %e,
                            "Failed to persist auto-disable"
                        );
                    }
                    tracing::info!(
                        tenant_id = %alert.tenant_id,
                        trigger_id = %alert.trigger_id,
                        "Trigger auto-disabled"
                    );
                }

                if active.trigger.auto_resolve {
                    active.trigger.mode = TriggerMode::Autoresolve;
                    active.firing.reset();
                    active.autoresolve.reset();
                    tracing::debug!(
                        tenant_id = %alert.tenant_id,
                        trigger_id = %alert.trigger_id,
                        "Trigger switched to autoresolve mode"
                    );
                }

                Some(alert)
            }

            TriggerMode::Autoresolve => {
                let tenant_id = active.trigger.tenant_id.clone();
                let trigger_id = active.trigger.id.clone();

                if active.trigger.auto_resolve_alerts {
                    match self.alerts.open_alerts(&tenant_id, &trigger_id) {
                        Ok(open) => {
                            for mut alert in open {
                                alert.resolve(
                                    AlertLifecycle::AutoResolved,
                                    "AUTO",
                                    None,
                                    Utc::now(),
                                );
                                if let Err(e) = self.alerts.update_alert(alert) {
                                    tracing::error!(
                                        tenant_id = %tenant_id,
                                        trigger_id = %trigger_id,
                                        error = %e,
                                        "Failed to auto-resolve alert"
                                    );
                                }
                            }
                        }
                        Err(e) => {
                            tracing::error!(
                                tenant_id = %tenant_id,
                                trigger_id = %trigger_id,
                                error = %e,
                                "Failed to fetch open alerts for auto-resolve"
                            );
                        }
                    }
                }

                active.trigger.mode = TriggerMode::Firing;
                active.firing.reset();
                active.autoresolve.reset();
                tracing::info!(
                    tenant_id = %tenant_id,
                    trigger_id = %trigger_id,
                    "Trigger auto-resolved, back to firing mode"
                );
                None
            }
        }
    }

    /// Marks the given open alerts acknowledged. Returns how many changed.
    pub fn acknowledge_alerts(
        &self,
        tenant_id: &str,
        alert_ids: &[Uuid],
        by: &str,
        notes: Option<String>,
    ) -> Result<usize, StoreError> {
        let mut changed = 0;
        for alert_id in alert_ids {
            let Some(mut alert) = self.alerts.alert(tenant_id, alert_id)? else {
                continue;
            };
            if alert.lifecycle != AlertLifecycle::Open {
                continue;
            }
            alert.acknowledge(by, notes.clone(), Utc::now());
            self.alerts.update_alert(alert)?;
            changed += 1;
        }
        Ok(changed)
    }

    /// Resolves every open alert of one trigger. A disabled trigger with
    /// `auto_enable` comes back into rotation once its open alerts are gone.
    pub fn resolve_alerts(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        by: &str,
        notes: Option<String>,
    ) -> Result<usize, StoreError> {
        let open = self.alerts.open_alerts(tenant_id, trigger_id)?;
        let resolved = open.len();
        for mut alert in open {
            alert.resolve(AlertLifecycle::Resolved, by, notes.clone(), Utc::now());
            self.alerts.update_alert(alert)?;
        }

        if resolved > 0 {
            self.apply_auto_enable(tenant_id, trigger_id)?;
        }
        Ok(resolved)
    }

    fn apply_auto_enable(&self, tenant_id: &str, trigger_id: &str) -> Result<(), StoreError> {
        let Some(mut trigger) = self.definitions.trigger(tenant_id, trigger_id)? else {
            return Ok(());
        };
        if trigger.enabled || !trigger.auto_enable {
            return Ok(());
        }
        trigger.enabled = true;
        self.definitions.save_trigger(trigger)?;
        tracing::info!(
            tenant_id = %tenant_id,
            trigger_id = %trigger_id,
            "Trigger auto-enabled after alert resolution"
        );

        let mut mem = self.memory.lock().unwrap();
        mem.triggers
            .remove(&(tenant_id.to_string(), trigger_id.to_string()));
        self.load_into(&mut mem, tenant_id, trigger_id)?;
        rebuild_index(&mut mem);
        Ok(())
    }

    /// Loads one trigger's definition, condition sets, and dampenings into
    /// working memory. Non-loadable triggers (group, disabled, removed) are
    /// evicted instead. The index is NOT rebuilt here; callers do that once
    /// per mutation.
    fn load_into(
        &self,
        mem: &mut WorkingMemory,
        tenant_id: &str,
        trigger_id: &str,
    ) -> Result<(), StoreError> {
        let key = (tenant_id.to_string(), trigger_id.to_string());
        let Some(mut trigger) = self.definitions.trigger(tenant_id, trigger_id)? else {
            mem.triggers.remove(&key);
            return Ok(());
        };
        if !trigger.is_loadable() {
            mem.triggers.remove(&key);
            return Ok(());
        }
        trigger.mode = TriggerMode::Firing;

        let conditions = self.definitions.conditions(tenant_id, trigger_id, None)?;
        let (firing, autoresolve): (Vec<Condition>, Vec<Condition>) = conditions
            .into_iter()
            .partition(|c| c.trigger_mode == TriggerMode::Firing);

        let firing_dampening = self
            .definitions
            .dampening(tenant_id, trigger_id, TriggerMode::Firing)?
            .unwrap_or_else(|| {
                Dampening::default_for(tenant_id, trigger_id, TriggerMode::Firing)
            });
        let autoresolve_dampening = self
            .definitions
            .dampening(tenant_id, trigger_id, TriggerMode::Autoresolve)?
            .unwrap_or_else(|| {
                Dampening::default_for(tenant_id, trigger_id, TriggerMode::Autoresolve)
            });

        tracing::debug!(
            tenant_id = %tenant_id,
            trigger_id = %trigger_id,
            firing_conditions = firing.len(),
            autoresolve_conditions = autoresolve.len(),
            "Trigger loaded into working memory"
        );

        mem.triggers.insert(
            key,
            ActiveTrigger {
                trigger,
                firing: ModeRuntime::new(firing, firing_dampening),
                autoresolve: ModeRuntime::new(autoresolve, autoresolve_dampening),
            },
        );
        Ok(())
    }
}

fn rebuild_index(mem: &mut WorkingMemory) {
    let mut index: HashMap<(String, String), BTreeSet<TriggerKey>> = HashMap::new();
    for (key, active) in &mem.triggers {
        for runtime in [&active.firing, &active.autoresolve] {
            for condition in &runtime.conditions {
                index
                    .entry((condition.tenant_id.clone(), condition.data_id().to_string()))
                    .or_default()
                    .insert(key.clone());
                if let Some(data2_id) = condition.data2_id() {
                    index
                        .entry((condition.tenant_id.clone(), data2_id.to_string()))
                        .or_default()
                        .insert(key.clone());
                }
            }
        }
    }
    mem.data_index = index;
}
