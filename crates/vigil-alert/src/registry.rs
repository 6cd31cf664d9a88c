//! The definitions registry: the mutation surface for triggers, conditions,
//! dampenings, action plugins, and actions.
//!
//! Every operation validates first and writes second, so a rejected call
//! leaves the store untouched and notifies nobody. Group triggers are
//! templates: edits propagate to every non-orphan member, all-or-nothing per
//! operation, with dataId tokens substituted per member. After a successful
//! mutation the registry reloads the affected triggers in the engine and
//! notifies registered listeners synchronously, in registration order.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use vigil_common::condition::set_coordinates;
use vigil_common::{
    Action, ActionPlugin, Condition, ConditionKind, Dampening, DefinitionsEvent,
    DefinitionsEventType, DefinitionsListener, Trigger, TriggerMode,
};
use vigil_storage::{import_init_data, DefinitionsStore, StoreError};

use crate::config::EngineConfig;
use crate::engine::AlertEngine;
use crate::error::{DefinitionsError, DefinitionsResult};

/// Handle returned by [`DefinitionsRegistry::register_listener`]; passing it
/// back unregisters exactly that registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct ListenerEntry {
    id: ListenerId,
    types: HashSet<DefinitionsEventType>,
    listener: Arc<dyn DefinitionsListener>,
}

pub struct DefinitionsRegistry {
    store: Arc<dyn DefinitionsStore>,
    engine: RwLock<Option<Arc<AlertEngine>>>,
    listeners: Mutex<Vec<ListenerEntry>>,
    listener_seq: AtomicU64,
    initialized: AtomicBool,
    admin_timeout: RwLock<Duration>,
}

impl DefinitionsRegistry {
    pub fn new(store: Arc<dyn DefinitionsStore>) -> Self {
        DefinitionsRegistry {
            store,
            engine: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
            listener_seq: AtomicU64::new(0),
            initialized: AtomicBool::new(false),
            admin_timeout: RwLock::new(crate::engine::ADMIN_FETCH_TIMEOUT),
        }
    }

    pub fn set_engine(&self, engine: Arc<AlertEngine>) {
        *self.engine.write().unwrap() = Some(engine);
    }

    fn admin_timeout(&self) -> Duration {
        *self.admin_timeout.read().unwrap()
    }

    /// Runs the bootstrap import (unless suppressed), marks the registry
    /// initialized, and loads the engine's working memory.
    pub fn init(&self, config: &EngineConfig) -> DefinitionsResult<()> {
        *self.admin_timeout.write().unwrap() = config.admin_fetch_timeout();
        if !config.skip_init_data {
            if let Some(dir) = &config.data_dir {
                self.import_init_data(dir)?;
            }
        }
        self.initialized.store(true, Ordering::SeqCst);

        if let Some(engine) = self.engine() {
            engine.initialize()?;
        }
        tracing::info!(keyspace = %config.keyspace, "Definitions registry initialized");
        Ok(())
    }

    fn import_init_data(&self, dir: &Path) -> DefinitionsResult<()> {
        let summary = import_init_data(dir, self.store.as_ref())?;
        tracing::info!(
            dir = %dir.display(),
            triggers = summary.triggers,
            "Bootstrap definitions imported"
        );
        Ok(())
    }

    pub fn shutdown(&self) {
        self.initialized.store(false, Ordering::SeqCst);
        if let Some(engine) = self.engine.write().unwrap().take() {
            engine.shutdown();
        }
        self.listeners.lock().unwrap().clear();
    }

    fn engine(&self) -> Option<Arc<AlertEngine>> {
        if !self.initialized.load(Ordering::SeqCst) {
            return None;
        }
        self.engine.read().unwrap().clone()
    }

    // ---- listeners ----

    pub fn register_listener(
        &self,
        listener: Arc<dyn DefinitionsListener>,
        types: impl IntoIterator<Item = DefinitionsEventType>,
    ) -> ListenerId {
        let id = ListenerId(self.listener_seq.fetch_add(1, Ordering::SeqCst));
        let entry = ListenerEntry {
            id,
            types: types.into_iter().collect(),
            listener,
        };
        self.listeners.lock().unwrap().push(entry);
        id
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() < before
    }

    /// Synchronous with the mutation: a slow listener blocks the mutator.
    fn notify_listeners(&self, event_type: DefinitionsEventType) {
        let event = DefinitionsEvent::new(event_type);
        let listeners = self.listeners.lock().unwrap();
        for entry in listeners.iter() {
            if entry.types.contains(&event_type) {
                tracing::debug!(event = ?event_type, "Notifying definitions listener");
                entry.listener.on_change(&event);
            }
        }
    }

    // ---- triggers ----

    pub fn add_trigger(&self, tenant_id: &str, mut trigger: Trigger) -> DefinitionsResult<Trigger> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(&trigger.id, "triggerId")?;
        check_tenant(tenant_id, &mut trigger.tenant_id);
        trigger.group = false;
        self.add_trigger_inner(trigger)
    }

    pub fn add_group_trigger(
        &self,
        tenant_id: &str,
        mut group_trigger: Trigger,
    ) -> DefinitionsResult<Trigger> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(&group_trigger.id, "triggerId")?;
        check_tenant(tenant_id, &mut group_trigger.tenant_id);
        group_trigger.group = true;
        group_trigger.member_of = None;
        group_trigger.orphan = false;
        self.add_trigger_inner(group_trigger)
    }

    fn add_trigger_inner(&self, trigger: Trigger) -> DefinitionsResult<Trigger> {
        self.store
            .create_trigger(trigger.clone())
            .map_err(illegal_on_duplicate("Trigger"))?;

        if let Some(engine) = self.engine() {
            engine.add_trigger(&trigger.tenant_id, &trigger.id)?;
        }
        self.notify_listeners(DefinitionsEventType::TriggerCreate);
        Ok(trigger)
    }

    pub fn remove_trigger(&self, tenant_id: &str, trigger_id: &str) -> DefinitionsResult<()> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(trigger_id, "triggerId")?;

        let doomed = self.get_trigger(tenant_id, trigger_id)?;
        if doomed.group {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{trigger_id}] is a group trigger and must be removed via the group operation"
            )));
        }
        if doomed.is_member() && !doomed.orphan {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{trigger_id}] is a member trigger and must be removed via the group"
            )));
        }
        self.remove_trigger_cascade(&doomed)
    }

    pub fn remove_group_trigger(
        &self,
        tenant_id: &str,
        group_id: &str,
        keep_non_orphans: bool,
        keep_orphans: bool,
    ) -> DefinitionsResult<()> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(group_id, "groupId")?;

        let doomed = self.get_trigger(tenant_id, group_id)?;
        if !doomed.group {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{group_id}] is not a group trigger"
            )));
        }

        for mut member in self.get_member_triggers(tenant_id, group_id, true)? {
            let keep = (keep_non_orphans && !member.orphan) || (keep_orphans && member.orphan);
            if keep {
                // promote to standalone
                member.member_of = None;
                member.orphan = false;
                self.update_trigger_inner(member)?;
            } else {
                self.remove_trigger_cascade(&member)?;
            }
        }

        self.remove_trigger_cascade(&doomed)
    }

    /// Cascade delete: conditions, dampenings, then the trigger row (tags and
    /// action bindings live on the trigger itself).
    fn remove_trigger_cascade(&self, trigger: &Trigger) -> DefinitionsResult<()> {
        self.store
            .delete_conditions(&trigger.tenant_id, &trigger.id)?;
        self.store
            .delete_dampenings(&trigger.tenant_id, &trigger.id)?;
        self.store.delete_trigger(&trigger.tenant_id, &trigger.id)?;

        if let Some(engine) = self.engine() {
            engine.remove_trigger(&trigger.tenant_id, &trigger.id);
        }
        self.notify_listeners(DefinitionsEventType::TriggerRemove);
        Ok(())
    }

    pub fn update_trigger(
        &self,
        tenant_id: &str,
        mut trigger: Trigger,
    ) -> DefinitionsResult<Trigger> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(&trigger.id, "triggerId")?;
        check_tenant(tenant_id, &mut trigger.tenant_id);

        let existing = self.get_trigger(tenant_id, &trigger.id)?;
        if existing.group {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{}] is a group trigger and must be updated via the group operation",
                trigger.id
            )));
        }
        if existing.is_member() && !existing.orphan {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{}] is a member trigger and must be updated via the group",
                trigger.id
            )));
        }
        if existing.member_of != trigger.member_of || existing.group != trigger.group {
            return Err(DefinitionsError::IllegalState(
                "Group membership can not be changed by update".to_string(),
            ));
        }
        if existing.orphan != trigger.orphan {
            return Err(DefinitionsError::IllegalState(
                "Orphan status can not be changed by update".to_string(),
            ));
        }

        self.update_trigger_inner(trigger)
    }

    pub fn update_group_trigger(
        &self,
        tenant_id: &str,
        mut group_trigger: Trigger,
    ) -> DefinitionsResult<Trigger> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(&group_trigger.id, "triggerId")?;
        check_tenant(tenant_id, &mut group_trigger.tenant_id);

        let existing = self.get_trigger(tenant_id, &group_trigger.id)?;
        if !existing.group {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{}] is not a group trigger",
                group_trigger.id
            )));
        }
        group_trigger.group = true;
        group_trigger.member_of = None;
        group_trigger.orphan = false;

        for mut member in self.get_member_triggers(tenant_id, &group_trigger.id, false)? {
            copy_group_trigger(&group_trigger, &mut member);
            self.update_trigger_inner(member)?;
        }

        self.update_trigger_inner(group_trigger)
    }

    fn update_trigger_inner(&self, trigger: Trigger) -> DefinitionsResult<Trigger> {
        self.store.save_trigger(trigger.clone())?;

        if let Some(engine) = self.engine() {
            engine.reload_trigger(&trigger.tenant_id, &trigger.id)?;
        }
        self.notify_listeners(DefinitionsEventType::TriggerUpdate);
        Ok(trigger)
    }

    pub fn orphan_member_trigger(
        &self,
        tenant_id: &str,
        member_id: &str,
    ) -> DefinitionsResult<Trigger> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(member_id, "memberId")?;

        let mut member = self.get_trigger(tenant_id, member_id)?;
        if !member.is_member() {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{member_id}] is not a member trigger"
            )));
        }
        if member.orphan {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{member_id}] is already an orphan"
            )));
        }
        member.orphan = true;
        self.update_trigger_inner(member)
    }

    /// Re-attaches an orphan by re-synthesizing it from the current group
    /// definition with the provided dataId map.
    pub fn unorphan_member_trigger(
        &self,
        tenant_id: &str,
        member_id: &str,
        member_context: Option<HashMap<String, String>>,
        data_id_map: HashMap<String, String>,
    ) -> DefinitionsResult<Trigger> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(member_id, "memberId")?;

        let orphan = self.get_trigger(tenant_id, member_id)?;
        if !orphan.is_member() {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{member_id}] is not a member trigger"
            )));
        }
        if !orphan.orphan {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{member_id}] is not an orphan"
            )));
        }

        let group_id = orphan.member_of.clone().unwrap_or_default();
        let member_name = orphan.name.clone();

        self.remove_trigger_cascade(&orphan)?;
        self.add_member_trigger(
            tenant_id,
            &group_id,
            Some(member_id.to_string()),
            &member_name,
            member_context,
            data_id_map,
        )
    }

    /// Instantiates a new member of a group: copies the group's attributes,
    /// conditions (with token dataIds substituted through `data_id_map`),
    /// dampenings, and tags.
    ///
    /// `data_id_map` keys must equal the exact token set referenced by the
    /// group's conditions, `data2Id` tokens included.
    pub fn add_member_trigger(
        &self,
        tenant_id: &str,
        group_id: &str,
        member_id: Option<String>,
        member_name: &str,
        member_context: Option<HashMap<String, String>>,
        data_id_map: HashMap<String, String>,
    ) -> DefinitionsResult<Trigger> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(group_id, "groupId")?;
        require_non_empty(member_name, "memberName")?;
        if data_id_map.is_empty() {
            return Err(DefinitionsError::InvalidArgument(
                "dataIdMap must be not empty".to_string(),
            ));
        }

        let group = self.get_trigger(tenant_id, group_id)?;
        if !group.group {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{group_id}] is not a group trigger"
            )));
        }

        // 1-1 mapping between the group's token set and the supplied map
        let group_conditions = self.store.conditions(tenant_id, group_id, None)?;
        let tokens = token_data_ids(&group_conditions);
        let provided: HashSet<String> = data_id_map.keys().cloned().collect();
        if tokens != provided {
            return Err(DefinitionsError::InvalidArgument(format!(
                "dataIdMap must contain the exact dataIds expected by the group conditions; expected {tokens:?}, got {provided:?}"
            )));
        }

        let member_id = member_id.unwrap_or_else(Trigger::generate_id);
        let mut member = Trigger::new(tenant_id, member_id, member_name);
        copy_group_trigger(&group, &mut member);
        member.orphan = false;
        if let Some(context) = member_context {
            member.context = context;
        }
        let member = self.add_trigger_inner(member)?;

        for mode in [TriggerMode::Firing, TriggerMode::Autoresolve] {
            let mode_conditions: Vec<Condition> = group_conditions
                .iter()
                .filter(|c| c.trigger_mode == mode)
                .map(|c| member_condition(&member, c, &data_id_map))
                .collect::<DefinitionsResult<_>>()?;
            if !mode_conditions.is_empty() {
                self.set_conditions_inner(&member, mode, mode_conditions)?;
            }
        }

        for dampening in self.store.trigger_dampenings(tenant_id, group_id, None)? {
            let mut member_dampening = dampening.clone();
            member_dampening.trigger_id = member.id.clone();
            member_dampening.tenant_id = member.tenant_id.clone();
            member_dampening.reset();
            self.add_dampening_inner(member_dampening)?;
        }

        Ok(member)
    }

    // ---- conditions ----

    /// Replaces the entire condition set of one `(trigger, mode)`, assigning
    /// contiguous indices in iteration order.
    pub fn set_conditions(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: TriggerMode,
        conditions: Vec<Condition>,
    ) -> DefinitionsResult<Vec<Condition>> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(trigger_id, "triggerId")?;
        for condition in &conditions {
            require_non_empty(condition.data_id(), "dataId")?;
        }
        let trigger = self.get_trigger(tenant_id, trigger_id)?;
        self.set_conditions_inner(&trigger, trigger_mode, conditions)
    }

    fn set_conditions_inner(
        &self,
        trigger: &Trigger,
        trigger_mode: TriggerMode,
        mut conditions: Vec<Condition>,
    ) -> DefinitionsResult<Vec<Condition>> {
        set_coordinates(&mut conditions, &trigger.tenant_id, &trigger.id, trigger_mode);
        self.store.set_conditions(
            &trigger.tenant_id,
            &trigger.id,
            trigger_mode,
            conditions.clone(),
        )?;

        if let Some(engine) = self.engine() {
            engine.reload_trigger(&trigger.tenant_id, &trigger.id)?;
        }
        self.notify_listeners(DefinitionsEventType::ConditionChange);
        Ok(conditions)
    }

    /// Appends one condition to the mode's set, rebuilding the whole set so
    /// sizes and indices stay contiguous.
    pub fn add_condition(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: TriggerMode,
        condition: Condition,
    ) -> DefinitionsResult<Vec<Condition>> {
        let mut set = self
            .store
            .conditions(tenant_id, trigger_id, Some(trigger_mode))?;
        set.push(condition);
        self.set_conditions(tenant_id, trigger_id, trigger_mode, set)
    }

    /// Replaces the condition at `condition_set_index` (1-based).
    pub fn update_condition(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: TriggerMode,
        condition_set_index: usize,
        condition: Condition,
    ) -> DefinitionsResult<Vec<Condition>> {
        let mut set = self
            .store
            .conditions(tenant_id, trigger_id, Some(trigger_mode))?;
        if condition_set_index == 0 || condition_set_index > set.len() {
            return Err(DefinitionsError::not_found(
                "Condition",
                tenant_id,
                &format!("{trigger_id}-{trigger_mode}-{condition_set_index}"),
            ));
        }
        set[condition_set_index - 1] = condition;
        self.set_conditions(tenant_id, trigger_id, trigger_mode, set)
    }

    /// Removes the condition at `condition_set_index` (1-based); the rest of
    /// the set is re-indexed.
    pub fn remove_condition(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: TriggerMode,
        condition_set_index: usize,
    ) -> DefinitionsResult<Vec<Condition>> {
        let mut set = self
            .store
            .conditions(tenant_id, trigger_id, Some(trigger_mode))?;
        if condition_set_index == 0 || condition_set_index > set.len() {
            return Err(DefinitionsError::not_found(
                "Condition",
                tenant_id,
                &format!("{trigger_id}-{trigger_mode}-{condition_set_index}"),
            ));
        }
        set.remove(condition_set_index - 1);
        self.set_conditions(tenant_id, trigger_id, trigger_mode, set)
    }

    /// Replaces the group's condition set and rewrites it onto every
    /// non-orphan member, substituting token dataIds via `data_id_member_map`
    /// (`token -> member id -> member dataId`). All-or-nothing: validation of
    /// the whole map precedes the first write.
    pub fn set_group_conditions(
        &self,
        tenant_id: &str,
        group_id: &str,
        trigger_mode: TriggerMode,
        group_conditions: Vec<Condition>,
        data_id_member_map: &HashMap<String, HashMap<String, String>>,
    ) -> DefinitionsResult<Vec<Condition>> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(group_id, "groupId")?;

        let group = self.get_trigger(tenant_id, group_id)?;
        if !group.group {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{group_id}] is not a group trigger"
            )));
        }

        let members = self.get_member_triggers(tenant_id, group_id, false)?;

        // The map may be empty only when there is nothing to propagate to.
        if !members.is_empty() {
            for condition in &group_conditions {
                let mut required = vec![condition.data_id()];
                if let Some(data2_id) = condition.data2_id() {
                    required.push(data2_id);
                }
                for token in required {
                    let Some(member_map) = data_id_member_map.get(token) else {
                        return Err(DefinitionsError::InvalidArgument(format!(
                            "Missing dataIdMemberMap entry for dataId token [{token}]"
                        )));
                    };
                    if member_map.len() != members.len() {
                        return Err(DefinitionsError::InvalidArgument(format!(
                            "memberMap size [{}] for dataId [{token}] must equal the number of member triggers [{}]",
                            member_map.len(),
                            members.len()
                        )));
                    }
                    for member in &members {
                        match member_map.get(&member.id) {
                            Some(value) if !value.trim().is_empty() => {}
                            _ => {
                                return Err(DefinitionsError::InvalidArgument(format!(
                                    "Invalid mapping for dataId [{token}], member [{}]",
                                    member.id
                                )));
                            }
                        }
                    }
                }
            }
        }

        for member in &members {
            let data_id_map: HashMap<String, String> = data_id_member_map
                .iter()
                .filter_map(|(token, member_map)| {
                    member_map
                        .get(&member.id)
                        .map(|data_id| (token.clone(), data_id.clone()))
                })
                .collect();

            let member_conditions: Vec<Condition> = group_conditions
                .iter()
                .map(|c| member_condition(member, c, &data_id_map))
                .collect::<DefinitionsResult<_>>()?;
            self.set_conditions_inner(member, trigger_mode, member_conditions)?;
        }

        // the group itself keeps the token-bearing conditions
        self.set_conditions_inner(&group, trigger_mode, group_conditions)
    }

    pub fn get_trigger_conditions(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: Option<TriggerMode>,
    ) -> DefinitionsResult<Vec<Condition>> {
        Ok(self.store.conditions(tenant_id, trigger_id, trigger_mode)?)
    }

    pub fn get_conditions(&self, tenant_id: &str) -> DefinitionsResult<Vec<Condition>> {
        Ok(self.store.tenant_conditions(tenant_id)?)
    }

    /// Cross-tenant admin fetch.
    pub fn get_all_conditions(&self) -> DefinitionsResult<Vec<Condition>> {
        Ok(self.store.all_conditions(self.admin_timeout())?)
    }

    // ---- dampenings ----

    pub fn add_dampening(
        &self,
        tenant_id: &str,
        mut dampening: Dampening,
    ) -> DefinitionsResult<Dampening> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(&dampening.trigger_id, "triggerId")?;
        check_tenant(tenant_id, &mut dampening.tenant_id);
        self.get_trigger(tenant_id, &dampening.trigger_id)?;
        self.add_dampening_inner(dampening)
    }

    fn add_dampening_inner(&self, mut dampening: Dampening) -> DefinitionsResult<Dampening> {
        dampening.reset();
        self.store
            .create_dampening(dampening.clone())
            .map_err(illegal_on_duplicate("Dampening"))?;

        if let Some(engine) = self.engine() {
            engine.reload_trigger(&dampening.tenant_id, &dampening.trigger_id)?;
        }
        self.notify_listeners(DefinitionsEventType::DampeningChange);
        Ok(dampening)
    }

    pub fn update_dampening(
        &self,
        tenant_id: &str,
        mut dampening: Dampening,
    ) -> DefinitionsResult<Dampening> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(&dampening.trigger_id, "triggerId")?;
        check_tenant(tenant_id, &mut dampening.tenant_id);
        self.update_dampening_inner(dampening)
    }

    fn update_dampening_inner(&self, mut dampening: Dampening) -> DefinitionsResult<Dampening> {
        dampening.reset();
        self.store.save_dampening(dampening.clone()).map_err(|e| {
            not_found_on_missing(e, "Dampening", &dampening.tenant_id, &dampening.dampening_id())
        })?;

        if let Some(engine) = self.engine() {
            engine.reload_trigger(&dampening.tenant_id, &dampening.trigger_id)?;
        }
        self.notify_listeners(DefinitionsEventType::DampeningChange);
        Ok(dampening)
    }

    pub fn remove_dampening(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: TriggerMode,
    ) -> DefinitionsResult<()> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(trigger_id, "triggerId")?;

        if self
            .store
            .dampening(tenant_id, trigger_id, trigger_mode)?
            .is_none()
        {
            tracing::debug!(
                tenant_id = %tenant_id,
                trigger_id = %trigger_id,
                mode = %trigger_mode,
                "Ignoring removeDampening, dampening not found"
            );
            return Ok(());
        }

        self.store
            .delete_dampening(tenant_id, trigger_id, trigger_mode)?;
        if let Some(engine) = self.engine() {
            engine.reload_trigger(tenant_id, trigger_id)?;
        }
        self.notify_listeners(DefinitionsEventType::DampeningChange);
        Ok(())
    }

    pub fn add_group_dampening(
        &self,
        tenant_id: &str,
        mut dampening: Dampening,
    ) -> DefinitionsResult<Dampening> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(&dampening.trigger_id, "triggerId")?;
        check_tenant(tenant_id, &mut dampening.tenant_id);

        let group = self.get_trigger(tenant_id, &dampening.trigger_id)?;
        if !group.group {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{}] is not a group trigger",
                dampening.trigger_id
            )));
        }

        for member in self.get_member_triggers(tenant_id, &group.id, false)? {
            let mut member_dampening = dampening.clone();
            member_dampening.trigger_id = member.id.clone();
            self.add_dampening_inner(member_dampening)?;
        }
        self.add_dampening_inner(dampening)
    }

    pub fn update_group_dampening(
        &self,
        tenant_id: &str,
        mut dampening: Dampening,
    ) -> DefinitionsResult<Dampening> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(&dampening.trigger_id, "triggerId")?;
        check_tenant(tenant_id, &mut dampening.tenant_id);

        let group = self.get_trigger(tenant_id, &dampening.trigger_id)?;
        if !group.group {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{}] is not a group trigger",
                dampening.trigger_id
            )));
        }

        for member in self.get_member_triggers(tenant_id, &group.id, false)? {
            let mut member_dampening = dampening.clone();
            member_dampening.trigger_id = member.id.clone();
            self.update_dampening_inner(member_dampening)?;
        }
        self.update_dampening_inner(dampening)
    }

    pub fn remove_group_dampening(
        &self,
        tenant_id: &str,
        group_id: &str,
        trigger_mode: TriggerMode,
    ) -> DefinitionsResult<()> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(group_id, "groupId")?;

        let group = self.get_trigger(tenant_id, group_id)?;
        if !group.group {
            return Err(DefinitionsError::IllegalState(format!(
                "Trigger [{tenant_id}/{group_id}] is not a group trigger"
            )));
        }

        for member in self.get_member_triggers(tenant_id, group_id, false)? {
            self.remove_dampening(tenant_id, &member.id, trigger_mode)?;
        }
        self.remove_dampening(tenant_id, group_id, trigger_mode)
    }

    pub fn get_dampening(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: TriggerMode,
    ) -> DefinitionsResult<Dampening> {
        self.store
            .dampening(tenant_id, trigger_id, trigger_mode)?
            .ok_or_else(|| {
                DefinitionsError::not_found(
                    "Dampening",
                    tenant_id,
                    &format!("{trigger_id}-{trigger_mode}"),
                )
            })
    }

    pub fn get_trigger_dampenings(
        &self,
        tenant_id: &str,
        trigger_id: &str,
        trigger_mode: Option<TriggerMode>,
    ) -> DefinitionsResult<Vec<Dampening>> {
        Ok(self
            .store
            .trigger_dampenings(tenant_id, trigger_id, trigger_mode)?)
    }

    pub fn get_dampenings(&self, tenant_id: &str) -> DefinitionsResult<Vec<Dampening>> {
        Ok(self.store.dampenings(tenant_id)?)
    }

    /// Cross-tenant admin fetch.
    pub fn get_all_dampenings(&self) -> DefinitionsResult<Vec<Dampening>> {
        Ok(self.store.all_dampenings(self.admin_timeout())?)
    }

    // ---- trigger queries ----

    pub fn get_trigger(&self, tenant_id: &str, trigger_id: &str) -> DefinitionsResult<Trigger> {
        self.store
            .trigger(tenant_id, trigger_id)?
            .ok_or_else(|| DefinitionsError::not_found("Trigger", tenant_id, trigger_id))
    }

    pub fn get_triggers(&self, tenant_id: &str) -> DefinitionsResult<Vec<Trigger>> {
        Ok(self.store.triggers(tenant_id)?)
    }

    pub fn get_member_triggers(
        &self,
        tenant_id: &str,
        group_id: &str,
        include_orphans: bool,
    ) -> DefinitionsResult<Vec<Trigger>> {
        Ok(self
            .store
            .triggers(tenant_id)?
            .into_iter()
            .filter(|t| {
                t.member_of.as_deref() == Some(group_id) && (include_orphans || !t.orphan)
            })
            .collect())
    }

    /// Cross-tenant admin fetch.
    pub fn get_all_triggers(&self) -> DefinitionsResult<Vec<Trigger>> {
        Ok(self.store.all_triggers(self.admin_timeout())?)
    }

    /// Cross-tenant admin fetch by tag.
    pub fn get_all_triggers_by_tag(
        &self,
        name: &str,
        value: &str,
    ) -> DefinitionsResult<Vec<Trigger>> {
        require_non_empty(name, "tagName")?;
        require_non_empty(value, "tagValue")?;
        Ok(self
            .store
            .all_triggers_by_tag(self.admin_timeout(), name, value)?)
    }

    // ---- action plugins ----

    pub fn add_action_plugin(&self, plugin: ActionPlugin) -> DefinitionsResult<ActionPlugin> {
        require_non_empty(&plugin.name, "actionPlugin")?;
        self.store
            .create_action_plugin(plugin.clone())
            .map_err(illegal_on_duplicate("ActionPlugin"))?;
        Ok(plugin)
    }

    pub fn update_action_plugin(&self, plugin: ActionPlugin) -> DefinitionsResult<ActionPlugin> {
        require_non_empty(&plugin.name, "actionPlugin")?;
        self.store
            .save_action_plugin(plugin.clone())
            .map_err(|e| not_found_on_missing(e, "ActionPlugin", "-", &plugin.name))?;
        Ok(plugin)
    }

    pub fn remove_action_plugin(&self, name: &str) -> DefinitionsResult<()> {
        require_non_empty(name, "actionPlugin")?;
        match self.store.delete_action_plugin(name) {
            Ok(()) => Ok(()),
            Err(StoreError::Missing(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_action_plugin(&self, name: &str) -> DefinitionsResult<Option<ActionPlugin>> {
        Ok(self.store.action_plugin(name)?)
    }

    pub fn get_action_plugins(&self) -> DefinitionsResult<Vec<String>> {
        Ok(self.store.action_plugins()?)
    }

    // ---- actions ----

    pub fn add_action(&self, tenant_id: &str, mut action: Action) -> DefinitionsResult<Action> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(&action.action_plugin, "actionPlugin")?;
        require_non_empty(&action.action_id, "actionId")?;
        check_tenant(tenant_id, &mut action.tenant_id);

        if self.store.action_plugin(&action.action_plugin)?.is_none() {
            return Err(DefinitionsError::InvalidArgument(format!(
                "Plugin [{}] is not deployed",
                action.action_plugin
            )));
        }

        self.store
            .create_action(action.clone())
            .map_err(illegal_on_duplicate("Action"))?;
        Ok(action)
    }

    pub fn update_action(&self, tenant_id: &str, mut action: Action) -> DefinitionsResult<Action> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(&action.action_plugin, "actionPlugin")?;
        require_non_empty(&action.action_id, "actionId")?;
        check_tenant(tenant_id, &mut action.tenant_id);

        self.store.save_action(action.clone()).map_err(|e| {
            not_found_on_missing(
                e,
                "Action",
                &action.tenant_id,
                &format!("{}/{}", action.action_plugin, action.action_id),
            )
        })?;
        Ok(action)
    }

    pub fn remove_action(
        &self,
        tenant_id: &str,
        action_plugin: &str,
        action_id: &str,
    ) -> DefinitionsResult<()> {
        require_non_empty(tenant_id, "tenantId")?;
        require_non_empty(action_plugin, "actionPlugin")?;
        require_non_empty(action_id, "actionId")?;
        match self.store.delete_action(tenant_id, action_plugin, action_id) {
            Ok(()) => Ok(()),
            Err(StoreError::Missing(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_action(
        &self,
        tenant_id: &str,
        action_plugin: &str,
        action_id: &str,
    ) -> DefinitionsResult<Option<Action>> {
        Ok(self.store.action(tenant_id, action_plugin, action_id)?)
    }

    pub fn get_actions(&self, tenant_id: &str) -> DefinitionsResult<Vec<Action>> {
        Ok(self.store.actions(tenant_id)?)
    }

    /// Cross-tenant admin fetch.
    pub fn get_all_actions(&self) -> DefinitionsResult<Vec<Action>> {
        Ok(self.store.all_actions(self.admin_timeout())?)
    }
}

// ---- helpers ----

fn require_non_empty(value: &str, what: &str) -> DefinitionsResult<()> {
    if value.trim().is_empty() {
        return Err(DefinitionsError::InvalidArgument(format!(
            "{what} must be not empty"
        )));
    }
    Ok(())
}

/// The tenant on the service call wins over the tenant embedded in the
/// entity; the service edge is the trust boundary.
fn check_tenant(tenant_id: &str, embedded: &mut String) {
    if embedded != tenant_id {
        *embedded = tenant_id.to_string();
    }
}

fn illegal_on_duplicate(entity: &'static str) -> impl Fn(StoreError) -> DefinitionsError {
    move |e| match e {
        StoreError::Duplicate(key) => {
            DefinitionsError::IllegalState(format!("{entity} already exists [{key}]"))
        }
        other => other.into(),
    }
}

fn not_found_on_missing(
    e: StoreError,
    entity: &'static str,
    tenant_id: &str,
    id: &str,
) -> DefinitionsError {
    match e {
        StoreError::Missing(_) => DefinitionsError::not_found(entity, tenant_id, id),
        other => other.into(),
    }
}

/// Every dataId token a group's conditions reference, `data2Id` included.
fn token_data_ids(conditions: &[Condition]) -> HashSet<String> {
    let mut tokens = HashSet::new();
    for condition in conditions {
        tokens.insert(condition.data_id().to_string());
        if let Some(data2_id) = condition.data2_id() {
            tokens.insert(data2_id.to_string());
        }
    }
    tokens
}

/// Copies the group-managed attributes onto a member. The member keeps its
/// own id, name, and (optionally overridden) context.
fn copy_group_trigger(group: &Trigger, member: &mut Trigger) {
    member.actions = group.actions.clone();
    member.auto_disable = group.auto_disable;
    member.auto_enable = group.auto_enable;
    member.auto_resolve = group.auto_resolve;
    member.auto_resolve_alerts = group.auto_resolve_alerts;
    member.auto_resolve_match = group.auto_resolve_match;
    member.member_of = Some(group.id.clone());
    member.context = group.context.clone();
    member.description = group.description.clone();
    member.enabled = group.enabled;
    member.firing_match = group.firing_match;
    member.severity = group.severity;
    member.tags = group.tags.clone();
    member.event_type = group.event_type;
}

/// Rewrites one group condition for a member, substituting token dataIds.
/// COMPARE substitutes both streams; EXTERNAL expressions substitute the
/// token by literal replacement.
fn member_condition(
    member: &Trigger,
    group_condition: &Condition,
    data_id_map: &HashMap<String, String>,
) -> DefinitionsResult<Condition> {
    let map = |token: &str| -> DefinitionsResult<String> {
        data_id_map.get(token).cloned().ok_or_else(|| {
            DefinitionsError::InvalidArgument(format!(
                "Missing dataIdMap entry for dataId token [{token}]"
            ))
        })
    };

    let kind = match &group_condition.kind {
        ConditionKind::Threshold {
            data_id,
            operator,
            threshold,
        } => ConditionKind::Threshold {
            data_id: map(data_id)?,
            operator: *operator,
            threshold: *threshold,
        },
        ConditionKind::ThresholdRange {
            data_id,
            operator_low,
            operator_high,
            threshold_low,
            threshold_high,
            in_range,
        } => ConditionKind::ThresholdRange {
            data_id: map(data_id)?,
            operator_low: *operator_low,
            operator_high: *operator_high,
            threshold_low: *threshold_low,
            threshold_high: *threshold_high,
            in_range: *in_range,
        },
        ConditionKind::Compare {
            data_id,
            operator,
            data2_id,
            data2_multiplier,
        } => ConditionKind::Compare {
            data_id: map(data_id)?,
            operator: *operator,
            data2_id: map(data2_id)?,
            data2_multiplier: *data2_multiplier,
        },
        ConditionKind::String {
            data_id,
            operator,
            pattern,
            ignore_case,
        } => ConditionKind::String {
            data_id: map(data_id)?,
            operator: *operator,
            pattern: pattern.clone(),
            ignore_case: *ignore_case,
        },
        ConditionKind::Availability { data_id, operator } => ConditionKind::Availability {
            data_id: map(data_id)?,
            operator: *operator,
        },
        ConditionKind::Event {
            data_id,
            expression,
        } => ConditionKind::Event {
            data_id: map(data_id)?,
            expression: expression.clone(),
        },
        ConditionKind::External {
            data_id,
            system_id,
            expression,
        } => {
            let member_data_id = map(data_id)?;
            let member_expression = expression.replace(data_id.as_str(), &member_data_id);
            ConditionKind::External {
                data_id: member_data_id,
                system_id: system_id.clone(),
                expression: member_expression,
            }
        }
    };

    Ok(Condition {
        tenant_id: member.tenant_id.clone(),
        trigger_id: member.id.clone(),
        trigger_mode: group_condition.trigger_mode,
        condition_set_size: group_condition.condition_set_size,
        condition_set_index: group_condition.condition_set_index,
        kind,
    })
}
