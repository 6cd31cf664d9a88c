//! Initial-data import.
//!
//! On startup the engine may seed its definitions store from a data
//! directory holding `triggers-data.json`, `conditions-data.json`,
//! `dampening-data.json`, and `actions-data.json`. Each file's top level is a
//! mapping with a single key whose value is an ordered sequence of entity
//! mappings. Missing files are skipped; entities that already exist are
//! logged and left untouched, so a node joining a populated store is safe to
//! re-run the import (or suppress it entirely with the `skip_init_data`
//! flag).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use vigil_common::condition::set_coordinates;
use vigil_common::{Action, ActionPlugin, Condition, Dampening, Trigger, TriggerMode};

use crate::error::{Result, StoreError};
use crate::DefinitionsStore;

pub const TRIGGERS_FILE: &str = "triggers-data.json";
pub const CONDITIONS_FILE: &str = "conditions-data.json";
pub const DAMPENING_FILE: &str = "dampening-data.json";
pub const ACTIONS_FILE: &str = "actions-data.json";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub triggers: usize,
    pub conditions: usize,
    pub dampenings: usize,
    pub actions: usize,
}

#[derive(Deserialize)]
struct TriggersFile {
    triggers: Vec<Trigger>,
}

#[derive(Deserialize)]
struct ConditionsFile {
    conditions: Vec<Condition>,
}

#[derive(Deserialize)]
struct DampeningFile {
    dampenings: Vec<Dampening>,
}

#[derive(Deserialize)]
struct ActionsFile {
    actions: Vec<ActionEntry>,
}

/// One actions-file entry: the action itself, optionally bundled with a
/// declaration of its plugin (advertised property names and defaults) under
/// the `plugin` key.
#[derive(Deserialize)]
struct ActionEntry {
    #[serde(flatten)]
    action: Action,
    #[serde(default)]
    plugin: Option<PluginDecl>,
}

#[derive(Deserialize)]
struct PluginDecl {
    #[serde(default)]
    properties: std::collections::BTreeSet<String>,
    #[serde(default)]
    defaults: HashMap<String, String>,
}

/// Imports all bootstrap files present under `dir`.
pub fn import_init_data(dir: &Path, store: &dyn DefinitionsStore) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    if let Some(file) = read_file::<TriggersFile>(dir, TRIGGERS_FILE)? {
        summary.triggers = import_triggers(file.triggers, store)?;
    }
    if let Some(file) = read_file::<ConditionsFile>(dir, CONDITIONS_FILE)? {
        summary.conditions = import_conditions(file.conditions, store)?;
    }
    if let Some(file) = read_file::<DampeningFile>(dir, DAMPENING_FILE)? {
        summary.dampenings = import_dampenings(file.dampenings, store)?;
    }
    if let Some(file) = read_file::<ActionsFile>(dir, ACTIONS_FILE)? {
        summary.actions = import_actions(file.actions, store)?;
    }

    tracing::info!(
        triggers = summary.triggers,
        conditions = summary.conditions,
        dampenings = summary.dampenings,
        actions = summary.actions,
        "Initial data import finished"
    );
    Ok(summary)
}

fn read_file<T: serde::de::DeserializeOwned>(dir: &Path, name: &str) -> Result<Option<T>> {
    let path = dir.join(name);
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    let parsed = serde_json::from_str(&content)?;
    tracing::debug!(file = %path.display(), "Loaded init data file");
    Ok(Some(parsed))
}

fn import_triggers(triggers: Vec<Trigger>, store: &dyn DefinitionsStore) -> Result<usize> {
    let mut imported = 0;
    for trigger in triggers {
        match store.create_trigger(trigger.clone()) {
            Ok(()) => imported += 1,
            Err(StoreError::Duplicate(key)) => {
                tracing::warn!(key = %key, "Init trigger already exists, skipping");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(imported)
}

fn import_conditions(conditions: Vec<Condition>, store: &dyn DefinitionsStore) -> Result<usize> {
    // Group per (tenant, trigger, mode) preserving file order, then apply the
    // groups as full replacement sets so coordinates come out normalized.
    let mut order: Vec<(String, String, TriggerMode)> = Vec::new();
    let mut sets: HashMap<(String, String, TriggerMode), Vec<Condition>> = HashMap::new();
    for condition in conditions {
        let key = (
            condition.tenant_id.clone(),
            condition.trigger_id.clone(),
            condition.trigger_mode,
        );
        let set = sets.entry(key.clone()).or_default();
        if set.is_empty() {
            order.push(key);
        }
        set.push(condition);
    }

    let mut imported = 0;
    for key in order {
        let mut set = sets.remove(&key).unwrap_or_default();
        set_coordinates(&mut set, &key.0, &key.1, key.2);
        imported += set.len();
        store.set_conditions(&key.0, &key.1, key.2, set)?;
    }
    Ok(imported)
}

fn import_dampenings(dampenings: Vec<Dampening>, store: &dyn DefinitionsStore) -> Result<usize> {
    let mut imported = 0;
    for dampening in dampenings {
        match store.create_dampening(dampening) {
            Ok(()) => imported += 1,
            Err(StoreError::Duplicate(key)) => {
                tracing::warn!(key = %key, "Init dampening already exists, skipping");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(imported)
}

fn import_actions(entries: Vec<ActionEntry>, store: &dyn DefinitionsStore) -> Result<usize> {
    let mut imported = 0;
    for ActionEntry { action, plugin } in entries {
        if store.action_plugin(&action.action_plugin)?.is_none() {
            // An inline declaration supplies the advertised properties and
            // defaults; without one, the action's own property names become
            // the advertised set.
            let plugin = match plugin {
                Some(decl) => {
                    let mut properties = decl.properties;
                    properties.extend(decl.defaults.keys().cloned());
                    ActionPlugin {
                        name: action.action_plugin.clone(),
                        properties,
                        defaults: decl.defaults,
                    }
                }
                None => {
                    let mut plugin = ActionPlugin::new(action.action_plugin.clone());
                    plugin.properties = action.properties.keys().cloned().collect();
                    plugin
                }
            };
            store.create_action_plugin(plugin)?;
            tracing::info!(plugin = %action.action_plugin, "Registered init action plugin");
        } else if plugin.is_some() {
            tracing::debug!(
                plugin = %action.action_plugin,
                "Ignoring inline plugin declaration, plugin already registered"
            );
        }

        match store.create_action(action) {
            Ok(()) => imported += 1,
            Err(StoreError::Duplicate(key)) => {
                tracing::warn!(key = %key, "Init action already exists, skipping");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(imported)
}
