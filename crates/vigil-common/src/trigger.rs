use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity assigned to alerts produced by a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// A trigger owns one condition set and one dampening per mode. FIRING is the
/// normal alerting mode; AUTORESOLVE takes over after an auto-resolve trigger
/// fires, until its own condition set resolves the situation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerMode {
    Firing,
    Autoresolve,
}

impl Default for TriggerMode {
    fn default() -> Self {
        TriggerMode::Firing
    }
}

impl std::fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerMode::Firing => write!(f, "FIRING"),
            TriggerMode::Autoresolve => write!(f, "AUTORESOLVE"),
        }
    }
}

/// Reduction applied to a complete evaluation tuple: ALL requires every
/// condition to match, ANY requires at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchPolicy {
    Any,
    All,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        MatchPolicy::All
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Alert,
    Event,
}

impl Default for EventType {
    fn default() -> Self {
        EventType::Alert
    }
}

/// A user-defined alert rule. Identity is `(tenant_id, id)` and is stable for
/// the trigger's lifetime.
///
/// A trigger is exactly one of standalone, group, or member:
/// `group == true` implies `member_of == None`, and `member_of != None`
/// implies `group == false`. An orphan is a member detached from its group's
/// edits. Group triggers are templates and never evaluate data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trigger {
    #[serde(default)]
    pub tenant_id: String,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub event_category: Option<String>,
    #[serde(default)]
    pub event_text: Option<String>,
    #[serde(default)]
    pub event_type: EventType,
    #[serde(default)]
    pub firing_match: MatchPolicy,
    #[serde(default)]
    pub auto_resolve_match: MatchPolicy,
    #[serde(default)]
    pub auto_disable: bool,
    #[serde(default)]
    pub auto_enable: bool,
    #[serde(default)]
    pub auto_resolve: bool,
    #[serde(default = "default_true")]
    pub auto_resolve_alerts: bool,
    #[serde(default)]
    pub context: HashMap<String, String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    /// Action bindings: plugin name -> bound action ids.
    #[serde(default)]
    pub actions: HashMap<String, BTreeSet<String>>,
    #[serde(default)]
    pub group: bool,
    #[serde(default)]
    pub member_of: Option<String>,
    #[serde(default)]
    pub orphan: bool,
    /// Volatile evaluation mode; not part of the stored definition.
    #[serde(skip)]
    pub mode: TriggerMode,
}

fn default_true() -> bool {
    true
}

impl Trigger {
    pub fn new(tenant_id: impl Into<String>, id: impl Into<String>, name: impl Into<String>) -> Self {
        Trigger {
            tenant_id: tenant_id.into(),
            id: id.into(),
            name: name.into(),
            description: String::new(),
            enabled: false,
            severity: Severity::default(),
            event_category: None,
            event_text: None,
            event_type: EventType::default(),
            firing_match: MatchPolicy::default(),
            auto_resolve_match: MatchPolicy::default(),
            auto_disable: false,
            auto_enable: false,
            auto_resolve: false,
            auto_resolve_alerts: true,
            context: HashMap::new(),
            tags: HashMap::new(),
            actions: HashMap::new(),
            group: false,
            member_of: None,
            orphan: false,
            mode: TriggerMode::Firing,
        }
    }

    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn is_member(&self) -> bool {
        self.member_of.is_some()
    }

    pub fn is_standalone(&self) -> bool {
        !self.group && self.member_of.is_none()
    }

    /// Whether the engine should hold this trigger in working memory.
    /// Group triggers are templates and are never loaded.
    pub fn is_loadable(&self) -> bool {
        self.enabled && !self.group
    }

    pub fn match_policy(&self, mode: TriggerMode) -> MatchPolicy {
        match mode {
            TriggerMode::Firing => self.firing_match,
            TriggerMode::Autoresolve => self.auto_resolve_match,
        }
    }
}
