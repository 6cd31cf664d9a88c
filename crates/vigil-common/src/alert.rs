use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::condition::ConditionEval;
use crate::dampening::Dampening;
use crate::trigger::{Severity, Trigger};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLifecycle {
    Open,
    Acknowledged,
    Resolved,
    AutoResolved,
}

/// An emitted alert. Identity is `(tenant_id, trigger_id, ctime, alert_id)`.
///
/// The alert snapshots the trigger and dampening as they were at firing time,
/// plus the satisfying evaluation tuples (one tuple per true evaluation, each
/// tuple holding `condition_set_size` entries).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub tenant_id: String,
    pub trigger_id: String,
    pub ctime: DateTime<Utc>,
    pub alert_id: Uuid,
    pub severity: Severity,
    pub lifecycle: AlertLifecycle,
    pub trigger: Trigger,
    pub dampening: Dampening,
    pub eval_sets: Vec<Vec<ConditionEval>>,
    #[serde(default)]
    pub context: HashMap<String, String>,
    #[serde(default)]
    pub ack_by: Option<String>,
    #[serde(default)]
    pub ack_notes: Option<String>,
    #[serde(default)]
    pub ack_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_by: Option<String>,
    #[serde(default)]
    pub resolved_notes: Option<String>,
    #[serde(default)]
    pub resolved_time: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        trigger: &Trigger,
        dampening: &Dampening,
        eval_sets: Vec<Vec<ConditionEval>>,
        ctime: DateTime<Utc>,
    ) -> Self {
        Alert {
            tenant_id: trigger.tenant_id.clone(),
            trigger_id: trigger.id.clone(),
            ctime,
            alert_id: Uuid::new_v4(),
            severity: trigger.severity,
            lifecycle: AlertLifecycle::Open,
            trigger: trigger.clone(),
            dampening: dampening.clone(),
            eval_sets,
            context: trigger.context.clone(),
            ack_by: None,
            ack_notes: None,
            ack_time: None,
            resolved_by: None,
            resolved_notes: None,
            resolved_time: None,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(
            self.lifecycle,
            AlertLifecycle::Open | AlertLifecycle::Acknowledged
        )
    }

    pub fn acknowledge(&mut self, by: impl Into<String>, notes: Option<String>, at: DateTime<Utc>) {
        self.lifecycle = AlertLifecycle::Acknowledged;
        self.ack_by = Some(by.into());
        self.ack_notes = notes;
        self.ack_time = Some(at);
    }

    pub fn resolve(
        &mut self,
        lifecycle: AlertLifecycle,
        by: impl Into<String>,
        notes: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.lifecycle = lifecycle;
        self.resolved_by = Some(by.into());
        self.resolved_notes = notes;
        self.resolved_time = Some(at);
    }
}
