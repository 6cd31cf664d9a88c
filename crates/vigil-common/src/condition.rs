use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::DataValue;
use crate::trigger::TriggerMode;

/// Numeric comparison operator used by THRESHOLD and COMPARE conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompareOp {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
}

impl CompareOp {
    pub fn eval(self, left: f64, right: f64) -> bool {
        match self {
            CompareOp::Lt => left < right,
            CompareOp::Lte => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Gte => left >= right,
            CompareOp::Eq => left == right,
        }
    }
}

/// Range boundary operator: inclusive admits the boundary value itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RangeOp {
    Inclusive,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StringOp {
    Equal,
    NotEqual,
    StartsWith,
    EndsWith,
    Contains,
    Matches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AvailabilityOp {
    Down,
    NotUp,
    Up,
}

/// The closed set of condition variants. Matching semantics live in the
/// engine's matcher; this type is pure definition data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionKind {
    #[serde(rename_all = "camelCase")]
    Threshold {
        data_id: String,
        operator: CompareOp,
        threshold: f64,
    },
    #[serde(rename_all = "camelCase")]
    ThresholdRange {
        data_id: String,
        operator_low: RangeOp,
        operator_high: RangeOp,
        threshold_low: f64,
        threshold_high: f64,
        in_range: bool,
    },
    #[serde(rename_all = "camelCase")]
    Compare {
        data_id: String,
        operator: CompareOp,
        data2_id: String,
        data2_multiplier: f64,
    },
    #[serde(rename_all = "camelCase")]
    String {
        data_id: String,
        operator: StringOp,
        pattern: String,
        #[serde(default)]
        ignore_case: bool,
    },
    #[serde(rename_all = "camelCase")]
    Availability {
        data_id: String,
        operator: AvailabilityOp,
    },
    #[serde(rename_all = "camelCase")]
    Event { data_id: String, expression: String },
    #[serde(rename_all = "camelCase")]
    External {
        data_id: String,
        system_id: String,
        expression: String,
    },
}

impl ConditionKind {
    pub fn data_id(&self) -> &str {
        match self {
            ConditionKind::Threshold { data_id, .. }
            | ConditionKind::ThresholdRange { data_id, .. }
            | ConditionKind::Compare { data_id, .. }
            | ConditionKind::String { data_id, .. }
            | ConditionKind::Availability { data_id, .. }
            | ConditionKind::Event { data_id, .. }
            | ConditionKind::External { data_id, .. } => data_id,
        }
    }

    /// Second data stream, present only for COMPARE.
    pub fn data2_id(&self) -> Option<&str> {
        match self {
            ConditionKind::Compare { data2_id, .. } => Some(data2_id),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            ConditionKind::Threshold { .. } => "THRESHOLD",
            ConditionKind::ThresholdRange { .. } => "THRESHOLD_RANGE",
            ConditionKind::Compare { .. } => "COMPARE",
            ConditionKind::String { .. } => "STRING",
            ConditionKind::Availability { .. } => "AVAILABILITY",
            ConditionKind::Event { .. } => "EVENT",
            ConditionKind::External { .. } => "EXTERNAL",
        }
    }
}

/// A single predicate over one or two data streams, belonging to the
/// condition set of one `(trigger, mode)`.
///
/// Within a trigger mode, `condition_set_index` runs contiguously from 1 to
/// `condition_set_size`, and `condition_set_size` equals the set's length.
/// `set_coordinates` (called by the registry and the bootstrap importer) is
/// the only place those fields are assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default)]
    pub tenant_id: String,
    pub trigger_id: String,
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    #[serde(default = "default_set_field")]
    pub condition_set_size: usize,
    #[serde(default = "default_set_field")]
    pub condition_set_index: usize,
    #[serde(flatten)]
    pub kind: ConditionKind,
}

fn default_set_field() -> usize {
    1
}

impl Condition {
    pub fn new(
        tenant_id: impl Into<String>,
        trigger_id: impl Into<String>,
        trigger_mode: TriggerMode,
        kind: ConditionKind,
    ) -> Self {
        Condition {
            tenant_id: tenant_id.into(),
            trigger_id: trigger_id.into(),
            trigger_mode,
            condition_set_size: 1,
            condition_set_index: 1,
            kind,
        }
    }

    pub fn data_id(&self) -> &str {
        self.kind.data_id()
    }

    pub fn data2_id(&self) -> Option<&str> {
        self.kind.data2_id()
    }

    /// Deterministic condition id derived from the condition's coordinates.
    pub fn condition_id(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.trigger_id, self.trigger_mode, self.condition_set_size, self.condition_set_index
        )
    }
}

/// Assigns tenant, trigger, mode, and contiguous set coordinates to a full
/// replacement condition set, in iteration order.
pub fn set_coordinates(
    conditions: &mut [Condition],
    tenant_id: &str,
    trigger_id: &str,
    trigger_mode: TriggerMode,
) {
    let size = conditions.len();
    for (i, condition) in conditions.iter_mut().enumerate() {
        condition.tenant_id = tenant_id.to_string();
        condition.trigger_id = trigger_id.to_string();
        condition.trigger_mode = trigger_mode;
        condition.condition_set_size = size;
        condition.condition_set_index = i + 1;
    }
}

/// The outcome of matching one datum against one condition. Produced by the
/// rule engine, consumed by the dampening stage, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionEval {
    pub condition: Condition,
    /// Value of the driving datum.
    pub value: DataValue,
    /// Right-hand operand value for COMPARE conditions.
    #[serde(default)]
    pub value2: Option<DataValue>,
    pub timestamp: DateTime<Utc>,
    pub matched: bool,
    pub condition_set_size: usize,
    pub condition_set_index: usize,
}

impl ConditionEval {
    pub fn new(
        condition: &Condition,
        value: DataValue,
        value2: Option<DataValue>,
        timestamp: DateTime<Utc>,
        matched: bool,
    ) -> Self {
        ConditionEval {
            condition_set_size: condition.condition_set_size,
            condition_set_index: condition.condition_set_index,
            condition: condition.clone(),
            value,
            value2,
            timestamp,
            matched,
        }
    }

    /// One-line rendering used in alert and dampening logs.
    pub fn log_line(&self) -> String {
        format!(
            "{} {} dataId={} value={} match={}",
            self.condition.condition_id(),
            self.condition.kind.type_name(),
            self.condition.data_id(),
            self.value,
            self.matched
        )
    }
}
