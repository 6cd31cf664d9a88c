use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AvailabilityType {
    Up,
    Down,
    Unknown,
}

impl std::fmt::Display for AvailabilityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AvailabilityType::Up => write!(f, "UP"),
            AvailabilityType::Down => write!(f, "DOWN"),
            AvailabilityType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Payload of an event-valued datum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub context: HashMap<String, String>,
}

/// The closed set of value variants a telemetry sample can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DataValue {
    Numeric(f64),
    Availability(AvailabilityType),
    String(String),
    Event(EventData),
}

impl std::fmt::Display for DataValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataValue::Numeric(v) => write!(f, "{v}"),
            DataValue::Availability(a) => write!(f, "{a}"),
            DataValue::String(s) => write!(f, "{s}"),
            DataValue::Event(e) => write!(f, "{}:{}", e.category, e.text),
        }
    }
}

/// One telemetry sample. For a given `data_id`, samples are evaluated in
/// ascending timestamp order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Data {
    #[serde(default)]
    pub tenant_id: String,
    pub data_id: String,
    pub timestamp: DateTime<Utc>,
    pub value: DataValue,
}

impl Data {
    pub fn numeric(
        tenant_id: impl Into<String>,
        data_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Self {
        Data {
            tenant_id: tenant_id.into(),
            data_id: data_id.into(),
            timestamp,
            value: DataValue::Numeric(value),
        }
    }

    pub fn availability(
        tenant_id: impl Into<String>,
        data_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: AvailabilityType,
    ) -> Self {
        Data {
            tenant_id: tenant_id.into(),
            data_id: data_id.into(),
            timestamp,
            value: DataValue::Availability(value),
        }
    }

    pub fn string(
        tenant_id: impl Into<String>,
        data_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: impl Into<String>,
    ) -> Self {
        Data {
            tenant_id: tenant_id.into(),
            data_id: data_id.into(),
            timestamp,
            value: DataValue::String(value.into()),
        }
    }

    pub fn event(
        tenant_id: impl Into<String>,
        data_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        event: EventData,
    ) -> Self {
        Data {
            tenant_id: tenant_id.into(),
            data_id: data_id.into(),
            timestamp,
            value: DataValue::Event(event),
        }
    }
}
