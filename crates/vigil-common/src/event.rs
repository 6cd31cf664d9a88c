use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefinitionsEventType {
    TriggerCreate,
    TriggerUpdate,
    TriggerRemove,
    ConditionChange,
    DampeningChange,
}

/// Change notification fired by the definitions registry after a successful
/// mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionsEvent {
    pub event_type: DefinitionsEventType,
    pub ctime: DateTime<Utc>,
}

impl DefinitionsEvent {
    pub fn new(event_type: DefinitionsEventType) -> Self {
        DefinitionsEvent {
            event_type,
            ctime: Utc::now(),
        }
    }
}

/// Registered listeners are called synchronously with the triggering
/// mutation, in registration order, filtered by subscribed event type.
pub trait DefinitionsListener: Send + Sync {
    fn on_change(&self, event: &DefinitionsEvent);
}
