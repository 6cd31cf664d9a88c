use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::ConditionEval;
use crate::trigger::TriggerMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DampeningType {
    Strict,
    RelaxedCount,
    RelaxedTime,
}

/// The policy that turns a stream of per-tuple evaluation outcomes into at
/// most one "satisfied" edge per firing. At most one dampening exists per
/// `(tenant, trigger, mode)`; a missing dampening means STRICT(1).
///
/// Settings are immutable definition data; the counters below them are
/// volatile evaluation state and are skipped on serialization. Time windows
/// are measured against evaluation timestamps, so a replayed data stream
/// produces identical transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dampening {
    #[serde(default)]
    pub tenant_id: String,
    pub trigger_id: String,
    #[serde(default)]
    pub trigger_mode: TriggerMode,
    #[serde(rename = "type")]
    pub dampening_type: DampeningType,
    #[serde(default = "default_one")]
    pub eval_true_setting: u32,
    #[serde(default = "default_one")]
    pub eval_total_setting: u32,
    /// Window length in milliseconds, RELAXED_TIME only.
    #[serde(default)]
    pub eval_time_setting: i64,

    #[serde(skip)]
    pub num_true_evals: u32,
    #[serde(skip)]
    pub num_evals: u32,
    #[serde(skip)]
    pub true_evals_start: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub satisfied: bool,
    #[serde(skip)]
    pub satisfying_evals: Vec<Vec<ConditionEval>>,
}

fn default_one() -> u32 {
    1
}

impl Dampening {
    pub fn for_strict(
        tenant_id: impl Into<String>,
        trigger_id: impl Into<String>,
        trigger_mode: TriggerMode,
        num_consecutive: u32,
    ) -> Self {
        Dampening {
            tenant_id: tenant_id.into(),
            trigger_id: trigger_id.into(),
            trigger_mode,
            dampening_type: DampeningType::Strict,
            eval_true_setting: num_consecutive,
            eval_total_setting: num_consecutive,
            eval_time_setting: 0,
            num_true_evals: 0,
            num_evals: 0,
            true_evals_start: None,
            satisfied: false,
            satisfying_evals: Vec::new(),
        }
    }

    pub fn for_relaxed_count(
        tenant_id: impl Into<String>,
        trigger_id: impl Into<String>,
        trigger_mode: TriggerMode,
        num_true: u32,
        num_total: u32,
    ) -> Self {
        Dampening {
            dampening_type: DampeningType::RelaxedCount,
            eval_true_setting: num_true,
            eval_total_setting: num_total,
            ..Dampening::for_strict(tenant_id, trigger_id, trigger_mode, num_true)
        }
    }

    pub fn for_relaxed_time(
        tenant_id: impl Into<String>,
        trigger_id: impl Into<String>,
        trigger_mode: TriggerMode,
        num_true: u32,
        window_ms: i64,
    ) -> Self {
        Dampening {
            dampening_type: DampeningType::RelaxedTime,
            eval_time_setting: window_ms,
            ..Dampening::for_strict(tenant_id, trigger_id, trigger_mode, num_true)
        }
    }

    /// The dampening applied when a trigger mode defines none.
    pub fn default_for(
        tenant_id: impl Into<String>,
        trigger_id: impl Into<String>,
        trigger_mode: TriggerMode,
    ) -> Self {
        Dampening::for_strict(tenant_id, trigger_id, trigger_mode, 1)
    }

    /// Deterministic dampening id derived from the owning coordinates.
    pub fn dampening_id(&self) -> String {
        format!("{}-{}", self.trigger_id, self.trigger_mode)
    }

    /// Feeds one complete evaluation tuple into the state machine.
    ///
    /// `true_eval` is the tuple's reduction under the trigger's match policy
    /// and `now` is the tuple timestamp. A RELAXED_TIME window that has
    /// overflowed (`now - start > window`) is expired before the tuple is
    /// counted; satisfaction requires the window to still be open
    /// (`now - start <= window`) after counting.
    pub fn perform(&mut self, true_eval: bool, evals: Vec<ConditionEval>, now: DateTime<Utc>) {
        if self.dampening_type == DampeningType::RelaxedTime {
            if let Some(start) = self.true_evals_start {
                if now - start > Duration::milliseconds(self.eval_time_setting) {
                    self.reset();
                }
            }
        }

        self.num_evals += 1;
        if true_eval {
            self.num_true_evals += 1;
            self.satisfying_evals.push(evals);

            match self.dampening_type {
                DampeningType::Strict | DampeningType::RelaxedCount => {
                    if self.num_true_evals == self.eval_true_setting {
                        self.satisfied = true;
                    }
                }
                DampeningType::RelaxedTime => {
                    let start = *self.true_evals_start.get_or_insert(now);
                    if self.num_true_evals == self.eval_true_setting
                        && now - start <= Duration::milliseconds(self.eval_time_setting)
                    {
                        self.satisfied = true;
                    }
                }
            }
        } else {
            match self.dampening_type {
                DampeningType::Strict => self.reset(),
                DampeningType::RelaxedCount => {
                    let num_needed = self.eval_true_setting - self.num_true_evals;
                    let chances_left = self.eval_total_setting.saturating_sub(self.num_evals);
                    if num_needed > chances_left {
                        self.reset();
                    }
                }
                DampeningType::RelaxedTime => {}
            }
        }
    }

    pub fn reset(&mut self) {
        self.num_true_evals = 0;
        self.num_evals = 0;
        self.true_evals_start = None;
        self.satisfied = false;
        self.satisfying_evals.clear();
    }

    /// Consumes the accumulated satisfying tuples and returns the state
    /// machine to unsatisfied.
    pub fn take_satisfying_evals(&mut self) -> Vec<Vec<ConditionEval>> {
        let evals = std::mem::take(&mut self.satisfying_evals);
        self.reset();
        evals
    }

    pub fn log_line(&self) -> String {
        format!(
            "[{} numTrueEvals={} numEvals={} satisfied={}]",
            self.dampening_id(),
            self.num_true_evals,
            self.num_evals,
            self.satisfied
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    #[test]
    fn strict_satisfies_after_consecutive_trues() {
        let mut d = Dampening::for_strict("acme", "t1", TriggerMode::Firing, 3);

        d.perform(true, Vec::new(), ts(1));
        d.perform(true, Vec::new(), ts(2));
        assert!(!d.satisfied);

        d.perform(true, Vec::new(), ts(3));
        assert!(d.satisfied);
        assert_eq!(d.satisfying_evals.len(), 3);
    }

    #[test]
    fn strict_resets_on_single_non_match() {
        let mut d = Dampening::for_strict("acme", "t1", TriggerMode::Firing, 2);

        d.perform(true, Vec::new(), ts(1));
        d.perform(false, Vec::new(), ts(2));
        assert_eq!(d.num_true_evals, 0);
        assert_eq!(d.num_evals, 0);

        d.perform(true, Vec::new(), ts(3));
        assert!(!d.satisfied);
        d.perform(true, Vec::new(), ts(4));
        assert!(d.satisfied);
    }

    #[test]
    fn relaxed_count_tolerates_gaps_within_window() {
        // 2 true of up to 3 total
        let mut d = Dampening::for_relaxed_count("acme", "t1", TriggerMode::Firing, 2, 3);

        d.perform(true, Vec::new(), ts(1));
        d.perform(false, Vec::new(), ts(2));
        assert!(!d.satisfied);
        assert_eq!(d.num_evals, 2);

        d.perform(true, Vec::new(), ts(3));
        assert!(d.satisfied);
    }

    #[test]
    fn relaxed_count_resets_when_window_cannot_succeed() {
        let mut d = Dampening::for_relaxed_count("acme", "t1", TriggerMode::Firing, 2, 3);

        d.perform(false, Vec::new(), ts(1));
        d.perform(false, Vec::new(), ts(2));
        // 2 trues still needed but only 1 chance left: state restarts
        assert_eq!(d.num_evals, 0);

        d.perform(true, Vec::new(), ts(3));
        d.perform(true, Vec::new(), ts(4));
        assert!(d.satisfied);
    }

    #[test]
    fn relaxed_time_satisfies_within_window() {
        let mut d = Dampening::for_relaxed_time("acme", "t1", TriggerMode::Firing, 2, 1000);

        d.perform(true, Vec::new(), ts(0));
        assert_eq!(d.true_evals_start, Some(ts(0)));

        d.perform(true, Vec::new(), ts(900));
        assert!(d.satisfied);
    }

    #[test]
    fn relaxed_time_window_boundary_is_inclusive() {
        let mut d = Dampening::for_relaxed_time("acme", "t1", TriggerMode::Firing, 2, 1000);

        d.perform(true, Vec::new(), ts(0));
        d.perform(true, Vec::new(), ts(1000));
        assert!(d.satisfied);
    }

    #[test]
    fn relaxed_time_expires_overflowed_window_before_counting() {
        let mut d = Dampening::for_relaxed_time("acme", "t1", TriggerMode::Firing, 2, 1000);

        d.perform(true, Vec::new(), ts(0));
        d.perform(true, Vec::new(), ts(1500));
        // the second true opens a fresh window instead of satisfying
        assert!(!d.satisfied);
        assert_eq!(d.num_true_evals, 1);
        assert_eq!(d.true_evals_start, Some(ts(1500)));

        d.perform(true, Vec::new(), ts(1600));
        assert!(d.satisfied);
    }

    #[test]
    fn relaxed_time_ignores_non_matches() {
        let mut d = Dampening::for_relaxed_time("acme", "t1", TriggerMode::Firing, 2, 1000);

        d.perform(true, Vec::new(), ts(0));
        d.perform(false, Vec::new(), ts(100));
        assert_eq!(d.num_true_evals, 1);

        d.perform(true, Vec::new(), ts(200));
        assert!(d.satisfied);
    }

    #[test]
    fn take_satisfying_evals_resets_state() {
        let mut d = Dampening::for_strict("acme", "t1", TriggerMode::Firing, 1);
        d.perform(true, Vec::new(), ts(1));
        assert!(d.satisfied);

        let evals = d.take_satisfying_evals();
        assert_eq!(evals.len(), 1);
        assert!(!d.satisfied);
        assert_eq!(d.num_evals, 0);
        assert!(d.satisfying_evals.is_empty());
    }

    #[test]
    fn volatile_state_is_not_serialized() {
        let mut d = Dampening::for_strict("acme", "t1", TriggerMode::Firing, 1);
        d.perform(true, Vec::new(), ts(1));

        let json = serde_json::to_string(&d).unwrap();
        let back: Dampening = serde_json::from_str(&json).unwrap();
        assert!(!back.satisfied);
        assert_eq!(back.num_evals, 0);
        assert_eq!(back.eval_true_setting, 1);
    }
}
