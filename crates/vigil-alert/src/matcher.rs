//! Condition matching: the dispatch table over the closed condition variant
//! set.
//!
//! `evaluate` answers three ways: `Some(true)`/`Some(false)` when the datum
//! applies to the condition, `None` when it does not (wrong value type,
//! missing COMPARE operand, no external system registered). Faulty EVENT and
//! EXTERNAL expressions are logged and evaluate to `Some(false)` so one bad
//! expression never takes the trigger out of rotation.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use vigil_common::{
    AvailabilityOp, AvailabilityType, Condition, ConditionKind, Data, DataValue, EventData,
    RangeOp, StringOp,
};

/// Hook for EXTERNAL conditions: a named external system supplies the
/// verdict for its own expression language.
pub trait ExternalMatcher: Send + Sync {
    fn matches(&self, expression: &str, data: &Data) -> anyhow::Result<bool>;
}

pub type ExternalMatchers = HashMap<String, Arc<dyn ExternalMatcher>>;

pub fn evaluate(
    condition: &Condition,
    data: &Data,
    value2: Option<&DataValue>,
    externals: &ExternalMatchers,
) -> Option<bool> {
    match &condition.kind {
        ConditionKind::Threshold {
            operator, threshold, ..
        } => match data.value {
            DataValue::Numeric(value) => Some(operator.eval(value, *threshold)),
            _ => None,
        },

        ConditionKind::ThresholdRange {
            operator_low,
            operator_high,
            threshold_low,
            threshold_high,
            in_range,
            ..
        } => match data.value {
            DataValue::Numeric(value) => {
                let low_ok = match operator_low {
                    RangeOp::Inclusive => *threshold_low <= value,
                    RangeOp::Exclusive => *threshold_low < value,
                };
                let high_ok = match operator_high {
                    RangeOp::Inclusive => value <= *threshold_high,
                    RangeOp::Exclusive => value < *threshold_high,
                };
                let in_bounds = low_ok && high_ok;
                Some(if *in_range { in_bounds } else { !in_bounds })
            }
            _ => None,
        },

        ConditionKind::Compare {
            operator,
            data2_multiplier,
            ..
        } => match (&data.value, value2) {
            (DataValue::Numeric(left), Some(DataValue::Numeric(right))) => {
                Some(operator.eval(*left, right * data2_multiplier))
            }
            _ => None,
        },

        ConditionKind::String {
            operator,
            pattern,
            ignore_case,
            ..
        } => match &data.value {
            DataValue::String(value) => Some(match_string(value, *operator, pattern, *ignore_case)),
            _ => None,
        },

        ConditionKind::Availability { operator, .. } => match data.value {
            DataValue::Availability(value) => Some(match operator {
                AvailabilityOp::Down => value == AvailabilityType::Down,
                AvailabilityOp::NotUp => value != AvailabilityType::Up,
                AvailabilityOp::Up => value == AvailabilityType::Up,
            }),
            _ => None,
        },

        ConditionKind::Event { expression, .. } => match &data.value {
            DataValue::Event(event) => match eval_event_expression(expression, event) {
                Ok(matched) => Some(matched),
                Err(e) => {
                    tracing::warn!(
                        condition_id = %condition.condition_id(),
                        error = %e,
                        "Event expression evaluation failed, treating as no-match"
                    );
                    Some(false)
                }
            },
            _ => None,
        },

        ConditionKind::External {
            system_id,
            expression,
            ..
        } => {
            let matcher = externals.get(system_id)?;
            match matcher.matches(expression, data) {
                Ok(matched) => Some(matched),
                Err(e) => {
                    tracing::warn!(
                        condition_id = %condition.condition_id(),
                        system_id = %system_id,
                        error = %e,
                        "External matcher failed, treating as no-match"
                    );
                    Some(false)
                }
            }
        }
    }
}

fn match_string(value: &str, operator: StringOp, pattern: &str, ignore_case: bool) -> bool {
    if operator == StringOp::Matches {
        let pattern = if ignore_case {
            format!("(?i){pattern}")
        } else {
            pattern.to_string()
        };
        return match Regex::new(&pattern) {
            Ok(re) => re.is_match(value),
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Invalid MATCHES pattern, treating as no-match");
                false
            }
        };
    }

    let (value, pattern) = if ignore_case {
        (value.to_lowercase(), pattern.to_lowercase())
    } else {
        (value.to_string(), pattern.to_string())
    };

    match operator {
        StringOp::Equal => value == pattern,
        StringOp::NotEqual => value != pattern,
        StringOp::StartsWith => value.starts_with(&pattern),
        StringOp::EndsWith => value.ends_with(&pattern),
        StringOp::Contains => value.contains(&pattern),
        StringOp::Matches => unreachable!("handled above"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventExprError {
    #[error("empty expression")]
    Empty,
    #[error("malformed clause '{0}', expected 'field operator operand'")]
    MalformedClause(String),
    #[error("unknown field '{0}'")]
    UnknownField(String),
    #[error("unknown operator '{0}'")]
    UnknownOperator(String),
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Evaluates an EVENT condition expression: a comma-separated conjunction of
/// `field operator operand` clauses over `category`, `text`, and
/// `context.<key>`. Operands may be single-quoted to carry spaces; commas
/// inside operands are not supported.
///
/// Operators: `==`, `!=`, `starts`, `ends`, `contains`, `matches`.
pub fn eval_event_expression(expression: &str, event: &EventData) -> Result<bool, EventExprError> {
    if expression.trim().is_empty() {
        return Err(EventExprError::Empty);
    }

    for clause in expression.split(',') {
        if !eval_event_clause(clause.trim(), event)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn eval_event_clause(clause: &str, event: &EventData) -> Result<bool, EventExprError> {
    let mut parts = clause.splitn(3, ' ');
    let (Some(field), Some(operator), Some(operand)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(EventExprError::MalformedClause(clause.to_string()));
    };

    let operand = operand.trim().trim_matches('\'');

    let field_value: Option<&str> = if field == "category" {
        Some(&event.category)
    } else if field == "text" {
        Some(&event.text)
    } else if let Some(key) = field.strip_prefix("context.") {
        event.context.get(key).map(String::as_str)
    } else {
        return Err(EventExprError::UnknownField(field.to_string()));
    };

    // A clause on an absent context key never holds.
    let Some(value) = field_value else {
        return Ok(false);
    };

    match operator {
        "==" => Ok(value == operand),
        "!=" => Ok(value != operand),
        "starts" => Ok(value.starts_with(operand)),
        "ends" => Ok(value.ends_with(operand)),
        "contains" => Ok(value.contains(operand)),
        "matches" => {
            let re = Regex::new(operand).map_err(|source| EventExprError::InvalidPattern {
                pattern: operand.to_string(),
                source,
            })?;
            Ok(re.is_match(value))
        }
        other => Err(EventExprError::UnknownOperator(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_common::{CompareOp, TriggerMode};

    fn condition(kind: ConditionKind) -> Condition {
        Condition::new("acme", "t1", TriggerMode::Firing, kind)
    }

    fn no_externals() -> ExternalMatchers {
        HashMap::new()
    }

    #[test]
    fn threshold_compares_under_operator() {
        let c = condition(ConditionKind::Threshold {
            data_id: "x".into(),
            operator: CompareOp::Gt,
            threshold: 10.0,
        });

        let hit = Data::numeric("acme", "x", Utc::now(), 15.0);
        let miss = Data::numeric("acme", "x", Utc::now(), 5.0);
        assert_eq!(evaluate(&c, &hit, None, &no_externals()), Some(true));
        assert_eq!(evaluate(&c, &miss, None, &no_externals()), Some(false));

        // non-numeric data does not apply
        let wrong = Data::string("acme", "x", Utc::now(), "15");
        assert_eq!(evaluate(&c, &wrong, None, &no_externals()), None);
    }

    #[test]
    fn threshold_range_respects_bounds_and_negation() {
        let inside = condition(ConditionKind::ThresholdRange {
            data_id: "x".into(),
            operator_low: RangeOp::Inclusive,
            operator_high: RangeOp::Exclusive,
            threshold_low: 10.0,
            threshold_high: 20.0,
            in_range: true,
        });

        let at_low = Data::numeric("acme", "x", Utc::now(), 10.0);
        let at_high = Data::numeric("acme", "x", Utc::now(), 20.0);
        assert_eq!(evaluate(&inside, &at_low, None, &no_externals()), Some(true));
        assert_eq!(evaluate(&inside, &at_high, None, &no_externals()), Some(false));

        let outside = condition(ConditionKind::ThresholdRange {
            data_id: "x".into(),
            operator_low: RangeOp::Inclusive,
            operator_high: RangeOp::Inclusive,
            threshold_low: 10.0,
            threshold_high: 20.0,
            in_range: false,
        });
        let below = Data::numeric("acme", "x", Utc::now(), 5.0);
        assert_eq!(evaluate(&outside, &below, None, &no_externals()), Some(true));
    }

    #[test]
    fn compare_requires_both_operands() {
        let c = condition(ConditionKind::Compare {
            data_id: "x".into(),
            operator: CompareOp::Gt,
            data2_id: "y".into(),
            data2_multiplier: 2.0,
        });

        let left = Data::numeric("acme", "x", Utc::now(), 10.0);
        assert_eq!(evaluate(&c, &left, None, &no_externals()), None);

        let right = DataValue::Numeric(4.0);
        // 10 > 4 * 2
        assert_eq!(
            evaluate(&c, &left, Some(&right), &no_externals()),
            Some(true)
        );
        let right = DataValue::Numeric(6.0);
        assert_eq!(
            evaluate(&c, &left, Some(&right), &no_externals()),
            Some(false)
        );
    }

    #[test]
    fn string_operators_fold_case_when_asked() {
        let c = condition(ConditionKind::String {
            data_id: "msg".into(),
            operator: StringOp::Contains,
            pattern: "ERROR".into(),
            ignore_case: true,
        });
        let data = Data::string("acme", "msg", Utc::now(), "disk error detected");
        assert_eq!(evaluate(&c, &data, None, &no_externals()), Some(true));

        let exact = condition(ConditionKind::String {
            data_id: "msg".into(),
            operator: StringOp::Contains,
            pattern: "ERROR".into(),
            ignore_case: false,
        });
        assert_eq!(evaluate(&exact, &data, None, &no_externals()), Some(false));
    }

    #[test]
    fn string_matches_uses_regex() {
        let c = condition(ConditionKind::String {
            data_id: "msg".into(),
            operator: StringOp::Matches,
            pattern: "^disk [a-z]+$".into(),
            ignore_case: false,
        });
        let data = Data::string("acme", "msg", Utc::now(), "disk full");
        assert_eq!(evaluate(&c, &data, None, &no_externals()), Some(true));

        // an invalid pattern is a no-match, not a panic
        let bad = condition(ConditionKind::String {
            data_id: "msg".into(),
            operator: StringOp::Matches,
            pattern: "(".into(),
            ignore_case: false,
        });
        assert_eq!(evaluate(&bad, &data, None, &no_externals()), Some(false));
    }

    #[test]
    fn availability_operators() {
        let c = condition(ConditionKind::Availability {
            data_id: "ping".into(),
            operator: AvailabilityOp::NotUp,
        });

        let down = Data::availability("acme", "ping", Utc::now(), AvailabilityType::Down);
        let unknown = Data::availability("acme", "ping", Utc::now(), AvailabilityType::Unknown);
        let up = Data::availability("acme", "ping", Utc::now(), AvailabilityType::Up);
        assert_eq!(evaluate(&c, &down, None, &no_externals()), Some(true));
        assert_eq!(evaluate(&c, &unknown, None, &no_externals()), Some(true));
        assert_eq!(evaluate(&c, &up, None, &no_externals()), Some(false));
    }

    #[test]
    fn event_expression_conjunction() {
        let event = EventData {
            category: "deployment".into(),
            text: "deploy of billing failed".into(),
            context: [("env".to_string(), "prod".to_string())].into_iter().collect(),
        };

        assert!(eval_event_expression("category == deployment", &event).unwrap());
        assert!(eval_event_expression(
            "category == deployment, text contains failed, context.env == prod",
            &event
        )
        .unwrap());
        assert!(!eval_event_expression("text starts 'rollback'", &event).unwrap());
        // absent context key never holds
        assert!(!eval_event_expression("context.region == us-east", &event).unwrap());
    }

    #[test]
    fn event_expression_errors_are_typed() {
        let event = EventData {
            category: "c".into(),
            text: "t".into(),
            context: HashMap::new(),
        };

        assert!(matches!(
            eval_event_expression("", &event),
            Err(EventExprError::Empty)
        ));
        assert!(matches!(
            eval_event_expression("category", &event),
            Err(EventExprError::MalformedClause(_))
        ));
        assert!(matches!(
            eval_event_expression("severity == high", &event),
            Err(EventExprError::UnknownField(_))
        ));
        assert!(matches!(
            eval_event_expression("text ~= high", &event),
            Err(EventExprError::UnknownOperator(_))
        ));
    }

    #[test]
    fn faulty_event_expression_is_a_no_match() {
        let c = condition(ConditionKind::Event {
            data_id: "events".into(),
            expression: "bogus == field".into(),
        });
        let data = Data::event(
            "acme",
            "events",
            Utc::now(),
            EventData {
                category: "c".into(),
                text: "t".into(),
                context: HashMap::new(),
            },
        );
        assert_eq!(evaluate(&c, &data, None, &no_externals()), Some(false));
    }

    #[test]
    fn external_without_matcher_does_not_apply() {
        let c = condition(ConditionKind::External {
            data_id: "x".into(),
            system_id: "prediction".into(),
            expression: "anomaly(x) > 0.9".into(),
        });
        let data = Data::numeric("acme", "x", Utc::now(), 1.0);
        assert_eq!(evaluate(&c, &data, None, &no_externals()), None);

        struct AlwaysMatch;
        impl ExternalMatcher for AlwaysMatch {
            fn matches(&self, _expression: &str, _data: &Data) -> anyhow::Result<bool> {
                Ok(true)
            }
        }
        let mut externals: ExternalMatchers = HashMap::new();
        externals.insert("prediction".into(), Arc::new(AlwaysMatch));
        assert_eq!(evaluate(&c, &data, None, &externals), Some(true));
    }
}
