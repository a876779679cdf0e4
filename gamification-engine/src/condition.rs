//! Component F: the condition engine (spec §3 "Condition", §4.F).
//!
//! Every built-in variant is a pure, total function of
//! `(history, trigger_event) -> bool`: invalid or missing parameters yield
//! `false` rather than an error, so a misconfigured rule fails closed
//! instead of firing spuriously. Plugin conditions extend the closed set via
//! a registry keyed by type tag, per spec §9 "Polymorphism via variants".

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{DomainError, Result};
use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

/// What history a condition needs, so the evaluator only fetches the
/// slice each condition declares (spec §9 "History-dependent conditions").
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryNeed {
    None,
    ByType { event_type: String, window_minutes: Option<i64> },
    FullHistory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    AlwaysTrue {
        condition_id: String,
    },
    AttributeEquals {
        condition_id: String,
        attribute_name: String,
        expected_value: Value,
    },
    Count {
        condition_id: String,
        event_type: String,
        min_count: u64,
        #[serde(default)]
        time_window_minutes: Option<i64>,
    },
    Threshold {
        condition_id: String,
        attribute_name: String,
        threshold: f64,
        operation: ThresholdOp,
    },
    Sequence {
        condition_id: String,
        event_types: Vec<String>,
        time_window_minutes: i64,
    },
    TimeSinceLastEvent {
        condition_id: String,
        event_type: String,
        min_minutes: i64,
    },
    FirstOccurrence {
        condition_id: String,
    },
    Plugin {
        condition_id: String,
        type_tag: String,
        #[serde(default)]
        parameters: HashMap<String, Value>,
    },
}

impl Condition {
    pub fn condition_id(&self) -> &str {
        match self {
            Condition::AlwaysTrue { condition_id }
            | Condition::AttributeEquals { condition_id, .. }
            | Condition::Count { condition_id, .. }
            | Condition::Threshold { condition_id, .. }
            | Condition::Sequence { condition_id, .. }
            | Condition::TimeSinceLastEvent { condition_id, .. }
            | Condition::FirstOccurrence { condition_id }
            | Condition::Plugin { condition_id, .. } => condition_id,
        }
    }

    /// Declares which history slice this condition needs so the evaluator
    /// can fetch lazily.
    pub fn history_need(&self) -> HistoryNeed {
        match self {
            Condition::AlwaysTrue { .. } | Condition::AttributeEquals { .. } | Condition::Threshold { .. } => {
                HistoryNeed::None
            }
            Condition::Count {
                event_type,
                time_window_minutes,
                ..
            } => HistoryNeed::ByType {
                event_type: event_type.clone(),
                window_minutes: *time_window_minutes,
            },
            Condition::TimeSinceLastEvent { event_type, .. } => HistoryNeed::ByType {
                event_type: event_type.clone(),
                window_minutes: None,
            },
            Condition::FirstOccurrence { .. } => HistoryNeed::FullHistory,
            Condition::Sequence { .. } => HistoryNeed::FullHistory,
            Condition::Plugin { .. } => HistoryNeed::FullHistory,
        }
    }

    /// The variant's type tag, for dry-run traces (spec §4.J).
    pub fn type_tag(&self) -> &'static str {
        match self {
            Condition::AlwaysTrue { .. } => "alwaysTrue",
            Condition::AttributeEquals { .. } => "attributeEquals",
            Condition::Count { .. } => "count",
            Condition::Threshold { .. } => "threshold",
            Condition::Sequence { .. } => "sequence",
            Condition::TimeSinceLastEvent { .. } => "timeSinceLastEvent",
            Condition::FirstOccurrence { .. } => "firstOccurrence",
            Condition::Plugin { .. } => "plugin",
        }
    }

    /// The condition's own parameters, serialized for a dry-run trace.
    pub fn parameters_json(&self) -> Value {
        match self {
            Condition::AlwaysTrue { .. } => serde_json::json!({}),
            Condition::AttributeEquals {
                attribute_name,
                expected_value,
                ..
            } => serde_json::json!({ "attributeName": attribute_name, "expectedValue": expected_value }),
            Condition::Count {
                event_type,
                min_count,
                time_window_minutes,
                ..
            } => serde_json::json!({ "eventType": event_type, "minCount": min_count, "timeWindowMinutes": time_window_minutes }),
            Condition::Threshold {
                attribute_name,
                threshold,
                operation,
                ..
            } => serde_json::json!({ "attributeName": attribute_name, "threshold": threshold, "operation": operation }),
            Condition::Sequence {
                event_types,
                time_window_minutes,
                ..
            } => serde_json::json!({ "eventTypes": event_types, "timeWindowMinutes": time_window_minutes }),
            Condition::TimeSinceLastEvent {
                event_type,
                min_minutes,
                ..
            } => serde_json::json!({ "eventType": event_type, "minMinutes": min_minutes }),
            Condition::FirstOccurrence { .. } => serde_json::json!({}),
            Condition::Plugin {
                type_tag, parameters, ..
            } => serde_json::json!({ "typeTag": type_tag, "parameters": parameters }),
        }
    }
}

/// Registered, schema-validated condition plugin.
pub trait ConditionPlugin: Send + Sync {
    fn type_tag(&self) -> &str;

    /// Validates `parameters` against the plugin's declared schema before a
    /// rule referencing this plugin is accepted.
    fn validate_parameters(&self, parameters: &HashMap<String, Value>) -> Result<()>;

    fn evaluate(&self, history: &[Event], trigger_event: &Event, parameters: &HashMap<String, Value>) -> bool;
}

#[derive(Default)]
pub struct ConditionPluginRegistry {
    plugins: HashMap<String, Box<dyn ConditionPlugin>>,
}

impl ConditionPluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn ConditionPlugin>) {
        self.plugins.insert(plugin.type_tag().to_string(), plugin);
    }

    pub fn get(&self, type_tag: &str) -> Option<&dyn ConditionPlugin> {
        self.plugins.get(type_tag).map(|b| b.as_ref())
    }

    pub fn validate(&self, type_tag: &str, parameters: &HashMap<String, Value>) -> Result<()> {
        match self.get(type_tag) {
            Some(plugin) => plugin.validate_parameters(parameters),
            None => Err(DomainError::Validation(format!(
                "no condition plugin registered for type tag {type_tag}"
            ))),
        }
    }
}

pub struct ConditionEngine<'a> {
    registry: &'a ConditionPluginRegistry,
}

impl<'a> ConditionEngine<'a> {
    pub fn new(registry: &'a ConditionPluginRegistry) -> Self {
        Self { registry }
    }

    /// Evaluates `condition` against `history` (the events this condition
    /// declared a need for) and `trigger_event`. Total: never panics or
    /// returns an error, a misconfigured condition just evaluates `false`.
    pub fn evaluate(&self, condition: &Condition, history: &[Event], trigger_event: &Event) -> bool {
        match condition {
            Condition::AlwaysTrue { .. } => true,
            Condition::AttributeEquals {
                attribute_name,
                expected_value,
                ..
            } => trigger_event
                .attributes
                .get(attribute_name)
                .map(|v| v == expected_value)
                .unwrap_or(false),
            Condition::Count {
                event_type,
                min_count,
                time_window_minutes,
                ..
            } => Self::evaluate_count(history, trigger_event, event_type, *min_count, *time_window_minutes),
            Condition::Threshold {
                attribute_name,
                threshold,
                operation,
                ..
            } => Self::evaluate_threshold(trigger_event, attribute_name, *threshold, *operation),
            Condition::Sequence {
                event_types,
                time_window_minutes,
                ..
            } => Self::evaluate_sequence(history, trigger_event, event_types, *time_window_minutes),
            Condition::TimeSinceLastEvent {
                event_type,
                min_minutes,
                ..
            } => Self::evaluate_time_since_last(history, trigger_event, event_type, *min_minutes),
            Condition::FirstOccurrence { .. } => Self::evaluate_first_occurrence(history, trigger_event),
            Condition::Plugin {
                type_tag, parameters, ..
            } => self
                .registry
                .get(type_tag)
                .map(|plugin| plugin.evaluate(history, trigger_event, parameters))
                .unwrap_or(false),
        }
    }

    fn evaluate_count(
        history: &[Event],
        trigger_event: &Event,
        event_type: &str,
        min_count: u64,
        time_window_minutes: Option<i64>,
    ) -> bool {
        let count = history
            .iter()
            .filter(|e| e.event_type == event_type)
            .filter(|e| within_window(e.occurred_at, trigger_event.occurred_at, time_window_minutes))
            .count() as u64;
        count >= min_count
    }

    /// Amounts are conceptually whole numbers, so a trigger attribute and a
    /// `threshold` that are both exact integers compare as `i128` -- an
    /// `f64` round-trip would start losing digits well within the range a
    /// point balance can reach. Anything with a fractional part falls back
    /// to float comparison.
    fn evaluate_threshold(trigger_event: &Event, attribute_name: &str, threshold: f64, operation: ThresholdOp) -> bool {
        if threshold.fract() == 0.0 {
            if let Some(value) = trigger_event.attribute_integer(attribute_name) {
                let threshold = threshold as i128;
                return match operation {
                    ThresholdOp::Gt => value > threshold,
                    ThresholdOp::Ge => value >= threshold,
                    ThresholdOp::Lt => value < threshold,
                    ThresholdOp::Le => value <= threshold,
                    ThresholdOp::Eq => value == threshold,
                    ThresholdOp::Ne => value != threshold,
                };
            }
        }

        let Some(value) = trigger_event.attribute_number(attribute_name) else {
            return false;
        };
        match operation {
            ThresholdOp::Gt => value > threshold,
            ThresholdOp::Ge => value >= threshold,
            ThresholdOp::Lt => value < threshold,
            ThresholdOp::Le => value <= threshold,
            ThresholdOp::Eq => (value - threshold).abs() < f64::EPSILON,
            ThresholdOp::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    /// Scans `history` forward, keeping a pointer into `event_types`,
    /// advancing when `event.event_type == event_types[pointer]` and
    /// `event.occurred_at <= trigger.occurred_at`. Succeeds iff the pointer
    /// reaches the end AND the first matched event is within
    /// `time_window_minutes` of the last. `time_window_minutes = 0` means
    /// "only simultaneous events" (spec §9 Open Questions).
    fn evaluate_sequence(
        history: &[Event],
        trigger_event: &Event,
        event_types: &[String],
        time_window_minutes: i64,
    ) -> bool {
        if event_types.is_empty() {
            return true;
        }
        let mut ordered: Vec<&Event> = history.iter().collect();
        ordered.sort_by_key(|e| e.occurred_at);

        let mut pointer = 0usize;
        let mut first_match: Option<DateTime<Utc>> = None;
        let mut last_match: Option<DateTime<Utc>> = None;

        for event in ordered {
            if pointer >= event_types.len() {
                break;
            }
            if event.occurred_at > trigger_event.occurred_at {
                continue;
            }
            if event.event_type == event_types[pointer] {
                if first_match.is_none() {
                    first_match = Some(event.occurred_at);
                }
                last_match = Some(event.occurred_at);
                pointer += 1;
            }
        }

        if pointer != event_types.len() {
            return false;
        }
        match (first_match, last_match) {
            (Some(first), Some(last)) => {
                let span = last - first;
                span <= Duration::minutes(time_window_minutes) && span >= Duration::zero()
            }
            _ => false,
        }
    }

    fn evaluate_time_since_last(
        history: &[Event],
        trigger_event: &Event,
        event_type: &str,
        min_minutes: i64,
    ) -> bool {
        let last = history
            .iter()
            .filter(|e| e.event_type == event_type && e.occurred_at < trigger_event.occurred_at)
            .map(|e| e.occurred_at)
            .max();
        match last {
            // no prior event of this type: nothing to throttle against
            None => true,
            Some(last) => trigger_event.occurred_at - last >= Duration::minutes(min_minutes),
        }
    }

    fn evaluate_first_occurrence(history: &[Event], trigger_event: &Event) -> bool {
        !history
            .iter()
            .any(|e| e.event_type == trigger_event.event_type && e.occurred_at < trigger_event.occurred_at)
    }
}

/// `time_window_minutes = None` means "no window" (search all history);
/// `Some(0)` means "zero-length window" (only events at the exact same
/// instant as the trigger) -- spec §9 Open Questions resolution.
fn within_window(occurred_at: DateTime<Utc>, trigger_at: DateTime<Utc>, window_minutes: Option<i64>) -> bool {
    if occurred_at > trigger_at {
        return false;
    }
    match window_minutes {
        None => true,
        Some(minutes) => trigger_at - occurred_at <= Duration::minutes(minutes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn event(kind: &str, offset_minutes: i64, attrs: Map<String, Value>) -> Event {
        Event::new(
            None,
            kind,
            "u1",
            Utc::now() + Duration::minutes(offset_minutes),
            attrs,
        )
        .unwrap()
    }

    #[test]
    fn always_true_is_always_true() {
        let registry = ConditionPluginRegistry::new();
        let engine = ConditionEngine::new(&registry);
        let trigger = event("ANYTHING", 0, Map::new());
        let condition = Condition::AlwaysTrue { condition_id: "c1".into() };
        assert!(engine.evaluate(&condition, &[], &trigger));
    }

    #[test]
    fn threshold_gte_matches_scenario_3() {
        let registry = ConditionPluginRegistry::new();
        let engine = ConditionEngine::new(&registry);
        let mut attrs = Map::new();
        attrs.insert("amount".to_string(), Value::from(150));
        let trigger = event("USER_PURCHASED_PRODUCT", 0, attrs);

        let condition = Condition::Threshold {
            condition_id: "c1".into(),
            attribute_name: "amount".into(),
            threshold: 100.0,
            operation: ThresholdOp::Ge,
        };
        assert!(engine.evaluate(&condition, &[], &trigger));

        let mut low_attrs = Map::new();
        low_attrs.insert("amount".to_string(), Value::from(99));
        let low_trigger = event("USER_PURCHASED_PRODUCT", 0, low_attrs);
        assert!(!engine.evaluate(&condition, &[], &low_trigger));
    }

    #[test]
    fn first_occurrence_true_when_no_earlier_event_of_type() {
        let registry = ConditionPluginRegistry::new();
        let engine = ConditionEngine::new(&registry);
        let trigger = event("USER_COMMENTED", 0, Map::new());
        let condition = Condition::FirstOccurrence { condition_id: "c1".into() };
        assert!(engine.evaluate(&condition, &[], &trigger));

        let earlier = event("USER_COMMENTED", -10, Map::new());
        assert!(!engine.evaluate(&condition, &[earlier], &trigger));
    }

    #[test]
    fn count_condition_respects_time_window() {
        let registry = ConditionPluginRegistry::new();
        let engine = ConditionEngine::new(&registry);
        let trigger = event("USER_LOGIN", 0, Map::new());
        let within = event("USER_LOGIN", -30, Map::new());
        let outside = event("USER_LOGIN", -2000, Map::new());

        let condition = Condition::Count {
            condition_id: "c1".into(),
            event_type: "USER_LOGIN".into(),
            min_count: 2,
            time_window_minutes: Some(1440),
        };
        assert!(!engine.evaluate(&condition, std::slice::from_ref(&within), &trigger));
        assert!(engine.evaluate(&condition, &[within.clone(), outside], &trigger));
    }

    #[test]
    fn sequence_zero_window_matches_only_simultaneous_events() {
        let registry = ConditionPluginRegistry::new();
        let engine = ConditionEngine::new(&registry);
        let now = Utc::now();
        let e1 = Event::new(None, "A", "u1", now, Map::new()).unwrap();
        let e2 = Event::new(None, "B", "u1", now, Map::new()).unwrap();
        let trigger = Event::new(None, "B", "u1", now, Map::new()).unwrap();

        let condition = Condition::Sequence {
            condition_id: "c1".into(),
            event_types: vec!["A".into(), "B".into()],
            time_window_minutes: 0,
        };
        assert!(engine.evaluate(&condition, &[e1, e2], &trigger));
    }

    #[test]
    fn sequence_fails_when_out_of_window() {
        let registry = ConditionPluginRegistry::new();
        let engine = ConditionEngine::new(&registry);
        let e1 = event("A", -100, Map::new());
        let e2 = event("B", -1, Map::new());
        let trigger = event("B", 0, Map::new());

        let condition = Condition::Sequence {
            condition_id: "c1".into(),
            event_types: vec!["A".into(), "B".into()],
            time_window_minutes: 5,
        };
        assert!(!engine.evaluate(&condition, &[e1, e2], &trigger));
    }

    #[test]
    fn time_since_last_event_true_when_no_prior_event() {
        let registry = ConditionPluginRegistry::new();
        let engine = ConditionEngine::new(&registry);
        let trigger = event("USER_LOGIN", 0, Map::new());
        let condition = Condition::TimeSinceLastEvent {
            condition_id: "c1".into(),
            event_type: "USER_LOGIN".into(),
            min_minutes: 60,
        };
        assert!(engine.evaluate(&condition, &[], &trigger));
    }

    #[test]
    fn time_since_last_event_false_when_too_recent() {
        let registry = ConditionPluginRegistry::new();
        let engine = ConditionEngine::new(&registry);
        let recent = event("USER_LOGIN", -10, Map::new());
        let trigger = event("USER_LOGIN", 0, Map::new());
        let condition = Condition::TimeSinceLastEvent {
            condition_id: "c1".into(),
            event_type: "USER_LOGIN".into(),
            min_minutes: 60,
        };
        assert!(!engine.evaluate(&condition, &[recent], &trigger));
    }

    #[test]
    fn unregistered_plugin_fails_closed() {
        let registry = ConditionPluginRegistry::new();
        let engine = ConditionEngine::new(&registry);
        let trigger = event("X", 0, Map::new());
        let condition = Condition::Plugin {
            condition_id: "c1".into(),
            type_tag: "not-registered".into(),
            parameters: Map::new(),
        };
        assert!(!engine.evaluate(&condition, &[], &trigger));
    }
}
