//! Trigger configuration and event matching.
//!
//! A workflow's trigger says which external events fire it. Events are
//! produced by collaborators (metric jobs, survey intake, the cron service)
//! and handed to the trigger evaluator as [`TriggerEvent`]s.

use crate::condition;
use crate::node::ConditionOperator;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// The kind of event that fires a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// A student metric crossed a threshold.
    MetricThreshold,
    /// A survey answer was submitted.
    SurveyResponse,
    /// A cron schedule ticked.
    Schedule,
    /// A staff member ran the workflow by hand.
    Manual,
    /// A named platform event occurred.
    Event,
}

impl TriggerType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetricThreshold => "metric_threshold",
            Self::SurveyResponse => "survey_response",
            Self::Schedule => "schedule",
            Self::Manual => "manual",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration of what fires a workflow.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Fires when `metric` compared with `threshold` by `operator` holds.
    ///
    /// Events carry `{"metric": name, "value": number}`.
    MetricThreshold {
        metric: String,
        operator: ConditionOperator,
        threshold: f64,
    },
    /// Fires on answers to a survey, optionally one question or one answer.
    ///
    /// Events carry `{"survey_id", "question_id", "answer"}`.
    SurveyResponse {
        survey_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        question_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        answer: Option<JsonValue>,
    },
    /// Fires when the cron service reports this expression as due.
    ///
    /// Events carry `{"cron": expression}`.
    Schedule {
        cron: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    /// Fired only by id, never by broadcast events.
    #[default]
    Manual,
    /// Fires on a named platform event. Events carry `{"name": name}`.
    Event { name: String },
}

impl TriggerConfig {
    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::MetricThreshold { .. } => TriggerType::MetricThreshold,
            Self::SurveyResponse { .. } => TriggerType::SurveyResponse,
            Self::Schedule { .. } => TriggerType::Schedule,
            Self::Manual => TriggerType::Manual,
            Self::Event { .. } => TriggerType::Event,
        }
    }

    /// Returns true if `event` should fire a workflow with this trigger.
    #[must_use]
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        if event.trigger_type != self.trigger_type() {
            return false;
        }
        let payload = &event.payload;
        let field = |name: &str| condition::resolve(payload, name);

        match self {
            Self::MetricThreshold {
                metric,
                operator,
                threshold,
            } => {
                field("metric").and_then(JsonValue::as_str) == Some(metric.as_str())
                    && condition::compare(*operator, field("value"), &JsonValue::from(*threshold))
            }
            Self::SurveyResponse {
                survey_id,
                question_id,
                answer,
            } => {
                field("survey_id").and_then(JsonValue::as_str) == Some(survey_id.as_str())
                    && question_id.as_ref().is_none_or(|q| {
                        field("question_id").and_then(JsonValue::as_str) == Some(q.as_str())
                    })
                    && answer.as_ref().is_none_or(|a| {
                        condition::compare(ConditionOperator::Eq, field("answer"), a)
                    })
            }
            Self::Schedule { cron, .. } => {
                field("cron").and_then(JsonValue::as_str) == Some(cron.as_str())
            }
            Self::Manual => false,
            Self::Event { name } => field("name").and_then(JsonValue::as_str) == Some(name.as_str()),
        }
    }
}

/// An external event offered to the trigger evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub trigger_type: TriggerType,
    /// Event data. Becomes the execution's trigger data when it fires.
    pub payload: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

impl TriggerEvent {
    #[must_use]
    pub fn new(trigger_type: TriggerType, payload: JsonValue, occurred_at: DateTime<Utc>) -> Self {
        Self {
            trigger_type,
            payload,
            occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(trigger_type: TriggerType, payload: JsonValue) -> TriggerEvent {
        TriggerEvent::new(trigger_type, payload, Utc::now())
    }

    #[test]
    fn metric_threshold_compares_value() {
        let config = TriggerConfig::MetricThreshold {
            metric: "attendance_rate".to_string(),
            operator: ConditionOperator::Lt,
            threshold: 0.8,
        };

        let low = event(
            TriggerType::MetricThreshold,
            json!({ "metric": "attendance_rate", "value": 0.65, "student_id": "s-9" }),
        );
        let fine = event(
            TriggerType::MetricThreshold,
            json!({ "metric": "attendance_rate", "value": 0.95 }),
        );
        let other = event(
            TriggerType::MetricThreshold,
            json!({ "metric": "gpa", "value": 0.5 }),
        );

        assert!(config.matches(&low));
        assert!(!config.matches(&fine));
        assert!(!config.matches(&other));
    }

    #[test]
    fn survey_filters_are_optional() {
        let any_answer = TriggerConfig::SurveyResponse {
            survey_id: "wellbeing".to_string(),
            question_id: None,
            answer: None,
        };
        let specific = TriggerConfig::SurveyResponse {
            survey_id: "wellbeing".to_string(),
            question_id: Some("q3".to_string()),
            answer: Some(json!("struggling")),
        };
        let response = event(
            TriggerType::SurveyResponse,
            json!({ "survey_id": "wellbeing", "question_id": "q3", "answer": "fine" }),
        );

        assert!(any_answer.matches(&response));
        assert!(!specific.matches(&response));
    }

    #[test]
    fn type_mismatch_never_matches() {
        let config = TriggerConfig::Event {
            name: "student.enrolled".to_string(),
        };
        let wrong_type = event(TriggerType::Schedule, json!({ "name": "student.enrolled" }));
        assert!(!config.matches(&wrong_type));
        assert!(config.matches(&event(TriggerType::Event, json!({ "name": "student.enrolled" }))));
    }

    #[test]
    fn manual_triggers_ignore_broadcasts() {
        assert!(!TriggerConfig::Manual.matches(&event(TriggerType::Manual, json!({}))));
    }

    #[test]
    fn config_json_is_tagged_by_type() {
        let config: TriggerConfig = serde_json::from_value(json!({
            "type": "schedule",
            "cron": "0 7 * * MON",
            "timezone": "America/Chicago"
        }))
        .expect("deserialize");
        assert_eq!(config.trigger_type(), TriggerType::Schedule);
        assert!(config.matches(&event(TriggerType::Schedule, json!({ "cron": "0 7 * * MON" }))));
    }
}
