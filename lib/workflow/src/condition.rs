//! Condition evaluation over JSON scopes.
//!
//! Fields are dotted paths (`trigger.score`, `context.tags.0`) into the
//! execution scope `{trigger, context}`.

use crate::node::{ConditionNodeConfig, ConditionOperator};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

/// Looks up a dotted path. Numeric segments index into arrays.
#[must_use]
pub fn resolve<'a>(scope: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    path.split('.')
        .filter(|segment| !segment.is_empty())
        .try_fold(scope, |value, segment| match value {
            JsonValue::Object(map) => map.get(segment),
            JsonValue::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
}

/// Evaluates a condition node against a scope.
#[must_use]
pub fn evaluate(config: &ConditionNodeConfig, scope: &JsonValue) -> bool {
    compare(config.operator, resolve(scope, &config.field), &config.value)
}

/// Applies an operator to a looked-up value.
///
/// Missing values and `null` behave the same. Ordering operators are false
/// unless both sides are numbers (or numeric strings) or both are strings.
#[must_use]
pub fn compare(operator: ConditionOperator, actual: Option<&JsonValue>, expected: &JsonValue) -> bool {
    let actual = actual.unwrap_or(&JsonValue::Null);
    match operator {
        ConditionOperator::Exists => !actual.is_null(),
        ConditionOperator::NotExists => actual.is_null(),
        ConditionOperator::Eq => loose_eq(actual, expected),
        ConditionOperator::Ne => !loose_eq(actual, expected),
        ConditionOperator::Gt => order(actual, expected) == Some(Ordering::Greater),
        ConditionOperator::Gte => matches!(
            order(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        ConditionOperator::Lt => order(actual, expected) == Some(Ordering::Less),
        ConditionOperator::Lte => matches!(
            order(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        ConditionOperator::Contains => contains(actual, expected),
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loose_eq(actual: &JsonValue, expected: &JsonValue) -> bool {
    if actual == expected {
        return true;
    }
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn order(actual: &JsonValue, expected: &JsonValue) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
        return a.partial_cmp(&b);
    }
    match (actual, expected) {
        (JsonValue::String(a), JsonValue::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn contains(actual: &JsonValue, expected: &JsonValue) -> bool {
    match (actual, expected) {
        (JsonValue::String(haystack), JsonValue::String(needle)) => haystack.contains(needle.as_str()),
        (JsonValue::Array(items), _) => items.iter().any(|item| loose_eq(item, expected)),
        (JsonValue::Object(map), JsonValue::String(key)) => map.contains_key(key),
        _ => false,
    }
}
