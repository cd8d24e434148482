//! Attribute comparators, dispatched by attribute data type.

use chrono::TimeDelta;
use serde_json::Value;

use super::context::EvaluationContext;
use super::{AttributeConditionData, AttributeLogic};
use crate::attributes::{
    get_attribute_type, parse_datetime, value_as_f64, AttributeBizType, AttributeType,
};
use crate::types::Timestamp;

/// Evaluate an attribute condition against one of the context snapshots.
///
/// Absent and `null` values only satisfy `empty`; every other comparator
/// reports `false` for them.
pub(super) fn evaluate(
    biz_type: AttributeBizType,
    data: &AttributeConditionData,
    ctx: &EvaluationContext,
) -> bool {
    let value = ctx
        .attributes(biz_type)
        .get(&data.attr_code)
        .filter(|v| !v.is_null());

    match data.logic {
        AttributeLogic::Empty => return value.map_or(true, is_empty_value),
        AttributeLogic::Any => return value.is_some_and(|v| !is_empty_value(v)),
        _ => {}
    }

    let Some(value) = value else {
        return false;
    };

    let data_type = ctx
        .attribute_type(biz_type, &data.attr_code)
        .unwrap_or_else(|| get_attribute_type(value));

    match data_type {
        AttributeType::String => compare_string(data, value),
        AttributeType::Number => compare_number(data, value),
        AttributeType::Boolean => compare_boolean(data, value),
        AttributeType::List => compare_list(data, value),
        AttributeType::DateTime => compare_datetime(data, value, ctx.now),
        AttributeType::Nil => false,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn compare_string(data: &AttributeConditionData, value: &Value) -> bool {
    let (Some(actual), Some(expected)) = (
        value_as_string(value),
        data.value.as_ref().and_then(value_as_string),
    ) else {
        return false;
    };

    match data.logic {
        AttributeLogic::Is => actual == expected,
        AttributeLogic::Not => actual != expected,
        AttributeLogic::Contains => actual.contains(&expected),
        AttributeLogic::NotContain => !actual.contains(&expected),
        AttributeLogic::StartsWith => actual.starts_with(&expected),
        AttributeLogic::EndsWith => actual.ends_with(&expected),
        _ => false,
    }
}

fn compare_number(data: &AttributeConditionData, value: &Value) -> bool {
    let (Some(actual), Some(expected)) =
        (value_as_f64(value), data.value.as_ref().and_then(value_as_f64))
    else {
        return false;
    };

    match data.logic {
        AttributeLogic::Is => actual == expected,
        AttributeLogic::Not => actual != expected,
        AttributeLogic::IsLessThan => actual < expected,
        AttributeLogic::IsLessThanOrEqualTo => actual <= expected,
        AttributeLogic::IsGreaterThan => actual > expected,
        AttributeLogic::IsGreaterThanOrEqualTo => actual >= expected,
        AttributeLogic::Between => data
            .value2
            .as_ref()
            .and_then(value_as_f64)
            .is_some_and(|upper| actual >= expected && actual <= upper),
        _ => false,
    }
}

fn compare_boolean(data: &AttributeConditionData, value: &Value) -> bool {
    let actual = match value {
        Value::Bool(b) => *b,
        Value::String(s) if s == "true" => true,
        Value::String(s) if s == "false" => false,
        _ => return false,
    };

    match data.logic {
        AttributeLogic::True => actual,
        AttributeLogic::False => !actual,
        _ => false,
    }
}

fn compare_list(data: &AttributeConditionData, value: &Value) -> bool {
    if data.list_values.is_empty() {
        return false;
    }
    let actual: &[Value] = match value {
        Value::Array(items) => items,
        scalar => std::slice::from_ref(scalar),
    };
    let included = |expected: &Value| actual.contains(expected);

    match data.logic {
        AttributeLogic::IncludesAtLeastOne => data.list_values.iter().any(included),
        AttributeLogic::IncludesAll => data.list_values.iter().all(included),
        AttributeLogic::NotIncludesAtLeastOne => !data.list_values.iter().all(included),
        AttributeLogic::NotIncludesAll => !data.list_values.iter().any(included),
        _ => false,
    }
}

fn compare_datetime(data: &AttributeConditionData, value: &Value, now: Timestamp) -> bool {
    let Some(actual) = value.as_str().and_then(parse_datetime) else {
        return false;
    };
    let Some(expected) = data.value.as_ref() else {
        return false;
    };

    match data.logic {
        AttributeLogic::LessThan | AttributeLogic::Exactly | AttributeLogic::MoreThan => {
            let Some(days) = value_as_f64(expected) else {
                return false;
            };
            let Some(threshold) = TimeDelta::try_seconds((days * 86_400.0) as i64)
                .and_then(|ago| now.checked_sub_signed(ago))
            else {
                return false;
            };
            match data.logic {
                AttributeLogic::LessThan => actual > threshold,
                AttributeLogic::MoreThan => actual < threshold,
                _ => actual.date_naive() == threshold.date_naive(),
            }
        }
        AttributeLogic::Before | AttributeLogic::On | AttributeLogic::After => {
            let Some(target) = expected.as_str().and_then(parse_datetime) else {
                return false;
            };
            let (actual_day, target_day) = (actual.date_naive(), target.date_naive());
            match data.logic {
                AttributeLogic::Before => actual_day < target_day,
                AttributeLogic::After => actual_day > target_day,
                _ => actual_day == target_day,
            }
        }
        _ => false,
    }
}
