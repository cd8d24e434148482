//! Attribute snapshots, type inference, and merge-and-diff.
//!
//! Attributes are a flat mapping from an attribute code name to a scalar or
//! a list of scalars. Three snapshots are tracked per browser client (user,
//! company, membership); each one only changes through [`merge_attributes`],
//! which reports "no change" when the merged result is deep-equal to the
//! current snapshot.

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::Timestamp;

/// A flat attribute snapshot keyed by attribute code name.
pub type Attributes = Map<String, Value>;

/// Minimum length of a string before it is considered as a date candidate.
pub const MIN_DATE_STRING_LEN: usize = 10;

// ---------------------------------------------------------------------------
// Attribute type inference
// ---------------------------------------------------------------------------

/// Data type of an attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeType {
    Nil,
    Number,
    String,
    Boolean,
    List,
    DateTime,
}

/// Which entity an attribute belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeBizType {
    User,
    Company,
    Membership,
}

/// A known attribute definition (normally fetched from the data layer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeDefinition {
    pub code_name: String,
    pub biz_type: AttributeBizType,
    pub data_type: AttributeType,
}

/// Classify a raw attribute value.
///
/// Strings are classified as [`AttributeType::DateTime`] when they are at
/// least [`MIN_DATE_STRING_LEN`] characters long, are not purely numeric,
/// and parse as a date. This is a heuristic: a string such as
/// `"2024-01-01"` meant as a plain label will still be reported as a date.
pub fn get_attribute_type(value: &Value) -> AttributeType {
    match value {
        Value::Number(_) => AttributeType::Number,
        Value::String(s) if looks_like_datetime(s) => AttributeType::DateTime,
        Value::String(_) => AttributeType::String,
        Value::Bool(_) => AttributeType::Boolean,
        Value::Array(_) => AttributeType::List,
        Value::Null | Value::Object(_) => AttributeType::Nil,
    }
}

fn looks_like_datetime(s: &str) -> bool {
    s.len() >= MIN_DATE_STRING_LEN && s.trim().parse::<f64>().is_err() && parse_datetime(s).is_some()
}

/// Parse a date or date-time string in one of the commonly emitted formats.
///
/// Date-only values resolve to midnight UTC.
pub fn parse_datetime(s: &str) -> Option<Timestamp> {
    let s = s.trim();

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    const DATETIME_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
    ];
    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%B %d, %Y", "%b %d, %Y"];
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date
                .and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive));
        }
    }

    None
}

/// Coerce a value to a number. Numeric strings are accepted.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Infer definitions for every key in `attributes`.
///
/// Keys whose value is `null` are skipped since no type can be inferred.
pub fn infer_definitions(
    attributes: &Attributes,
    biz_type: AttributeBizType,
) -> Vec<AttributeDefinition> {
    attributes
        .iter()
        .filter_map(|(code_name, value)| {
            let data_type = get_attribute_type(value);
            (data_type != AttributeType::Nil).then(|| AttributeDefinition {
                code_name: code_name.clone(),
                biz_type,
                data_type,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Merge and diff
// ---------------------------------------------------------------------------

/// Merge `incoming` over `current`.
///
/// Returns `Some(merged)` when the merged snapshot differs from `current`
/// and `None` when the merge is a no-op.
pub fn merge_attributes(current: &Attributes, incoming: &Attributes) -> Option<Attributes> {
    let mut merged = current.clone();
    for (key, value) in incoming {
        merged.insert(key.clone(), value.clone());
    }
    if merged == *current {
        None
    } else {
        Some(merged)
    }
}
