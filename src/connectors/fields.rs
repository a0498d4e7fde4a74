//! Field lookup helpers shared by the vendor mappers.
//!
//! Vendors spell the same field several ways (`StudentID`, `StudentId`,
//! `student_id`) and mix numeric and string identifiers. Each helper takes an
//! ordered list of candidate keys; dotted keys walk nested objects.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use super::error::MappingError;

/// Resolves a possibly dotted key (`name.first_name`) against a JSON object.
fn lookup<'a>(payload: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.')
        .try_fold(payload, |current, segment| current.get(segment))
        .filter(|value| !value.is_null())
}

/// First candidate that is present, not null and not blank.
pub fn first_value<'a>(payload: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().filter_map(|key| lookup(payload, key)).find(|value| match value {
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    })
}

/// First candidate rendered as a trimmed string; numbers and booleans are stringified.
pub fn first_string(payload: &Value, keys: &[&str]) -> Option<String> {
    first_value(payload, keys).and_then(|value| match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

pub fn first_f64(payload: &Value, keys: &[&str]) -> Option<f64> {
    first_value(payload, keys).and_then(|value| match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

pub fn first_u32(payload: &Value, keys: &[&str]) -> Option<u32> {
    first_value(payload, keys).and_then(|value| match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Booleans, `"true"`/`"false"`, `"Y"`/`"N"` and `1`/`0` are accepted.
pub fn first_bool(payload: &Value, keys: &[&str]) -> Option<bool> {
    first_value(payload, keys).and_then(|value| match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "y" | "yes" | "1" => Some(true),
            "false" | "n" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

/// Accepts `YYYY-MM-DD`, `MM/DD/YYYY` or an RFC 3339 timestamp (date part kept).
pub fn first_date(payload: &Value, keys: &[&str]) -> Option<NaiveDate> {
    first_string(payload, keys).and_then(|raw| parse_date(&raw))
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
        .or_else(|| parse_datetime(raw).map(|dt| dt.date_naive()))
}

pub fn first_datetime(payload: &Value, keys: &[&str]) -> Option<DateTime<Utc>> {
    first_string(payload, keys).and_then(|raw| parse_datetime(&raw))
}

pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Like [`first_string`], failing with a descriptive [`MappingError`] when absent.
pub fn require_string(
    vendor: &str,
    entity: &'static str,
    field: &'static str,
    payload: &Value,
    keys: &[&str],
) -> Result<String, MappingError> {
    first_string(payload, keys).ok_or_else(|| MappingError::missing(vendor, entity, field))
}

/// Collections that may arrive as an array, a single object, or not at all.
pub fn one_or_many(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(single) => vec![single.clone()],
    }
}
