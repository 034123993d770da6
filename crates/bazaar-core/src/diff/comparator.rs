//! Per-kind equivalence.

use crate::schema::FieldKind;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use std::borrow::Cow;

/// Equivalence test for a `custom` field, registered by field name.
pub trait FieldComparator: Send + Sync {
    fn equivalent(&self, old: &Value, new: &Value) -> bool;
}

impl<F> FieldComparator for F
where
    F: Fn(&Value, &Value) -> bool + Send + Sync,
{
    fn equivalent(&self, old: &Value, new: &Value) -> bool {
        self(old, new)
    }
}

/// Built-in equivalence for every kind except `Custom`, which returns `None`.
pub(super) fn builtin_equivalent(kind: FieldKind, old: &Value, new: &Value) -> Option<bool> {
    let equivalent = match kind {
        FieldKind::Text | FieldKind::Markdown => text_of(old) == text_of(new),
        FieldKind::TagSet => tag_set(old) == tag_set(new),
        FieldKind::Date => date_key(old) == date_key(new),
        FieldKind::ReferenceId => reference_id(old) == reference_id(new),
        FieldKind::Multichoice => choices(old) == choices(new),
        FieldKind::Checkbox => checked(old) == checked(new),
        FieldKind::Custom => return None,
    };
    Some(equivalent)
}

/// Missing and null both read as the empty string.
fn text_of(value: &Value) -> Cow<'_, str> {
    match value {
        Value::Null => Cow::Borrowed(""),
        Value::String(text) => Cow::Borrowed(text.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn tag_set(value: &Value) -> Vec<String> {
    let mut tags: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(scalar_string).collect(),
        other => scalar_string(other).into_iter().collect(),
    };
    tags.sort();
    tags.dedup();
    tags
}

#[derive(Debug, PartialEq)]
enum DateKey {
    Missing,
    Instant(i64),
    Unparsed(String),
}

fn date_key(value: &Value) -> DateKey {
    match value {
        Value::Null => DateKey::Missing,
        Value::Number(number) => number
            .as_i64()
            .map(DateKey::Instant)
            .unwrap_or_else(|| DateKey::Unparsed(number.to_string())),
        Value::String(text) if text.is_empty() => DateKey::Missing,
        Value::String(text) => parse_timestamp(text)
            .map(|instant| DateKey::Instant(instant.timestamp_millis()))
            .unwrap_or_else(|| DateKey::Unparsed(text.clone())),
        other => DateKey::Unparsed(other.to_string()),
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed.and_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
}

/// A reference may arrive bare (`"u1"`, `42`) or resolved (`{"id": "u1", ..}`).
fn reference_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(object) => object.get("id").and_then(scalar_string),
        other => scalar_string(other),
    }
}

fn choices(value: &Value) -> Vec<String> {
    let mut chosen: Vec<String> = match value {
        Value::Array(items) => items.iter().filter_map(reference_id).collect(),
        other => reference_id(other).into_iter().collect(),
    };
    chosen.sort();
    chosen
}

fn checked(value: &Value) -> bool {
    value.as_bool().unwrap_or(false)
}
