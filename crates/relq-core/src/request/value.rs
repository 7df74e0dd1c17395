//! Field values, including the tagged `{"$type": …}` forms.

use chrono::{DateTime, Utc};
use relq_proto::{NullKind, Value};
use serde_json::Value as JsonValue;

use super::{check_keys, Object};
use crate::catalog::{FieldDescriptor, ScalarKind};
use crate::error::{Error, Result};

/// A value written with an explicit `$type` tag.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Tagged {
    Null(NullKind),
    DateTime(DateTime<Utc>),
}

/// Read a tagged value, if `value` is one.
pub(super) fn tagged(value: &JsonValue, at: &str) -> Result<Option<Tagged>> {
    let Some(map) = value.as_object() else {
        return Ok(None);
    };
    let Some(tag) = map.get("$type") else {
        return Ok(None);
    };
    let tag = tag
        .as_str()
        .ok_or_else(|| Error::validation(format!("`{}`: `$type` must be a string", at)))?;
    let null = |kind| -> Result<Option<Tagged>> {
        check_keys(map, &["$type"], at)?;
        Ok(Some(Tagged::Null(kind)))
    };
    match tag {
        "DbNull" => null(NullKind::Db),
        "JsonNull" => null(NullKind::Json),
        "AnyNull" => null(NullKind::Any),
        "DateTime" => {
            check_keys(map, &["$type", "value"], at)?;
            let raw = map.get("value").and_then(JsonValue::as_str).ok_or_else(|| {
                Error::validation(format!("`{}`: tagged DateTime needs a string `value`", at))
            })?;
            Ok(Some(Tagged::DateTime(timestamp(raw, at)?)))
        }
        other => Err(Error::validation(format!(
            "`{}`: unknown value type `{}`",
            at, other
        ))),
    }
}

/// Check if an object is a tagged value rather than an argument object.
pub(super) fn is_tagged(map: &Object) -> bool {
    map.contains_key("$type")
}

/// Decode a value for a field. Plain `null` is the database null, except on
/// JSON fields, where it is rejected as ambiguous.
pub(super) fn field_value(field: &FieldDescriptor, value: &JsonValue, at: &str) -> Result<Value> {
    if value.is_null() {
        if field.kind == ScalarKind::Json {
            return Err(ambiguous_null(at));
        }
        return Ok(Value::Null);
    }
    scalar(field.kind, value, at)
}

/// Decode a non-null value of a kind.
pub(super) fn scalar(kind: ScalarKind, value: &JsonValue, at: &str) -> Result<Value> {
    match tagged(value, at)? {
        Some(Tagged::DateTime(ts)) if kind == ScalarKind::DateTime => {
            return Ok(Value::DateTime(ts))
        }
        Some(_) => {
            return Err(Error::validation(format!(
                "`{}`: tagged value is not valid for a {} field",
                at,
                kind.as_str()
            )))
        }
        None => {}
    }

    let decoded = match (kind, value) {
        (ScalarKind::Json, v) => Some(Value::Json(v.clone())),
        (ScalarKind::String, JsonValue::String(s)) => Some(Value::String(s.clone())),
        (ScalarKind::Int, v) => v.as_i64().map(Value::Int),
        (ScalarKind::Float, v) => v.as_f64().map(Value::Float),
        (ScalarKind::Boolean, JsonValue::Bool(b)) => Some(Value::Bool(*b)),
        (ScalarKind::DateTime, JsonValue::String(s)) => Some(Value::DateTime(timestamp(s, at)?)),
        (ScalarKind::StringList, JsonValue::Array(items)) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .map(Value::StringList),
        _ => None,
    };
    decoded.ok_or_else(|| {
        Error::validation(format!(
            "`{}` expects {}, got {}",
            at,
            kind.as_str(),
            json_type(value)
        ))
    })
}

pub(super) fn ambiguous_null(at: &str) -> Error {
    Error::validation(format!(
        "`{}`: plain null is ambiguous on a Json field; use {{\"$type\": \"DbNull\"}} or {{\"$type\": \"JsonNull\"}}",
        at
    ))
}

fn timestamp(raw: &str, at: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::validation(format!("`{}`: invalid RFC 3339 timestamp: {}", at, e)))
}

fn json_type(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
