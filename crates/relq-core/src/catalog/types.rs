//! Scalar kinds and default values.

use chrono::Utc;
use relq_proto::Value;

/// Scalar data kinds supported by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Boolean,
    DateTime,
    /// Structured JSON document.
    Json,
    /// List of strings.
    StringList,
}

impl ScalarKind {
    /// Check if this kind is numeric.
    pub fn is_numeric(&self) -> bool {
        matches!(self, ScalarKind::Int | ScalarKind::Float)
    }

    /// Check if values of this kind have a total order usable by `lt`/`gt`, `min`/`max` and sorting.
    pub fn is_orderable(&self) -> bool {
        matches!(
            self,
            ScalarKind::String | ScalarKind::Int | ScalarKind::Float | ScalarKind::DateTime
        )
    }

    /// Check if this kind supports substring matching.
    pub fn is_string_like(&self) -> bool {
        matches!(self, ScalarKind::String)
    }

    /// Check if a non-null value fits this kind. Integers are accepted for floats.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ScalarKind::String, Value::String(_))
                | (ScalarKind::Int, Value::Int(_))
                | (ScalarKind::Float, Value::Float(_) | Value::Int(_))
                | (ScalarKind::Boolean, Value::Bool(_))
                | (ScalarKind::DateTime, Value::DateTime(_))
                | (ScalarKind::Json, Value::Json(_))
                | (ScalarKind::StringList, Value::StringList(_))
        )
    }

    /// Bring an accepted value into its canonical representation (integers become floats on float fields).
    pub fn coerce(&self, value: Value) -> Value {
        match (self, value) {
            (ScalarKind::Float, Value::Int(i)) => Value::Float(i as f64),
            (_, v) => v,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScalarKind::String => "String",
            ScalarKind::Int => "Int",
            ScalarKind::Float => "Float",
            ScalarKind::Boolean => "Boolean",
            ScalarKind::DateTime => "DateTime",
            ScalarKind::Json => "Json",
            ScalarKind::StringList => "String[]",
        }
    }
}

/// Default value applied when a field is absent from a create payload.
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// A fixed value.
    Static(Value),
    /// Current timestamp (evaluated at insert time).
    Now,
    /// Random v4 UUID rendered as a string.
    Uuid,
}

impl DefaultValue {
    /// Produce the value for a new record.
    pub fn generate(&self) -> Value {
        match self {
            DefaultValue::Static(v) => v.clone(),
            DefaultValue::Now => Value::DateTime(Utc::now()),
            DefaultValue::Uuid => Value::String(uuid::Uuid::new_v4().to_string()),
        }
    }

    /// Check if the default can populate a field of the given kind.
    pub fn fits(&self, kind: ScalarKind) -> bool {
        match self {
            DefaultValue::Static(Value::Null) => true,
            DefaultValue::Static(v) => kind.accepts(v),
            DefaultValue::Now => kind == ScalarKind::DateTime,
            DefaultValue::Uuid => kind == ScalarKind::String,
        }
    }
}
