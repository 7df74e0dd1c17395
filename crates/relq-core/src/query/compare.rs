//! Value comparison and row ordering.

use std::cmp::Ordering;

use relq_proto::{NullsOrder, OrderBy, SortOrder, Value};

use crate::storage::Row;

/// Compare two non-null values of compatible kinds.
///
/// Returns `None` for nulls and for values that have no mutual order.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Json(a), Value::Json(b)) => compare_json(a, b),
        _ => None,
    }
}

/// Compare two JSON scalars (numbers with numbers, strings with strings).
pub fn compare_json(a: &serde_json::Value, b: &serde_json::Value) -> Option<Ordering> {
    match (a, b) {
        (serde_json::Value::Number(a), serde_json::Value::Number(b)) => {
            a.as_f64()?.partial_cmp(&b.as_f64()?)
        }
        (serde_json::Value::String(a), serde_json::Value::String(b)) => Some(a.cmp(b)),
        (serde_json::Value::Bool(a), serde_json::Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Equality with numeric widening. Database null equals nothing.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
            compare_values(a, b) == Some(Ordering::Equal)
        }
        _ => a == b,
    }
}

/// Compare two rows under an ordering.
///
/// Without an explicit null placement, nulls sort before every value in
/// ascending order and after every value in descending order.
pub fn compare_rows(a: &Row, b: &Row, order: &[OrderBy]) -> Ordering {
    for spec in order {
        let ord = compare_ordered(a.value(&spec.field), b.value(&spec.field), spec.order, spec.nulls);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Compare two values under a direction and null placement.
pub fn compare_ordered(
    a: &Value,
    b: &Value,
    order: SortOrder,
    nulls: Option<NullsOrder>,
) -> Ordering {
    let null_first = match nulls {
        Some(NullsOrder::First) => Ordering::Less,
        Some(NullsOrder::Last) => Ordering::Greater,
        None if order == SortOrder::Asc => Ordering::Less,
        None => Ordering::Greater,
    };
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => null_first,
        (false, true) => null_first.reverse(),
        (false, false) => {
            let ord = compare_values(a, b).unwrap_or(Ordering::Equal);
            match order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            }
        }
    }
}
