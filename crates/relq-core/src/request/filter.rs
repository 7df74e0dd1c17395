//! `where`, `cursor` and `having` trees.

use relq_proto::{
    AggregateFunction, Condition, Filter, HavingFilter, JsonCondition, NullKind, QueryMode,
    RelationFilter, Value,
};
use serde_json::Value as JsonValue;

use super::value::{ambiguous_null, is_tagged, scalar, tagged, Tagged};
use super::{boolean, check_keys, object, required, string, string_list, Decoder, Object};
use crate::catalog::{FieldKind, ScalarKind};
use crate::error::{Error, Result};

const SCALAR_OPERATORS: &[&str] = &[
    "equals",
    "not",
    "in",
    "notIn",
    "lt",
    "lte",
    "gt",
    "gte",
    "contains",
    "startsWith",
    "endsWith",
    "mode",
    "has",
    "hasEvery",
    "hasSome",
    "isEmpty",
];
const JSON_OPERATORS: &[&str] = &[
    "path",
    "equals",
    "not",
    "string_contains",
    "string_starts_with",
    "string_ends_with",
    "array_contains",
    "lt",
    "lte",
    "gt",
    "gte",
];
const QUANTIFIERS: &[&str] = &["some", "every", "none", "is", "isNot"];

impl Decoder<'_> {
    /// The mandatory `where` of a unique operation.
    pub(super) fn required_where(&self, model: &str, args: &Object) -> Result<Filter> {
        self.filter(model, required(args, "where")?, "where")
    }

    pub(super) fn optional_where(&self, model: &str, args: &Object) -> Result<Option<Filter>> {
        args.get("where")
            .map(|w| self.filter(model, w, "where"))
            .transpose()
    }

    /// Decode a filter object. Sibling keys are conjoined.
    pub(super) fn filter(&self, model: &str, value: &JsonValue, at: &str) -> Result<Filter> {
        let map = object(value, at)?;
        let mut parts = Vec::with_capacity(map.len());
        for (key, value) in map {
            let path = format!("{}.{}", at, key);
            let part = match key.as_str() {
                "AND" => Filter::And(self.filter_list(model, value, &path)?),
                "OR" => {
                    let items = value.as_array().ok_or_else(|| {
                        Error::validation(format!("`{}` must be a list of filters", path))
                    })?;
                    Filter::Or(
                        items
                            .iter()
                            .map(|item| self.filter(model, item, &path))
                            .collect::<Result<_>>()?,
                    )
                }
                "NOT" => Filter::Not(self.filter_list(model, value, &path)?),
                name => match self.registry.field_type(model, name)? {
                    FieldKind::Scalar(field) => {
                        Filter::field(name, scalar_conditions(field.kind, value, &path)?)
                    }
                    FieldKind::Relation(relation) => Filter::relation(
                        name,
                        self.relation_filter(&relation.target, value, &path)?,
                    ),
                },
            };
            parts.push(part);
        }
        Ok(match parts.len() {
            1 => parts.remove(0),
            _ => Filter::And(parts),
        })
    }

    fn filter_list(&self, model: &str, value: &JsonValue, at: &str) -> Result<Vec<Filter>> {
        match value {
            JsonValue::Array(items) => items
                .iter()
                .map(|item| self.filter(model, item, at))
                .collect(),
            other => Ok(vec![self.filter(model, other, at)?]),
        }
    }

    fn relation_filter(&self, target: &str, value: &JsonValue, at: &str) -> Result<RelationFilter> {
        if value.is_null() {
            return Ok(RelationFilter::Is(None));
        }
        let map = object(value, at)?;
        if !map.keys().any(|k| QUANTIFIERS.contains(&k.as_str())) {
            return Ok(RelationFilter::Matches(Box::new(self.filter(target, value, at)?)));
        }
        check_keys(map, QUANTIFIERS, at)?;
        if map.len() > 1 {
            return Err(Error::validation(format!(
                "`{}`: use one relation quantifier per filter, combine them with AND",
                at
            )));
        }

        let (key, nested) = map
            .iter()
            .next()
            .ok_or_else(|| Error::validation(format!("`{}` is empty", at)))?;
        let path = format!("{}.{}", at, key);
        let boxed = |v: &JsonValue| -> Result<Box<Filter>> {
            Ok(Box::new(self.filter(target, v, &path)?))
        };
        let optional = |v: &JsonValue| -> Result<Option<Box<Filter>>> {
            if v.is_null() {
                Ok(None)
            } else {
                boxed(v).map(Some)
            }
        };
        Ok(match key.as_str() {
            "some" => RelationFilter::Some(boxed(nested)?),
            "every" => RelationFilter::Every(boxed(nested)?),
            "none" => RelationFilter::None(boxed(nested)?),
            "is" => RelationFilter::Is(optional(nested)?),
            _ => RelationFilter::IsNot(optional(nested)?),
        })
    }

    /// Decode a `having` tree.
    pub(super) fn having(&self, model: &str, value: &JsonValue, at: &str) -> Result<HavingFilter> {
        let map = object(value, at)?;
        let mut parts = Vec::new();
        for (key, value) in map {
            let path = format!("{}.{}", at, key);
            match key.as_str() {
                "AND" | "OR" | "NOT" => {
                    let nested = match value {
                        JsonValue::Array(items) => items
                            .iter()
                            .map(|item| self.having(model, item, &path))
                            .collect::<Result<Vec<_>>>()?,
                        other => vec![self.having(model, other, &path)?],
                    };
                    parts.push(match key.as_str() {
                        "AND" => HavingFilter::And(nested),
                        "OR" => HavingFilter::Or(nested),
                        _ => HavingFilter::Not(nested),
                    });
                }
                name if name.starts_with('_') => {
                    let function = aggregate_function(name, &path)?;
                    for (field, conditions) in object(value, &path)? {
                        let nested = format!("{}.{}", path, field);
                        let field = match field.as_str() {
                            "_all" if function == AggregateFunction::Count => None,
                            name => Some(name.to_string()),
                        };
                        let kind = self.aggregate_kind(model, function, field.as_deref())?;
                        parts.push(HavingFilter::Aggregate {
                            function,
                            field,
                            conditions: scalar_conditions(kind, conditions, &nested)?,
                        });
                    }
                }
                name => {
                    let kind = self.scalar_kind(model, name)?;
                    let Some(map) = value.as_object().filter(|m| !is_tagged(m)) else {
                        parts.push(HavingFilter::Field {
                            field: name.to_string(),
                            conditions: scalar_conditions(kind, value, &path)?,
                        });
                        continue;
                    };
                    let mut plain = Object::new();
                    for (op, operand) in map {
                        if op.starts_with('_') {
                            let function = aggregate_function(op, &path)?;
                            let kind = self.aggregate_kind(model, function, Some(name))?;
                            parts.push(HavingFilter::Aggregate {
                                function,
                                field: Some(name.to_string()),
                                conditions: scalar_conditions(
                                    kind,
                                    operand,
                                    &format!("{}.{}", path, op),
                                )?,
                            });
                        } else {
                            plain.insert(op.clone(), operand.clone());
                        }
                    }
                    if !plain.is_empty() {
                        parts.push(HavingFilter::Field {
                            field: name.to_string(),
                            conditions: scalar_conditions(kind, &JsonValue::Object(plain), &path)?,
                        });
                    }
                }
            }
        }
        Ok(match parts.len() {
            1 => parts.remove(0),
            _ => HavingFilter::And(parts),
        })
    }

    pub(super) fn scalar_kind(&self, model: &str, field: &str) -> Result<ScalarKind> {
        match self.registry.field_type(model, field)? {
            FieldKind::Scalar(f) => Ok(f.kind),
            FieldKind::Relation(_) => Err(Error::validation(format!(
                "`{}` is a relation and cannot be aggregated",
                field
            ))),
        }
    }

    /// Kind of the value an aggregate produces.
    fn aggregate_kind(
        &self,
        model: &str,
        function: AggregateFunction,
        field: Option<&str>,
    ) -> Result<ScalarKind> {
        let source = field.map(|f| self.scalar_kind(model, f)).transpose()?;
        Ok(match (function, source) {
            (AggregateFunction::Count, _) => ScalarKind::Int,
            (AggregateFunction::Avg, _) => ScalarKind::Float,
            (_, Some(kind)) => kind,
            (_, None) => {
                return Err(Error::validation(format!(
                    "`{}` needs a field",
                    function.as_str()
                )))
            }
        })
    }
}

/// Parse an aggregate key such as `_sum`.
pub(super) fn aggregate_function(name: &str, at: &str) -> Result<AggregateFunction> {
    match name {
        "_count" => Ok(AggregateFunction::Count),
        "_avg" => Ok(AggregateFunction::Avg),
        "_sum" => Ok(AggregateFunction::Sum),
        "_min" => Ok(AggregateFunction::Min),
        "_max" => Ok(AggregateFunction::Max),
        other => Err(Error::validation(format!(
            "unknown aggregate `{}` in {}",
            other, at
        ))),
    }
}

/// Conditions on a field of `kind`, from a shorthand value or an operator object.
fn scalar_conditions(kind: ScalarKind, value: &JsonValue, at: &str) -> Result<Vec<Condition>> {
    if kind == ScalarKind::Json {
        return json_conditions(value, at);
    }
    let map = match value {
        JsonValue::Object(map) if !is_tagged(map) => map,
        other => return Ok(vec![Condition::Equals(nullable(kind, other, at)?)]),
    };
    check_keys(map, SCALAR_OPERATORS, at)?;

    let mut conditions = Vec::with_capacity(map.len());
    for (op, operand) in map {
        let path = format!("{}.{}", at, op);
        let condition = match op.as_str() {
            "equals" => Condition::Equals(nullable(kind, operand, &path)?),
            "not" => match operand {
                JsonValue::Object(nested) if !is_tagged(nested) => {
                    Condition::NotWith(scalar_conditions(kind, operand, &path)?)
                }
                other => Condition::Not(nullable(kind, other, &path)?),
            },
            "in" | "notIn" => {
                let items = operand.as_array().ok_or_else(|| {
                    Error::validation(format!("`{}` must be a list", path))
                })?;
                let values = items
                    .iter()
                    .map(|item| nullable(kind, item, &path))
                    .collect::<Result<Vec<_>>>()?;
                if op == "in" {
                    Condition::In(values)
                } else {
                    Condition::NotIn(values)
                }
            }
            "lt" => Condition::Lt(scalar(kind, operand, &path)?),
            "lte" => Condition::Lte(scalar(kind, operand, &path)?),
            "gt" => Condition::Gt(scalar(kind, operand, &path)?),
            "gte" => Condition::Gte(scalar(kind, operand, &path)?),
            "contains" => Condition::Contains(string(operand, &path)?.to_string()),
            "startsWith" => Condition::StartsWith(string(operand, &path)?.to_string()),
            "endsWith" => Condition::EndsWith(string(operand, &path)?.to_string()),
            "mode" => Condition::Mode(match string(operand, &path)? {
                "default" => QueryMode::Default,
                "insensitive" => QueryMode::Insensitive,
                other => {
                    return Err(Error::validation(format!(
                        "`{}`: unknown mode `{}` (expected default or insensitive)",
                        path, other
                    )))
                }
            }),
            "has" => Condition::Has(string(operand, &path)?.to_string()),
            "hasEvery" => Condition::HasEvery(string_list(operand, &path)?),
            "hasSome" => Condition::HasSome(string_list(operand, &path)?),
            _ => Condition::IsEmpty(boolean(operand, &path)?),
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

/// A comparison operand where plain `null` means the database null.
fn nullable(kind: ScalarKind, value: &JsonValue, at: &str) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    scalar(kind, value, at)
}

/// Conditions on a JSON field. Plain values are document equality; nulls must be tagged.
fn json_conditions(value: &JsonValue, at: &str) -> Result<Vec<Condition>> {
    let map = match value {
        JsonValue::Object(map) if !is_tagged(map) => map,
        other => return Ok(vec![json_equals(other, at)?]),
    };
    check_keys(map, JSON_OPERATORS, at)?;
    let path = match map.get("path") {
        None => None,
        Some(JsonValue::String(segment)) => Some(vec![segment.clone()]),
        Some(other) => Some(string_list(other, &format!("{}.path", at))?),
    };

    let mut conditions = Vec::with_capacity(map.len());
    for (op, operand) in map {
        let here = format!("{}.{}", at, op);
        let condition = match (op.as_str(), &path) {
            ("path", _) => continue,
            ("equals", None) => json_equals(operand, &here)?,
            ("not", None) => match tagged(operand, &here)? {
                Some(Tagged::Null(kind)) => Condition::IsNotNull(kind),
                Some(Tagged::DateTime(_)) => return Err(not_json(&here)),
                None if operand.is_null() => return Err(ambiguous_null(&here)),
                None => Condition::Not(Value::Json(operand.clone())),
            },
            ("not", Some(path)) => Condition::NotWith(vec![Condition::Path {
                path: path.clone(),
                condition: JsonCondition::Equals(path_operand(operand, &here)?),
            }]),
            (op, path) => Condition::Path {
                path: path.clone().unwrap_or_default(),
                condition: json_condition(op, operand, &here)?,
            },
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

fn json_equals(value: &JsonValue, at: &str) -> Result<Condition> {
    match tagged(value, at)? {
        Some(Tagged::Null(kind)) => Ok(Condition::IsNull(kind)),
        Some(Tagged::DateTime(_)) => Err(not_json(at)),
        None if value.is_null() => Err(ambiguous_null(at)),
        None => Ok(Condition::Equals(Value::Json(value.clone()))),
    }
}

fn json_condition(op: &str, operand: &JsonValue, at: &str) -> Result<JsonCondition> {
    Ok(match op {
        "equals" => JsonCondition::Equals(path_operand(operand, at)?),
        "string_contains" => JsonCondition::StringContains(string(operand, at)?.to_string()),
        "string_starts_with" => JsonCondition::StringStartsWith(string(operand, at)?.to_string()),
        "string_ends_with" => JsonCondition::StringEndsWith(string(operand, at)?.to_string()),
        "array_contains" => JsonCondition::ArrayContains(operand.clone()),
        "lt" => JsonCondition::Lt(operand.clone()),
        "lte" => JsonCondition::Lte(operand.clone()),
        "gt" => JsonCondition::Gt(operand.clone()),
        _ => JsonCondition::Gte(operand.clone()),
    })
}

/// A value compared inside a document. The JSON `null` literal must be tagged.
fn path_operand(operand: &JsonValue, at: &str) -> Result<JsonValue> {
    match tagged(operand, at)? {
        Some(Tagged::Null(NullKind::Json)) => Ok(JsonValue::Null),
        Some(_) => Err(Error::validation(format!(
            "`{}`: only JsonNull can be compared inside a document",
            at
        ))),
        None if operand.is_null() => Err(ambiguous_null(at)),
        None => Ok(operand.clone()),
    }
}

fn not_json(at: &str) -> Error {
    Error::validation(format!("`{}`: a DateTime is not a JSON document", at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::shop;
    use serde_json::json;

    fn decode(model: &str, value: JsonValue) -> Result<Filter> {
        let registry = shop();
        Decoder {
            registry: &registry,
        }
        .filter(model, &value, "where")
    }

    #[test]
    fn test_shorthand_and_operators() {
        assert_eq!(
            decode("User", json!({"email": "a@x.io"})).unwrap(),
            Filter::eq("email", "a@x.io")
        );
        assert_eq!(
            decode("User", json!({"name": null})).unwrap(),
            Filter::eq("name", Value::Null)
        );
        assert_eq!(
            decode(
                "User",
                json!({"email": {"startsWith": "A", "mode": "insensitive"}})
            )
            .unwrap(),
            Filter::field(
                "email",
                vec![
                    Condition::Mode(QueryMode::Insensitive),
                    Condition::StartsWith("A".into())
                ]
            )
        );
        assert_eq!(
            decode("User", json!({"age": {"not": {"gt": 30}}})).unwrap(),
            Filter::field(
                "age",
                vec![Condition::NotWith(vec![Condition::Gt(Value::Int(30))])]
            )
        );
        assert_eq!(
            decode("User", json!({"tags": {"hasSome": ["a", "b"]}})).unwrap(),
            Filter::field(
                "tags",
                vec![Condition::HasSome(vec!["a".into(), "b".into()])]
            )
        );
    }

    #[test]
    fn test_logical_operators() {
        let filter = decode(
            "User",
            json!({"OR": [{"role": "admin"}, {"age": {"gte": 18}}], "NOT": {"email": "x@x.io"}}),
        )
        .unwrap();
        let Filter::And(parts) = filter else {
            panic!("expected a conjunction");
        };
        assert!(matches!(&parts[0], Filter::Not(items) if items.len() == 1));
        assert!(matches!(&parts[1], Filter::Or(items) if items.len() == 2));

        assert!(decode("User", json!({"OR": {"role": "admin"}})).is_err());
        assert_eq!(decode("User", json!({})).unwrap(), Filter::And(vec![]));
    }

    #[test]
    fn test_relation_filters() {
        assert_eq!(
            decode("User", json!({"orders": {"some": {"amount": {"gt": 10}}}})).unwrap(),
            Filter::some("orders", Filter::gt("amount", 10.0))
        );
        assert_eq!(
            decode("User", json!({"profile": null})).unwrap(),
            Filter::relation("profile", RelationFilter::Is(None))
        );
        assert_eq!(
            decode("Order", json!({"user": {"role": "admin"}})).unwrap(),
            Filter::relation(
                "user",
                RelationFilter::Matches(Box::new(Filter::eq("role", "admin")))
            )
        );
        assert!(decode("User", json!({"orders": {"some": {}, "role": "x"}})).is_err());
    }

    #[test]
    fn test_json_filters() {
        assert_eq!(
            decode("User", json!({"meta": {"equals": {"$type": "JsonNull"}}})).unwrap(),
            Filter::is_null("meta", NullKind::Json)
        );
        assert_eq!(
            decode("User", json!({"meta": {"$type": "AnyNull"}})).unwrap(),
            Filter::is_null("meta", NullKind::Any)
        );
        assert_eq!(
            decode(
                "User",
                json!({"meta": {"path": ["plan"], "string_starts_with": "pro"}})
            )
            .unwrap(),
            Filter::field(
                "meta",
                vec![Condition::Path {
                    path: vec!["plan".into()],
                    condition: JsonCondition::StringStartsWith("pro".into()),
                }]
            )
        );
        assert!(decode("User", json!({"meta": null})).is_err());
        assert!(decode("User", json!({"meta": {"equals": null}})).is_err());
    }

    #[test]
    fn test_having() {
        let registry = shop();
        let decoder = Decoder {
            registry: &registry,
        };
        let having = decoder
            .having(
                "Order",
                &json!({"amount": {"_sum": {"gt": 10}}, "_count": {"_all": {"gte": 2}}}),
                "having",
            )
            .unwrap();
        assert_eq!(
            having,
            HavingFilter::And(vec![
                HavingFilter::Aggregate {
                    function: AggregateFunction::Count,
                    field: None,
                    conditions: vec![Condition::Gte(Value::Int(2))],
                },
                HavingFilter::Aggregate {
                    function: AggregateFunction::Sum,
                    field: Some("amount".into()),
                    conditions: vec![Condition::Gt(Value::Float(10.0))],
                },
            ])
        );

        let having = decoder
            .having("Order", &json!({"status": "open"}), "having")
            .unwrap();
        assert_eq!(
            having,
            HavingFilter::Field {
                field: "status".into(),
                conditions: vec![Condition::Equals(Value::from("open"))],
            }
        );
        assert!(decoder
            .having("Order", &json!({"amount": {"_median": {"gt": 1}}}), "having")
            .is_err());
    }
}
