//! Backend-agnostic predicate trees and their evaluation.
//!
//! A [`PredicateNode`] is the compiled, registry-checked form of a filter.
//! Relation quantifiers carry their resolved join columns so any backend can
//! evaluate them without consulting the registry.

use relq_proto::{NullKind, Value};

use super::compare::{compare_json, compare_values, values_equal};
use crate::catalog::JoinKeys;
use crate::storage::{Row, StoreError};

/// String comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOp {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
}

/// Test on a value inside a JSON document.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonTest {
    Equals(serde_json::Value),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    ArrayContains(serde_json::Value),
    Lt(serde_json::Value),
    Lte(serde_json::Value),
    Gt(serde_json::Value),
    Gte(serde_json::Value),
}

/// Test on a single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldTest {
    Eq(Value),
    /// Not equal; false on null.
    Ne(Value),
    In(Vec<Value>),
    /// Not in the list; false on null.
    NotIn(Vec<Value>),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Text {
        op: TextOp,
        needle: String,
        insensitive: bool,
    },
    Null(NullKind),
    NotNull(NullKind),
    Has(String),
    HasEvery(Vec<String>),
    HasSome(Vec<String>),
    IsEmpty(bool),
    JsonPath { path: Vec<String>, test: JsonTest },
}

/// How related records are quantified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Any,
    All,
    None,
    Is,
    IsNot,
}

/// Quantified condition over the records of a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationPredicate {
    pub relation: String,
    /// Target model.
    pub target: String,
    pub join: JoinKeys,
    pub quantifier: Quantifier,
    /// Condition on related records. `None` with `Is`/`IsNot` tests absence/presence.
    pub predicate: Option<Box<PredicateNode>>,
}

/// A compiled predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum PredicateNode {
    Const(bool),
    Field { field: String, test: FieldTest },
    And(Vec<PredicateNode>),
    Or(Vec<PredicateNode>),
    Not(Box<PredicateNode>),
    Relation(RelationPredicate),
}

/// Access to related records during evaluation.
pub trait RelatedRows {
    /// Rows of `model` whose `field` equals `key`.
    fn related(&self, model: &str, field: &str, key: &Value) -> Result<Vec<Row>, StoreError>;
}

/// A [`RelatedRows`] with no records, for predicates without relation conditions.
pub struct NoRelations;

impl RelatedRows for NoRelations {
    fn related(&self, _: &str, _: &str, _: &Value) -> Result<Vec<Row>, StoreError> {
        Ok(Vec::new())
    }
}

impl PredicateNode {
    /// Field equals value.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        PredicateNode::Field {
            field: field.into(),
            test: FieldTest::Eq(value),
        }
    }

    /// Field is one of the values.
    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        PredicateNode::Field {
            field: field.into(),
            test: FieldTest::In(values),
        }
    }

    /// Conjunction, flattening trivial cases.
    pub fn all(mut nodes: Vec<PredicateNode>) -> Self {
        nodes.retain(|n| *n != PredicateNode::Const(true));
        match nodes.len() {
            0 => PredicateNode::Const(true),
            1 => nodes.remove(0),
            _ => PredicateNode::And(nodes),
        }
    }

    /// Conjunction of two optional predicates.
    pub fn conjoin(a: Option<PredicateNode>, b: Option<PredicateNode>) -> Option<PredicateNode> {
        match (a, b) {
            (Some(a), Some(b)) => Some(PredicateNode::all(vec![a, b])),
            (a, None) => a,
            (None, b) => b,
        }
    }

    /// Evaluate against a row. Rows whose result is unknown do not match.
    pub fn evaluate(&self, row: &Row, related: &dyn RelatedRows) -> Result<bool, StoreError> {
        Ok(self.truth(row, related)? == Some(true))
    }

    /// Three-valued evaluation: `None` is unknown, as when a comparison meets
    /// a null field. `NOT` of unknown stays unknown.
    pub fn truth(&self, row: &Row, related: &dyn RelatedRows) -> Result<Option<bool>, StoreError> {
        match self {
            PredicateNode::Const(b) => Ok(Some(*b)),
            PredicateNode::Field { field, test } => Ok(test.test(row.value(field))),
            PredicateNode::And(nodes) => {
                let mut unknown = false;
                for node in nodes {
                    match node.truth(row, related)? {
                        Some(false) => return Ok(Some(false)),
                        None => unknown = true,
                        Some(true) => {}
                    }
                }
                Ok(if unknown { None } else { Some(true) })
            }
            PredicateNode::Or(nodes) => {
                let mut unknown = false;
                for node in nodes {
                    match node.truth(row, related)? {
                        Some(true) => return Ok(Some(true)),
                        None => unknown = true,
                        Some(false) => {}
                    }
                }
                Ok(if unknown { None } else { Some(false) })
            }
            PredicateNode::Not(node) => Ok(node.truth(row, related)?.map(|b| !b)),
            PredicateNode::Relation(rel) => rel.evaluate(row, related).map(Some),
        }
    }
}

impl RelationPredicate {
    fn evaluate(&self, row: &Row, related: &dyn RelatedRows) -> Result<bool, StoreError> {
        let key = row.value(&self.join.local);
        let rows = if key.is_null() {
            Vec::new()
        } else {
            related.related(&self.target, &self.join.foreign, key)?
        };

        let Some(predicate) = &self.predicate else {
            return Ok(match self.quantifier {
                Quantifier::Any | Quantifier::IsNot => !rows.is_empty(),
                Quantifier::All => true,
                Quantifier::None | Quantifier::Is => rows.is_empty(),
            });
        };

        let (mut matched, mut failed) = (0usize, 0usize);
        for r in &rows {
            match predicate.truth(r, related)? {
                Some(true) => matched += 1,
                Some(false) => failed += 1,
                None => {}
            }
        }
        Ok(match self.quantifier {
            Quantifier::Any | Quantifier::Is => matched > 0,
            // every: no related record fails the condition
            Quantifier::All => failed == 0,
            Quantifier::None | Quantifier::IsNot => matched == 0,
        })
    }
}

impl FieldTest {
    /// Three-valued check: unknown when a comparison meets a database null.
    pub fn test(&self, value: &Value) -> Option<bool> {
        let null_aware = match self {
            FieldTest::Null(_) | FieldTest::NotNull(_) => true,
            FieldTest::Eq(expected) => expected.is_null(),
            _ => false,
        };
        if value.is_null() && !null_aware {
            return None;
        }
        Some(self.matches(value))
    }

    /// Check a field value. Comparisons against a database null are false.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldTest::Eq(expected) => values_equal(value, expected),
            FieldTest::Ne(expected) => !value.is_null() && !values_equal(value, expected),
            FieldTest::In(list) => list.iter().any(|v| values_equal(value, v)),
            FieldTest::NotIn(list) => {
                !value.is_null() && !list.iter().any(|v| values_equal(value, v))
            }
            FieldTest::Lt(bound) => compare_values(value, bound).is_some_and(|o| o.is_lt()),
            FieldTest::Lte(bound) => compare_values(value, bound).is_some_and(|o| o.is_le()),
            FieldTest::Gt(bound) => compare_values(value, bound).is_some_and(|o| o.is_gt()),
            FieldTest::Gte(bound) => compare_values(value, bound).is_some_and(|o| o.is_ge()),
            FieldTest::Text {
                op,
                needle,
                insensitive,
            } => match value.as_str() {
                Some(s) => text_matches(*op, s, needle, *insensitive),
                None => false,
            },
            FieldTest::Null(kind) => null_matches(*kind, value),
            FieldTest::NotNull(kind) => !null_matches(*kind, value),
            FieldTest::Has(item) => value
                .as_string_list()
                .is_some_and(|list| list.contains(item)),
            FieldTest::HasEvery(items) => value
                .as_string_list()
                .is_some_and(|list| items.iter().all(|i| list.contains(i))),
            FieldTest::HasSome(items) => value
                .as_string_list()
                .is_some_and(|list| items.iter().any(|i| list.contains(i))),
            FieldTest::IsEmpty(empty) => value
                .as_string_list()
                .is_some_and(|list| list.is_empty() == *empty),
            FieldTest::JsonPath { path, test } => match value.as_json() {
                Some(doc) => json_at(doc, path).is_some_and(|v| test.matches(v)),
                None => false,
            },
        }
    }
}

fn null_matches(kind: NullKind, value: &Value) -> bool {
    match kind {
        NullKind::Db => value.is_null(),
        NullKind::Json => value.is_json_null(),
        NullKind::Any => value.is_null() || value.is_json_null(),
    }
}

fn text_matches(op: TextOp, haystack: &str, needle: &str, insensitive: bool) -> bool {
    let (h, n) = if insensitive {
        (haystack.to_lowercase(), needle.to_lowercase())
    } else {
        (haystack.to_string(), needle.to_string())
    };
    match op {
        TextOp::Equals => h == n,
        TextOp::NotEquals => h != n,
        TextOp::Contains => h.contains(&n),
        TextOp::StartsWith => h.starts_with(&n),
        TextOp::EndsWith => h.ends_with(&n),
    }
}

/// Walk a path of object keys (or array indices) into a document.
fn json_at<'a>(doc: &'a serde_json::Value, path: &[String]) -> Option<&'a serde_json::Value> {
    path.iter().try_fold(doc, |current, segment| match current {
        serde_json::Value::Object(map) => map.get(segment),
        serde_json::Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

impl JsonTest {
    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            JsonTest::Equals(expected) => {
                value == expected || compare_json(value, expected).is_some_and(|o| o.is_eq())
            }
            JsonTest::Contains(s) => value.as_str().is_some_and(|v| v.contains(s.as_str())),
            JsonTest::StartsWith(s) => value.as_str().is_some_and(|v| v.starts_with(s.as_str())),
            JsonTest::EndsWith(s) => value.as_str().is_some_and(|v| v.ends_with(s.as_str())),
            JsonTest::ArrayContains(expected) => match (value, expected) {
                (serde_json::Value::Array(items), serde_json::Value::Array(wanted)) => {
                    wanted.iter().all(|w| items.contains(w))
                }
                (serde_json::Value::Array(items), single) => items.contains(single),
                _ => false,
            },
            JsonTest::Lt(bound) => compare_json(value, bound).is_some_and(|o| o.is_lt()),
            JsonTest::Lte(bound) => compare_json(value, bound).is_some_and(|o| o.is_le()),
            JsonTest::Gt(bound) => compare_json(value, bound).is_some_and(|o| o.is_gt()),
            JsonTest::Gte(bound) => compare_json(value, bound).is_some_and(|o| o.is_ge()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field(field: &str, test: FieldTest) -> PredicateNode {
        PredicateNode::Field {
            field: field.into(),
            test,
        }
    }

    #[test]
    fn test_comparisons() {
        let row = Row::new().with("age", 30).with("name", "Alice").with("nick", Value::Null);

        assert!(field("age", FieldTest::Gte(Value::Int(30))).evaluate(&row, &NoRelations).unwrap());
        assert!(!field("age", FieldTest::Lt(Value::Int(30))).evaluate(&row, &NoRelations).unwrap());
        assert!(field("age", FieldTest::In(vec![Value::Int(1), Value::Int(30)]))
            .evaluate(&row, &NoRelations)
            .unwrap());
        assert!(!field("nick", FieldTest::Ne(Value::from("x")))
            .evaluate(&row, &NoRelations)
            .unwrap());
        assert!(!field("nick", FieldTest::NotIn(vec![Value::from("x")]))
            .evaluate(&row, &NoRelations)
            .unwrap());
    }

    #[test]
    fn test_text_modes() {
        let row = Row::new().with("email", "Alice@Example.com");
        let contains = |insensitive| {
            field(
                "email",
                FieldTest::Text {
                    op: TextOp::Contains,
                    needle: "example".into(),
                    insensitive,
                },
            )
        };
        assert!(!contains(false).evaluate(&row, &NoRelations).unwrap());
        assert!(contains(true).evaluate(&row, &NoRelations).unwrap());
    }

    #[test]
    fn test_null_kinds() {
        let db = Value::Null;
        let json = Value::json_null();
        let doc = Value::Json(json!({"a": 1}));

        assert!(FieldTest::Null(NullKind::Db).matches(&db));
        assert!(!FieldTest::Null(NullKind::Db).matches(&json));
        assert!(FieldTest::Null(NullKind::Json).matches(&json));
        assert!(!FieldTest::Null(NullKind::Json).matches(&db));
        assert!(FieldTest::Null(NullKind::Any).matches(&db));
        assert!(FieldTest::Null(NullKind::Any).matches(&json));
        assert!(!FieldTest::Null(NullKind::Any).matches(&doc));
        assert!(FieldTest::NotNull(NullKind::Any).matches(&doc));
    }

    #[test]
    fn test_string_lists() {
        let tags = Value::StringList(vec!["a".into(), "b".into()]);
        assert!(FieldTest::Has("a".into()).matches(&tags));
        assert!(FieldTest::HasEvery(vec!["a".into(), "b".into()]).matches(&tags));
        assert!(!FieldTest::HasEvery(vec!["a".into(), "c".into()]).matches(&tags));
        assert!(FieldTest::HasSome(vec!["c".into(), "b".into()]).matches(&tags));
        assert!(FieldTest::IsEmpty(false).matches(&tags));
    }

    #[test]
    fn test_json_path() {
        let doc = Value::Json(json!({"plan": {"name": "pro", "seats": 5, "tags": ["x", "y"]}}));
        let at = |path: &[&str], test: JsonTest| FieldTest::JsonPath {
            path: path.iter().map(|s| s.to_string()).collect(),
            test,
        };
        assert!(at(&["plan", "name"], JsonTest::Equals(json!("pro"))).matches(&doc));
        assert!(at(&["plan", "seats"], JsonTest::Gt(json!(3))).matches(&doc));
        assert!(at(&["plan", "tags"], JsonTest::ArrayContains(json!("y"))).matches(&doc));
        assert!(at(&["plan", "tags", "0"], JsonTest::Equals(json!("x"))).matches(&doc));
        assert!(!at(&["plan", "missing"], JsonTest::Equals(json!(null))).matches(&doc));
        assert!(at(&["plan", "name"], JsonTest::StartsWith("pr".into())).matches(&doc));
    }

    struct Orders(Vec<Row>);

    impl RelatedRows for Orders {
        fn related(&self, _: &str, field: &str, key: &Value) -> Result<Vec<Row>, StoreError> {
            Ok(self
                .0
                .iter()
                .filter(|r| values_equal(r.value(field), key))
                .cloned()
                .collect())
        }
    }

    fn orders_rel(quantifier: Quantifier, predicate: Option<PredicateNode>) -> PredicateNode {
        PredicateNode::Relation(RelationPredicate {
            relation: "orders".into(),
            target: "Order".into(),
            join: JoinKeys {
                local: "id".into(),
                foreign: "userId".into(),
            },
            quantifier,
            predicate: predicate.map(Box::new),
        })
    }

    #[test]
    fn test_relation_quantifiers() {
        let orders = Orders(vec![
            Row::new().with("userId", "u1").with("amount", 5),
            Row::new().with("userId", "u1").with("amount", 10),
        ]);
        let u1 = Row::new().with("id", "u1");
        let u2 = Row::new().with("id", "u2");
        let big = || Some(field("amount", FieldTest::Gt(Value::Int(7))));

        assert!(orders_rel(Quantifier::Any, big()).evaluate(&u1, &orders).unwrap());
        assert!(!orders_rel(Quantifier::All, big()).evaluate(&u1, &orders).unwrap());
        assert!(!orders_rel(Quantifier::None, big()).evaluate(&u1, &orders).unwrap());

        // vacuous on an empty relation
        assert!(orders_rel(Quantifier::All, big()).evaluate(&u2, &orders).unwrap());
        assert!(orders_rel(Quantifier::None, big()).evaluate(&u2, &orders).unwrap());
        assert!(!orders_rel(Quantifier::Any, big()).evaluate(&u2, &orders).unwrap());

        assert!(orders_rel(Quantifier::Is, None).evaluate(&u2, &orders).unwrap());
        assert!(orders_rel(Quantifier::IsNot, None).evaluate(&u1, &orders).unwrap());
    }

    #[test]
    fn test_unknown_under_negation() {
        let row = Row::new().with("age", Value::Null);
        let gt = || field("age", FieldTest::Gt(Value::Int(3)));
        let not = |node| PredicateNode::Not(Box::new(node));

        assert_eq!(gt().truth(&row, &NoRelations).unwrap(), None);
        assert_eq!(not(gt()).truth(&row, &NoRelations).unwrap(), None);
        assert!(!not(gt()).evaluate(&row, &NoRelations).unwrap());

        let and = PredicateNode::And(vec![gt(), PredicateNode::Const(false)]);
        assert_eq!(and.truth(&row, &NoRelations).unwrap(), Some(false));
        assert!(not(and).evaluate(&row, &NoRelations).unwrap());

        let or = PredicateNode::Or(vec![gt(), PredicateNode::Const(false)]);
        assert_eq!(or.truth(&row, &NoRelations).unwrap(), None);

        let is_null = field("age", FieldTest::Null(NullKind::Db));
        assert!(!not(is_null).evaluate(&row, &NoRelations).unwrap());
    }

    #[test]
    fn test_every_ignores_unknown_related_rows() {
        let orders = Orders(vec![
            Row::new().with("userId", "u1").with("amount", 10),
            Row::new().with("userId", "u1").with("amount", Value::Null),
        ]);
        let u1 = Row::new().with("id", "u1");
        let big = || Some(field("amount", FieldTest::Gt(Value::Int(7))));

        assert!(orders_rel(Quantifier::All, big()).evaluate(&u1, &orders).unwrap());
        assert!(orders_rel(Quantifier::Any, big()).evaluate(&u1, &orders).unwrap());
        assert!(!orders_rel(Quantifier::None, big()).evaluate(&u1, &orders).unwrap());
    }

    #[test]
    fn test_all_flattens() {
        assert_eq!(PredicateNode::all(vec![]), PredicateNode::Const(true));
        let eq = PredicateNode::eq("id", Value::from("u1"));
        assert_eq!(
            PredicateNode::all(vec![PredicateNode::Const(true), eq.clone()]),
            eq
        );
    }
}
