//! Filter input types.
//!
//! A [`Filter`] is the caller-facing `where` tree. It names fields and
//! relations by string and is checked against the model registry before it
//! becomes an executable predicate.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Which null a null test matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NullKind {
    /// The database null (field holds no value).
    Db,
    /// The JSON `null` literal inside a structured field.
    Json,
    /// Either of the above.
    Any,
}

/// Case sensitivity of string comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum QueryMode {
    #[default]
    Default,
    Insensitive,
}

/// A condition on a JSON field, evaluated at a path inside the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JsonCondition {
    Equals(serde_json::Value),
    StringContains(String),
    StringStartsWith(String),
    StringEndsWith(String),
    /// Array at the path contains the given element (or every element of the given array).
    ArrayContains(serde_json::Value),
    Lt(serde_json::Value),
    Lte(serde_json::Value),
    Gt(serde_json::Value),
    Gte(serde_json::Value),
}

/// A single condition on a scalar field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Field equals value. `Value::Null` tests for the database null.
    Equals(Value),
    /// Field does not equal value.
    Not(Value),
    /// Negation of a nested condition list.
    NotWith(Vec<Condition>),
    In(Vec<Value>),
    NotIn(Vec<Value>),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    /// Case mode for the string conditions of the same field filter.
    Mode(QueryMode),
    IsNull(NullKind),
    IsNotNull(NullKind),
    /// String list contains the element.
    Has(String),
    HasEvery(Vec<String>),
    HasSome(Vec<String>),
    IsEmpty(bool),
    /// Condition on a value inside a JSON document.
    Path {
        path: Vec<String>,
        condition: JsonCondition,
    },
}

/// Quantified filter over a relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RelationFilter {
    /// At least one related record matches (to-many).
    Some(Box<Filter>),
    /// Every related record matches (to-many).
    Every(Box<Filter>),
    /// No related record matches (to-many).
    None(Box<Filter>),
    /// The related record exists and matches; `Is(None)` tests that it is absent (to-one).
    Is(Option<Box<Filter>>),
    /// The related record is absent or does not match; `IsNot(None)` tests that it exists (to-one).
    IsNot(Option<Box<Filter>>),
    /// Quantifier left to the relation's cardinality: `Some` for to-many, `Is` for to-one.
    Matches(Box<Filter>),
}

/// A filter expression over a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// All conditions hold for a scalar field.
    Field {
        field: String,
        conditions: Vec<Condition>,
    },
    /// Quantified filter over a relation.
    Relation {
        relation: String,
        filter: RelationFilter,
    },
    /// All sub-filters hold. Empty means true.
    And(Vec<Filter>),
    /// At least one sub-filter holds. Empty means false.
    Or(Vec<Filter>),
    /// None of the sub-filters hold.
    Not(Vec<Filter>),
}

impl Filter {
    /// Filter on a field with a list of conditions.
    pub fn field(field: impl Into<String>, conditions: Vec<Condition>) -> Self {
        Filter::Field {
            field: field.into(),
            conditions,
        }
    }

    /// Field equals value.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, vec![Condition::Equals(value.into())])
    }

    /// Field does not equal value.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, vec![Condition::Not(value.into())])
    }

    /// Field is less than value.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, vec![Condition::Lt(value.into())])
    }

    /// Field is greater than value.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, vec![Condition::Gt(value.into())])
    }

    /// Field is greater than or equal to value.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::field(field, vec![Condition::Gte(value.into())])
    }

    /// Field is one of the values.
    pub fn is_in(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::field(field, vec![Condition::In(values)])
    }

    /// String field contains the substring.
    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::field(field, vec![Condition::Contains(needle.into())])
    }

    /// Field is null of the given kind.
    pub fn is_null(field: impl Into<String>, kind: NullKind) -> Self {
        Self::field(field, vec![Condition::IsNull(kind)])
    }

    /// Filter over a relation.
    pub fn relation(relation: impl Into<String>, filter: RelationFilter) -> Self {
        Filter::Relation {
            relation: relation.into(),
            filter,
        }
    }

    /// Some related record matches.
    pub fn some(relation: impl Into<String>, filter: Filter) -> Self {
        Self::relation(relation, RelationFilter::Some(Box::new(filter)))
    }

    /// Every related record matches.
    pub fn every(relation: impl Into<String>, filter: Filter) -> Self {
        Self::relation(relation, RelationFilter::Every(Box::new(filter)))
    }

    /// No related record matches.
    pub fn none(relation: impl Into<String>, filter: Filter) -> Self {
        Self::relation(relation, RelationFilter::None(Box::new(filter)))
    }

    /// The related record exists and matches.
    pub fn is(relation: impl Into<String>, filter: Filter) -> Self {
        Self::relation(relation, RelationFilter::Is(Some(Box::new(filter))))
    }

    /// Conjunction.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Disjunction.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Negation of the conjunction of the filters.
    pub fn not(filter: Filter) -> Self {
        Filter::Not(vec![filter])
    }
}
