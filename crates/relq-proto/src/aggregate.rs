//! Aggregate and group-by arguments and results.

use serde::{Deserialize, Serialize};

use crate::filter::{Condition, Filter};
use crate::query::{OrderBy, SortOrder};
use crate::value::Value;

/// Aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    Avg,
    Sum,
    Min,
    Max,
}

impl AggregateFunction {
    /// Name as written in a request (`_count`, `_avg`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "_count",
            AggregateFunction::Avg => "_avg",
            AggregateFunction::Sum => "_sum",
            AggregateFunction::Min => "_min",
            AggregateFunction::Max => "_max",
        }
    }
}

/// Which counts to compute.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CountAggregate {
    /// Count every record (`_all`).
    #[serde(default)]
    pub all: bool,
    /// Count non-null values of these fields.
    #[serde(default)]
    pub fields: Vec<String>,
}

/// Requested aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AggregateSelection {
    #[serde(default)]
    pub count: Option<CountAggregate>,
    #[serde(default)]
    pub avg: Vec<String>,
    #[serde(default)]
    pub sum: Vec<String>,
    #[serde(default)]
    pub min: Vec<String>,
    #[serde(default)]
    pub max: Vec<String>,
}

impl AggregateSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every record.
    pub fn count_all(mut self) -> Self {
        self.count.get_or_insert_with(CountAggregate::default).all = true;
        self
    }

    /// Count non-null values of a field.
    pub fn count_field(mut self, field: impl Into<String>) -> Self {
        self.count
            .get_or_insert_with(CountAggregate::default)
            .fields
            .push(field.into());
        self
    }

    pub fn avg(mut self, field: impl Into<String>) -> Self {
        self.avg.push(field.into());
        self
    }

    pub fn sum(mut self, field: impl Into<String>) -> Self {
        self.sum.push(field.into());
        self
    }

    pub fn min(mut self, field: impl Into<String>) -> Self {
        self.min.push(field.into());
        self
    }

    pub fn max(mut self, field: impl Into<String>) -> Self {
        self.max.push(field.into());
        self
    }

    /// Check if no aggregate is requested.
    pub fn is_empty(&self) -> bool {
        self.count.is_none()
            && self.avg.is_empty()
            && self.sum.is_empty()
            && self.min.is_empty()
            && self.max.is_empty()
    }
}

/// Arguments of `aggregate`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateArgs {
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub cursor: Option<Filter>,
    #[serde(default)]
    pub take: Option<i64>,
    #[serde(default)]
    pub skip: Option<u64>,
    #[serde(default)]
    pub aggregates: AggregateSelection,
}

impl AggregateArgs {
    pub fn new(aggregates: AggregateSelection) -> Self {
        Self {
            aggregates,
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Filter over groups, applied after aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HavingFilter {
    /// Condition on a grouping field.
    Field {
        field: String,
        conditions: Vec<Condition>,
    },
    /// Condition on an aggregate. `field: None` with `Count` means `_count._all`.
    Aggregate {
        function: AggregateFunction,
        field: Option<String>,
        conditions: Vec<Condition>,
    },
    And(Vec<HavingFilter>),
    Or(Vec<HavingFilter>),
    Not(Vec<HavingFilter>),
}

/// Ordering of groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupOrderBy {
    /// Order by a grouping field.
    Field(OrderBy),
    /// Order by an aggregate. `field: None` with `Count` means `_count._all`.
    Aggregate {
        function: AggregateFunction,
        field: Option<String>,
        order: SortOrder,
    },
}

/// Arguments of `groupBy`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupByArgs {
    pub by: Vec<String>,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub having: Option<HavingFilter>,
    #[serde(default)]
    pub order_by: Vec<GroupOrderBy>,
    #[serde(default)]
    pub take: Option<i64>,
    #[serde(default)]
    pub skip: Option<u64>,
    #[serde(default)]
    pub aggregates: AggregateSelection,
}

impl GroupByArgs {
    pub fn new<I, S>(by: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            by: by.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_having(mut self, having: HavingFilter) -> Self {
        self.having = Some(having);
        self
    }

    pub fn with_aggregates(mut self, aggregates: AggregateSelection) -> Self {
        self.aggregates = aggregates;
        self
    }

    pub fn order_by(mut self, order: GroupOrderBy) -> Self {
        self.order_by.push(order);
        self
    }
}

/// Computed counts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CountResult {
    /// `_count._all`, when requested.
    pub all: Option<u64>,
    /// Non-null counts per requested field.
    pub fields: Vec<(String, u64)>,
}

impl CountResult {
    /// Count for a field.
    pub fn field(&self, name: &str) -> Option<u64> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, c)| *c)
    }
}

/// Computed aggregates. Averages and sums over no values are `Value::Null`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregateResult {
    pub count: Option<CountResult>,
    pub avg: Vec<(String, Value)>,
    pub sum: Vec<(String, Value)>,
    pub min: Vec<(String, Value)>,
    pub max: Vec<(String, Value)>,
}

impl AggregateResult {
    /// Look up an aggregate value.
    ///
    /// For `Count`, `field: None` returns `_all`.
    pub fn get(&self, function: AggregateFunction, field: Option<&str>) -> Option<Value> {
        let lookup = |list: &[(String, Value)]| {
            field.and_then(|f| list.iter().find(|(n, _)| n == f).map(|(_, v)| v.clone()))
        };
        match function {
            AggregateFunction::Count => {
                let count = self.count.as_ref()?;
                let n = match field {
                    None => count.all?,
                    Some(f) => count.field(f)?,
                };
                Some(Value::Int(n as i64))
            }
            AggregateFunction::Avg => lookup(&self.avg),
            AggregateFunction::Sum => lookup(&self.sum),
            AggregateFunction::Min => lookup(&self.min),
            AggregateFunction::Max => lookup(&self.max),
        }
    }
}

/// One group of a `groupBy` result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GroupRow {
    /// Values of the grouping fields.
    pub keys: Vec<(String, Value)>,
    pub aggregates: AggregateResult,
}

impl GroupRow {
    /// Value of a grouping field.
    pub fn key(&self, field: &str) -> Option<&Value> {
        self.keys.iter().find(|(n, _)| n == field).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_builder() {
        let sel = AggregateSelection::new()
            .count_all()
            .count_field("email")
            .sum("amount")
            .avg("amount");
        assert!(!sel.is_empty());
        let count = sel.count.as_ref().unwrap();
        assert!(count.all);
        assert_eq!(count.fields, vec!["email".to_string()]);
        assert!(AggregateSelection::new().is_empty());
    }

    #[test]
    fn test_result_lookup() {
        let result = AggregateResult {
            count: Some(CountResult {
                all: Some(3),
                fields: vec![("email".into(), 2)],
            }),
            sum: vec![("amount".into(), Value::Int(15))],
            ..Default::default()
        };
        assert_eq!(result.get(AggregateFunction::Count, None), Some(Value::Int(3)));
        assert_eq!(
            result.get(AggregateFunction::Count, Some("email")),
            Some(Value::Int(2))
        );
        assert_eq!(
            result.get(AggregateFunction::Sum, Some("amount")),
            Some(Value::Int(15))
        );
        assert_eq!(result.get(AggregateFunction::Max, Some("amount")), None);
    }
}
