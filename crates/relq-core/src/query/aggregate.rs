//! Aggregates and group-by.
//!
//! Requests are validated completely before any row is read. Computation is
//! done over fetched rows: counts, averages, sums, minimums and maximums per
//! set or per group.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use relq_proto::{
    AggregateArgs, AggregateFunction, AggregateResult, AggregateSelection, CountResult,
    FindManyArgs, GroupByArgs, GroupOrderBy, GroupRow, HavingFilter, OrderBy, Value,
};

use super::compare::{compare_rows, compare_values};
use super::filter::{compile_conditions, PredicateCompiler};
use super::pagination::paginate;
use super::planner::{LoadPlan, SelectionResolver};
use super::predicate::{NoRelations, PredicateNode};
use super::shaper::{count_value, group_row};
use crate::catalog::{FieldDescriptor, FieldKind, ModelDescriptor, ScalarKind, SchemaRegistry};
use crate::error::{Error, Result};
use crate::storage::{codec, Row};

/// An aggregate column such as `_sum.amount` or `_count._all`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub function: AggregateFunction,
    /// `None` only for `_count._all`.
    pub field: Option<String>,
}

impl Column {
    /// Name of the column in group rows used for `having` and ordering.
    pub fn name(&self) -> String {
        format!(
            "{}.{}",
            self.function.as_str(),
            self.field.as_deref().unwrap_or("_all")
        )
    }

    /// Compute the column over a set of rows.
    pub fn compute(&self, rows: &[Row]) -> Value {
        let Some(field) = &self.field else {
            return Value::Int(count_value(rows.len() as u64));
        };
        let values = rows.iter().map(|r| r.value(field)).filter(|v| !v.is_null());
        match self.function {
            AggregateFunction::Count => Value::Int(count_value(values.count() as u64)),
            AggregateFunction::Avg => average(values),
            AggregateFunction::Sum => sum(values),
            AggregateFunction::Min => extreme(values, Ordering::Less),
            AggregateFunction::Max => extreme(values, Ordering::Greater),
        }
    }
}

/// A validated `aggregate` request.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatePlan {
    /// Rows the aggregates run over.
    pub rows: LoadPlan,
    pub aggregates: AggregateSelection,
}

/// A validated `groupBy` request.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupByPlan {
    pub model: String,
    pub predicate: Option<PredicateNode>,
    pub by: Vec<String>,
    /// Evaluated over group rows: grouping fields plus aggregate columns.
    pub having: Option<PredicateNode>,
    pub order: Vec<OrderBy>,
    pub skip: usize,
    pub take: Option<i64>,
    pub aggregates: AggregateSelection,
    /// Columns referenced by `having` or `orderBy`.
    pub columns: Vec<Column>,
}

/// Validates aggregate and group-by requests.
pub struct AggregatePlanner<'a> {
    registry: &'a SchemaRegistry,
    max_depth: usize,
}

impl<'a> AggregatePlanner<'a> {
    pub fn new(registry: &'a SchemaRegistry, max_depth: usize) -> Self {
        Self {
            registry,
            max_depth,
        }
    }

    pub fn aggregate(&self, model: &str, args: &AggregateArgs) -> Result<AggregatePlan> {
        let descriptor = self.registry.describe(model)?;
        if args.aggregates.is_empty() {
            return Err(Error::validation(
                "aggregate needs at least one of _count, _avg, _sum, _min or _max",
            ));
        }
        validate_selection(descriptor, &args.aggregates)?;

        let find = FindManyArgs {
            filter: args.filter.clone(),
            order_by: args.order_by.clone(),
            cursor: args.cursor.clone(),
            take: args.take,
            skip: args.skip,
            ..Default::default()
        };
        let rows = SelectionResolver::new(self.registry, self.max_depth).resolve(model, &find)?;
        Ok(AggregatePlan {
            rows,
            aggregates: args.aggregates.clone(),
        })
    }

    pub fn group_by(&self, model: &str, args: &GroupByArgs) -> Result<GroupByPlan> {
        let descriptor = self.registry.describe(model)?;
        if args.by.is_empty() {
            return Err(Error::validation("groupBy needs at least one field in `by`"));
        }
        let mut by = HashSet::new();
        for field in &args.by {
            scalar(descriptor, field)?;
            if !by.insert(field.as_str()) {
                return Err(Error::validation(format!(
                    "field `{}` appears twice in `by`",
                    field
                )));
            }
        }
        validate_selection(descriptor, &args.aggregates)?;

        let mut columns = Vec::new();
        let having = match &args.having {
            Some(h) => Some(self.having(descriptor, &by, h, &mut columns)?),
            None => None,
        };

        let mut order = Vec::with_capacity(args.order_by.len());
        for spec in &args.order_by {
            match spec {
                GroupOrderBy::Field(o) => {
                    if !by.contains(o.field.as_str()) {
                        return Err(Error::validation(format!(
                            "groupBy orderBy field `{}` must be listed in `by`",
                            o.field
                        )));
                    }
                    order.push(o.clone());
                }
                GroupOrderBy::Aggregate {
                    function,
                    field,
                    order: direction,
                } => {
                    let column = Column {
                        function: *function,
                        field: field.clone(),
                    };
                    column_kind(descriptor, &column)?;
                    let mut o = OrderBy::asc(column.name());
                    o.order = *direction;
                    order.push(o);
                    push_unique(&mut columns, column);
                }
            }
        }
        if order.is_empty() && (args.take.is_some() || args.skip.is_some()) {
            return Err(Error::validation("groupBy take and skip require orderBy"));
        }

        let predicate = PredicateCompiler::new(self.registry)
            .compile_optional(model, args.filter.as_ref())?;
        let skip = usize::try_from(args.skip.unwrap_or(0))
            .map_err(|_| Error::validation("skip is too large"))?;

        Ok(GroupByPlan {
            model: model.to_string(),
            predicate,
            by: args.by.clone(),
            having,
            order,
            skip,
            take: args.take,
            aggregates: args.aggregates.clone(),
            columns,
        })
    }

    fn having(
        &self,
        descriptor: &ModelDescriptor,
        by: &HashSet<&str>,
        having: &HavingFilter,
        columns: &mut Vec<Column>,
    ) -> Result<PredicateNode> {
        let all = |filters: &[HavingFilter], columns: &mut Vec<Column>| {
            filters
                .iter()
                .map(|h| self.having(descriptor, by, h, columns))
                .collect::<Result<Vec<_>>>()
        };
        match having {
            HavingFilter::Field { field, conditions } => {
                let f = scalar(descriptor, field)?;
                if !by.contains(field.as_str()) {
                    return Err(Error::validation(format!(
                        "having field `{}` must be listed in `by`; aggregate it instead",
                        field
                    )));
                }
                compile_conditions(&f.name, f.kind, f.nullable, conditions)
            }
            HavingFilter::Aggregate {
                function,
                field,
                conditions,
            } => {
                let column = Column {
                    function: *function,
                    field: field.clone(),
                };
                let (kind, nullable) = column_kind(descriptor, &column)?;
                let node = compile_conditions(&column.name(), kind, nullable, conditions)?;
                push_unique(columns, column);
                Ok(node)
            }
            HavingFilter::And(filters) => Ok(PredicateNode::all(all(filters, columns)?)),
            HavingFilter::Or(filters) => {
                let mut nodes = all(filters, columns)?;
                Ok(match nodes.len() {
                    0 => PredicateNode::Const(false),
                    1 => nodes.remove(0),
                    _ => PredicateNode::Or(nodes),
                })
            }
            HavingFilter::Not(filters) => Ok(PredicateNode::all(
                all(filters, columns)?
                    .into_iter()
                    .map(|n| PredicateNode::Not(Box::new(n)))
                    .collect(),
            )),
        }
    }
}

/// Compute the requested aggregates over a set of rows.
pub fn compute(selection: &AggregateSelection, rows: &[Row]) -> AggregateResult {
    let columns = |function: AggregateFunction, fields: &[String]| -> Vec<(String, Value)> {
        fields
            .iter()
            .map(|f| {
                let column = Column {
                    function,
                    field: Some(f.clone()),
                };
                (f.clone(), column.compute(rows))
            })
            .collect()
    };

    let count = selection.count.as_ref().map(|c| CountResult {
        all: c.all.then_some(rows.len() as u64),
        fields: c
            .fields
            .iter()
            .map(|f| {
                let n = rows.iter().filter(|r| !r.value(f).is_null()).count();
                (f.clone(), n as u64)
            })
            .collect(),
    });

    AggregateResult {
        count,
        avg: columns(AggregateFunction::Avg, &selection.avg),
        sum: columns(AggregateFunction::Sum, &selection.sum),
        min: columns(AggregateFunction::Min, &selection.min),
        max: columns(AggregateFunction::Max, &selection.max),
    }
}

/// Group fetched rows, filter groups with `having`, order and paginate them.
pub fn group(plan: &GroupByPlan, rows: Vec<Row>) -> Result<Vec<GroupRow>> {
    let mut order_of: HashMap<Vec<u8>, usize> = HashMap::new();
    let mut groups: Vec<Vec<Row>> = Vec::new();
    for row in rows {
        let key = codec::encode_key(&row.project(&plan.by))?;
        match order_of.get(&key) {
            Some(&i) => groups[i].push(row),
            None => {
                order_of.insert(key, groups.len());
                groups.push(vec![row]);
            }
        }
    }

    let mut kept: Vec<(Row, GroupRow)> = Vec::with_capacity(groups.len());
    for members in groups {
        let first = &members[0];
        let mut summary = Row::new();
        for field in &plan.by {
            summary.set(field.clone(), first.value(field).clone());
        }
        for column in &plan.columns {
            summary.set(column.name(), column.compute(&members));
        }
        if let Some(having) = &plan.having {
            if !having.evaluate(&summary, &NoRelations)? {
                continue;
            }
        }
        let result = group_row(&plan.by, first, compute(&plan.aggregates, &members));
        kept.push((summary, result));
    }

    if !plan.order.is_empty() {
        kept.sort_by(|(a, _), (b, _)| compare_rows(a, b, &plan.order));
    }
    let groups = kept.into_iter().map(|(_, g)| g).collect();
    Ok(paginate(groups, plan.skip, plan.take))
}

/// Check every field named by an aggregate selection.
pub fn validate_selection(descriptor: &ModelDescriptor, selection: &AggregateSelection) -> Result<()> {
    if let Some(count) = &selection.count {
        for field in &count.fields {
            scalar(descriptor, field)?;
        }
    }
    let lists = [
        (AggregateFunction::Avg, &selection.avg),
        (AggregateFunction::Sum, &selection.sum),
        (AggregateFunction::Min, &selection.min),
        (AggregateFunction::Max, &selection.max),
    ];
    for (function, fields) in lists {
        for field in fields {
            column_kind(
                descriptor,
                &Column {
                    function,
                    field: Some(field.clone()),
                },
            )?;
        }
    }
    Ok(())
}

/// Kind and nullability of an aggregate column's values.
fn column_kind(descriptor: &ModelDescriptor, column: &Column) -> Result<(ScalarKind, bool)> {
    let Some(field) = &column.field else {
        return match column.function {
            AggregateFunction::Count => Ok((ScalarKind::Int, false)),
            other => Err(Error::validation(format!(
                "{} needs a field",
                other.as_str()
            ))),
        };
    };
    let f = scalar(descriptor, field)?;
    match column.function {
        AggregateFunction::Count => Ok((ScalarKind::Int, false)),
        AggregateFunction::Avg | AggregateFunction::Sum if f.kind.is_numeric() => {
            Ok((ScalarKind::Float, true))
        }
        AggregateFunction::Min | AggregateFunction::Max if f.kind.is_orderable() => {
            Ok((f.kind, true))
        }
        function => Err(Error::validation(format!(
            "{} is not supported on {} field `{}.{}`",
            function.as_str(),
            f.kind.as_str(),
            descriptor.name,
            field
        ))),
    }
}

fn scalar<'m>(descriptor: &'m ModelDescriptor, field: &str) -> Result<&'m FieldDescriptor> {
    match descriptor.kind_of(field) {
        Some(FieldKind::Scalar(f)) => Ok(f),
        Some(FieldKind::Relation(_)) => Err(Error::validation(format!(
            "`{}.{}` is a relation and cannot be aggregated or grouped",
            descriptor.name, field
        ))),
        None => Err(Error::validation(format!(
            "unknown field `{}` on model `{}`",
            field, descriptor.name
        ))),
    }
}

fn push_unique(columns: &mut Vec<Column>, column: Column) {
    if !columns.contains(&column) {
        columns.push(column);
    }
}

fn average<'v>(values: impl Iterator<Item = &'v Value>) -> Value {
    let (total, n) = values
        .filter_map(Value::as_f64)
        .fold((0.0, 0u64), |(t, n), v| (t + v, n + 1));
    if n == 0 {
        Value::Null
    } else {
        Value::Float(total / n as f64)
    }
}

/// Integer sums stay integers while they fit; anything else sums as float.
fn sum<'v>(values: impl Iterator<Item = &'v Value>) -> Value {
    let values: Vec<&Value> = values.collect();
    if values.is_empty() {
        return Value::Null;
    }
    let ints: Option<Vec<i64>> = values.iter().map(|v| v.as_i64()).collect();
    if let Some(ints) = ints {
        if let Some(total) = ints.iter().try_fold(0i64, |acc, v| acc.checked_add(*v)) {
            return Value::Int(total);
        }
    }
    Value::Float(values.iter().filter_map(|v| v.as_f64()).sum())
}

fn extreme<'v>(values: impl Iterator<Item = &'v Value>, wanted: Ordering) -> Value {
    values
        .fold(None::<&Value>, |best, v| match best {
            Some(b) if compare_values(v, b) != Some(wanted) => Some(b),
            _ => Some(v),
        })
        .cloned()
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fixtures::shop;
    use relq_proto::{Condition, SortOrder};

    fn orders() -> Vec<Row> {
        [("u1", 10.0, "open"), ("u1", 5.0, "paid"), ("u2", 1.5, "open"), ("u3", 4.0, "open")]
            .into_iter()
            .enumerate()
            .map(|(i, (user, amount, status))| {
                Row::new()
                    .with("id", format!("o{}", i))
                    .with("userId", user)
                    .with("amount", amount)
                    .with("status", status)
            })
            .collect()
    }

    #[test]
    fn test_compute() {
        let selection = AggregateSelection::new()
            .count_all()
            .count_field("note")
            .sum("amount")
            .avg("amount")
            .min("status")
            .max("amount");
        let result = compute(&selection, &orders());
        assert_eq!(result.count.as_ref().unwrap().all, Some(4));
        assert_eq!(result.count.as_ref().unwrap().field("note"), Some(0));
        assert_eq!(result.get(AggregateFunction::Sum, Some("amount")), Some(Value::Float(20.5)));
        assert_eq!(result.get(AggregateFunction::Avg, Some("amount")), Some(Value::Float(5.125)));
        assert_eq!(result.get(AggregateFunction::Min, Some("status")), Some(Value::from("open")));
        assert_eq!(result.get(AggregateFunction::Max, Some("amount")), Some(Value::Float(10.0)));
    }

    #[test]
    fn test_empty_sets() {
        let selection = AggregateSelection::new().count_all().sum("amount").avg("amount");
        let result = compute(&selection, &[]);
        assert_eq!(result.count.unwrap().all, Some(0));
        assert_eq!(result.sum[0].1, Value::Null);
        assert_eq!(result.avg[0].1, Value::Null);
    }

    #[test]
    fn test_integer_sum_overflows_to_float() {
        let rows = vec![Row::new().with("n", i64::MAX), Row::new().with("n", 1i64)];
        let column = Column {
            function: AggregateFunction::Sum,
            field: Some("n".into()),
        };
        assert!(matches!(column.compute(&rows), Value::Float(_)));
        let rows = vec![Row::new().with("n", 2i64), Row::new().with("n", 3i64)];
        assert_eq!(column.compute(&rows), Value::Int(5));
    }

    #[test]
    fn test_validation() {
        let registry = shop();
        let planner = AggregatePlanner::new(&registry, 5);
        let sum_email = AggregateArgs::new(AggregateSelection::new().sum("email"));
        assert_eq!(
            planner.aggregate("User", &sum_email).unwrap_err().kind(),
            ErrorKind::Validation
        );
        assert!(planner
            .aggregate("User", &AggregateArgs::new(AggregateSelection::new()))
            .is_err());
        assert!(planner
            .aggregate("Order", &AggregateArgs::new(AggregateSelection::new().avg("amount")))
            .is_ok());
    }

    #[test]
    fn test_group_by_validation() {
        let registry = shop();
        let planner = AggregatePlanner::new(&registry, 5);

        assert!(planner.group_by("Order", &GroupByArgs::new(Vec::<String>::new())).is_err());

        let having_outside_by = GroupByArgs::new(["userId"]).with_having(HavingFilter::Field {
            field: "status".into(),
            conditions: vec![Condition::Equals(Value::from("open"))],
        });
        assert!(planner.group_by("Order", &having_outside_by).is_err());

        let order_outside_by =
            GroupByArgs::new(["userId"]).order_by(GroupOrderBy::Field(OrderBy::asc("amount")));
        assert!(planner.group_by("Order", &order_outside_by).is_err());

        let mut paged = GroupByArgs::new(["userId"]);
        paged.take = Some(1);
        assert!(planner.group_by("Order", &paged).is_err());

        let sum_having = GroupByArgs::new(["userId"]).with_having(HavingFilter::Aggregate {
            function: AggregateFunction::Sum,
            field: Some("amount".into()),
            conditions: vec![Condition::Gt(Value::Int(5))],
        });
        assert!(planner.group_by("Order", &sum_having).is_ok());
    }

    #[test]
    fn test_group_having_and_order() {
        let registry = shop();
        let planner = AggregatePlanner::new(&registry, 5);
        let mut args = GroupByArgs::new(["userId"])
            .with_aggregates(AggregateSelection::new().sum("amount").count_all())
            .with_having(HavingFilter::Aggregate {
                function: AggregateFunction::Sum,
                field: Some("amount".into()),
                conditions: vec![Condition::Gte(Value::Int(2))],
            })
            .order_by(GroupOrderBy::Aggregate {
                function: AggregateFunction::Sum,
                field: Some("amount".into()),
                order: SortOrder::Asc,
            });
        args.take = Some(5);
        let plan = planner.group_by("Order", &args).unwrap();
        let groups = group(&plan, orders()).unwrap();

        let users: Vec<&Value> = groups.iter().filter_map(|g| g.key("userId")).collect();
        assert_eq!(users, vec![&Value::from("u3"), &Value::from("u1")]);
        assert_eq!(
            groups[1].aggregates.get(AggregateFunction::Sum, Some("amount")),
            Some(Value::Float(15.0))
        );
        assert_eq!(groups[1].aggregates.count.as_ref().unwrap().all, Some(2));
    }
}
