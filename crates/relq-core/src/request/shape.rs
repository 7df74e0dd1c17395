//! Result shapes, ordering, pagination and aggregate selections.

use relq_proto::{
    AggregateFunction, AggregateSelection, CountSelection, FindManyArgs, GroupOrderBy, NullsOrder,
    OrderBy, SelectEntry, SelectionSpec, SortOrder,
};
use serde_json::Value as JsonValue;

use super::filter::aggregate_function;
use super::{boolean, check_keys, count, integer, object, one_or_many, string, string_list};
use super::{Decoder, Object};
use crate::catalog::FieldKind;
use crate::error::{Error, Result};

const RELATION_ARGS: &[&str] = &[
    "where", "select", "include", "omit", "orderBy", "cursor", "take", "skip", "distinct",
];

impl Decoder<'_> {
    /// Arguments of `findMany`, also used for nested relation selections.
    pub(super) fn find_many(&self, model: &str, args: &Object) -> Result<FindManyArgs> {
        let mut find = self.window(model, args)?;
        find.selection = self.selection(model, args)?;
        if let Some(distinct) = args.get("distinct") {
            find.distinct = match distinct {
                JsonValue::String(field) => vec![field.clone()],
                other => string_list(other, "distinct")?,
            };
        }
        Ok(find)
    }

    /// `where`, `orderBy`, `cursor`, `take` and `skip`.
    pub(super) fn window(&self, model: &str, args: &Object) -> Result<FindManyArgs> {
        Ok(FindManyArgs {
            filter: self.optional_where(model, args)?,
            order_by: args
                .get("orderBy")
                .map(|o| self.order_by(model, o))
                .transpose()?
                .unwrap_or_default(),
            cursor: args
                .get("cursor")
                .map(|c| self.filter(model, c, "cursor"))
                .transpose()?,
            take: args.get("take").map(|t| integer(t, "take")).transpose()?,
            skip: args.get("skip").map(|s| count(s, "skip")).transpose()?,
            ..FindManyArgs::default()
        })
    }

    /// `select`, `include` and `omit`.
    pub(super) fn selection(&self, model: &str, args: &Object) -> Result<SelectionSpec> {
        let select = args
            .get("select")
            .map(|s| self.entries(model, s, "select"))
            .transpose()?;
        let include = args
            .get("include")
            .map(|i| self.entries(model, i, "include"))
            .transpose()?;
        let omit = args.get("omit").map(|o| flags(o, "omit")).transpose()?;
        Ok(SelectionSpec::new(select, include, omit)?)
    }

    fn entries(&self, model: &str, value: &JsonValue, at: &str) -> Result<Vec<SelectEntry>> {
        let mut entries = Vec::new();
        for (key, value) in object(value, at)? {
            let path = format!("{}.{}", at, key);
            if key == "_count" {
                if let Some(counts) = self.count_selection(model, value, &path)? {
                    entries.push(SelectEntry::Count(counts));
                }
                continue;
            }
            match self.registry.field_type(model, key)? {
                FieldKind::Scalar(_) => {
                    if boolean(value, &path)? {
                        entries.push(SelectEntry::field(key.clone()));
                    }
                }
                FieldKind::Relation(relation) => match value {
                    JsonValue::Bool(false) => {}
                    JsonValue::Bool(true) => {
                        entries.push(SelectEntry::relation(key.clone(), FindManyArgs::new()))
                    }
                    other => {
                        let nested = object(other, &path)?;
                        check_keys(nested, RELATION_ARGS, &path)?;
                        let args = self.find_many(&relation.target, nested)?;
                        entries.push(SelectEntry::relation(key.clone(), args));
                    }
                },
            }
        }
        Ok(entries)
    }

    /// `_count: true` counts every to-many relation.
    fn count_selection(
        &self,
        model: &str,
        value: &JsonValue,
        at: &str,
    ) -> Result<Option<Vec<CountSelection>>> {
        if let JsonValue::Bool(all) = value {
            if !all {
                return Ok(None);
            }
            let descriptor = self.registry.describe(model)?;
            let counts = descriptor
                .relations
                .iter()
                .filter(|r| !r.cardinality.is_one())
                .map(|r| CountSelection {
                    relation: r.name.clone(),
                    filter: None,
                })
                .collect();
            return Ok(Some(counts));
        }

        let map = object(value, at)?;
        check_keys(map, &["select"], at)?;
        let at = format!("{}.select", at);
        let Some(select) = map.get("select") else {
            return Ok(None);
        };
        let mut counts = Vec::new();
        for (relation, args) in object(select, &at)? {
            let path = format!("{}.{}", at, relation);
            let resolved = self.registry.relation(model, relation)?;
            let filter = match args {
                JsonValue::Bool(false) => continue,
                JsonValue::Bool(true) => None,
                other => {
                    let nested = object(other, &path)?;
                    check_keys(nested, &["where"], &path)?;
                    nested
                        .get("where")
                        .map(|w| self.filter(&resolved.target.name, w, &path))
                        .transpose()?
                }
            };
            counts.push(CountSelection {
                relation: relation.clone(),
                filter,
            });
        }
        Ok(Some(counts))
    }

    /// `orderBy`: one `{field: direction}` object or a list of them.
    pub(super) fn order_by(&self, model: &str, value: &JsonValue) -> Result<Vec<OrderBy>> {
        one_or_many(value)
            .into_iter()
            .map(|item| {
                let (field, direction) = single_entry(item, "orderBy")?;
                self.scalar_kind(model, field)?;
                sort(field, direction, &format!("orderBy.{}", field))
            })
            .collect()
    }

    /// `orderBy` of `groupBy`: grouping fields or aggregates.
    pub(super) fn group_order(&self, model: &str, value: &JsonValue) -> Result<Vec<GroupOrderBy>> {
        let mut orders = Vec::new();
        for item in one_or_many(value) {
            let (key, direction) = single_entry(item, "orderBy")?;
            let at = format!("orderBy.{}", key);
            if !key.starts_with('_') {
                self.scalar_kind(model, key)?;
                orders.push(GroupOrderBy::Field(sort(key, direction, &at)?));
                continue;
            }
            let function = aggregate_function(key, "orderBy")?;
            for (field, order) in object(direction, &at)? {
                let path = format!("{}.{}", at, field);
                let field = match field.as_str() {
                    "_all" if function == AggregateFunction::Count => None,
                    name => {
                        self.scalar_kind(model, name)?;
                        Some(name.to_string())
                    }
                };
                orders.push(GroupOrderBy::Aggregate {
                    function,
                    field,
                    order: sort_order(string(order, &path)?, &path)?,
                });
            }
        }
        Ok(orders)
    }

    /// `_count`, `_avg`, `_sum`, `_min` and `_max`.
    pub(super) fn aggregates(&self, model: &str, args: &Object) -> Result<AggregateSelection> {
        let mut selection = AggregateSelection::new();
        if let Some(value) = args.get("_count") {
            match value {
                JsonValue::Bool(true) => selection = selection.count_all(),
                JsonValue::Bool(false) => {}
                other => {
                    for field in flags(other, "_count")? {
                        if field == "_all" {
                            selection = selection.count_all();
                        } else {
                            self.scalar_kind(model, &field)?;
                            selection = selection.count_field(field);
                        }
                    }
                }
            }
        }
        for (key, target) in [
            ("_avg", &mut selection.avg),
            ("_sum", &mut selection.sum),
            ("_min", &mut selection.min),
            ("_max", &mut selection.max),
        ] {
            if let Some(value) = args.get(key) {
                for field in flags(value, key)? {
                    self.scalar_kind(model, &field)?;
                    target.push(field);
                }
            }
        }
        Ok(selection)
    }
}

/// Keys of a `{name: true}` map whose value is `true`.
fn flags(value: &JsonValue, at: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for (name, flag) in object(value, at)? {
        if boolean(flag, &format!("{}.{}", at, name))? {
            names.push(name.clone());
        }
    }
    Ok(names)
}

fn single_entry<'v>(value: &'v JsonValue, at: &str) -> Result<(&'v str, &'v JsonValue)> {
    let map = object(value, at)?;
    let mut iter = map.iter();
    match (iter.next(), iter.next()) {
        (Some((key, value)), None) => Ok((key.as_str(), value)),
        _ => Err(Error::validation(format!(
            "each `{}` entry must have exactly one key; use a list to order by several fields",
            at
        ))),
    }
}

fn sort(field: &str, direction: &JsonValue, at: &str) -> Result<OrderBy> {
    let mut order = OrderBy::asc(field);
    match direction {
        JsonValue::String(dir) => order.order = sort_order(dir, at)?,
        other => {
            let map = object(other, at)?;
            check_keys(map, &["sort", "nulls"], at)?;
            let dir = map
                .get("sort")
                .ok_or_else(|| Error::validation(format!("`{}` needs `sort`", at)))?;
            order.order = sort_order(string(dir, at)?, at)?;
            if let Some(nulls) = map.get("nulls") {
                order.nulls = Some(match string(nulls, at)? {
                    "first" => NullsOrder::First,
                    "last" => NullsOrder::Last,
                    other => {
                        return Err(Error::validation(format!(
                            "`{}`: unknown null placement `{}` (expected first or last)",
                            at, other
                        )))
                    }
                });
            }
        }
    }
    Ok(order)
}

fn sort_order(direction: &str, at: &str) -> Result<SortOrder> {
    match direction {
        "asc" => Ok(SortOrder::Asc),
        "desc" => Ok(SortOrder::Desc),
        other => Err(Error::validation(format!(
            "`{}`: unknown sort order `{}` (expected asc or desc)",
            at, other
        ))),
    }
}
