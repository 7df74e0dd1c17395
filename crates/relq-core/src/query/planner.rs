//! Selection resolver.
//!
//! Turns a requested result shape into a [`LoadPlan`]: the scalar fields to
//! return at every level, the relations to load with their own filter, order
//! and pagination, and the relation counts to attach. The plan is validated
//! as a whole before anything is read.

use std::collections::HashSet;

use relq_proto::{Filter, FindManyArgs, OrderBy, SelectionMode, SelectionSpec};

use super::filter::PredicateCompiler;
use super::predicate::PredicateNode;
use crate::catalog::{
    Cardinality, FieldDescriptor, FieldKind, JoinKeys, ModelDescriptor, ScalarKind, SchemaRegistry,
};
use crate::error::{Error, Result};
use crate::storage::Row;

/// One level of a load plan.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadPlanNode {
    pub model: String,
    /// Row filter (root level, or per relation level on top of the join).
    pub predicate: Option<PredicateNode>,
    /// Ordering, including the primary key tie-break when paginating.
    pub order: Vec<OrderBy>,
    /// Unique filter locating the cursor row.
    pub cursor: Option<PredicateNode>,
    pub cursor_inclusive: bool,
    pub skip: usize,
    pub take: Option<i64>,
    pub distinct: Vec<String>,
    /// Scalar fields returned, in declaration order.
    pub fields: Vec<String>,
    pub relations: Vec<RelationPlan>,
    pub counts: Vec<CountPlan>,
}

impl LoadPlanNode {
    /// Check if rows must be windowed in memory (cursor, distinct or backward take).
    pub fn needs_window(&self) -> bool {
        self.cursor.is_some() || !self.distinct.is_empty() || self.take.is_some_and(|t| t < 0)
    }

    /// Check if the node restricts which rows are returned beyond its predicate.
    pub fn is_paginated(&self) -> bool {
        self.cursor.is_some() || self.take.is_some() || self.skip > 0
    }
}

/// A relation to load under a parent level.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationPlan {
    pub name: String,
    pub cardinality: Cardinality,
    /// `local` on the parent equals `foreign` on the child.
    pub join: JoinKeys,
    pub node: LoadPlanNode,
}

/// A relation count attached under `_count`.
#[derive(Debug, Clone, PartialEq)]
pub struct CountPlan {
    pub name: String,
    pub target: String,
    pub join: JoinKeys,
    pub predicate: Option<PredicateNode>,
}

/// A query the plan will issue, listed parent-first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryDescriptor {
    /// Dotted relation path from the root (`""` for the root).
    pub path: String,
    pub model: String,
    pub depth: usize,
    /// Index of the parent descriptor.
    pub parent: Option<usize>,
}

/// A validated load plan.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadPlan {
    pub root: LoadPlanNode,
    pub queries: Vec<QueryDescriptor>,
}

/// Resolves selections against the registry.
pub struct SelectionResolver<'a> {
    registry: &'a SchemaRegistry,
    compiler: PredicateCompiler<'a>,
    max_depth: usize,
}

impl<'a> SelectionResolver<'a> {
    pub fn new(registry: &'a SchemaRegistry, max_depth: usize) -> Self {
        Self {
            registry,
            compiler: PredicateCompiler::new(registry),
            max_depth,
        }
    }

    /// Plan a many-record read: filter, order, pagination and shape.
    pub fn resolve(&self, model: &str, args: &FindManyArgs) -> Result<LoadPlan> {
        let root = self.node(model, args, 0)?;
        Ok(plan(root))
    }

    /// Plan the shape of a single record whose row is already identified.
    pub fn resolve_shape(&self, model: &str, selection: &SelectionSpec) -> Result<LoadPlan> {
        let args = FindManyArgs::new().with_selection(selection.clone());
        self.resolve(model, &args)
    }

    fn node(&self, model: &str, args: &FindManyArgs, depth: usize) -> Result<LoadPlanNode> {
        let descriptor = self.registry.describe(model)?;
        let predicate = self.compiler.compile_optional(model, args.filter.as_ref())?;
        let cursor = match &args.cursor {
            Some(filter) => Some(self.compiler.compile_unique(model, filter)?),
            None => None,
        };

        for field in &args.distinct {
            scalar(descriptor, field, "distinct")?;
        }
        let mut order = validate_order(descriptor, &args.order_by)?;
        let skip = usize::try_from(args.skip.unwrap_or(0))
            .map_err(|_| Error::validation("skip is too large"))?;

        let mut node = LoadPlanNode {
            model: model.to_string(),
            predicate,
            order: Vec::new(),
            cursor,
            cursor_inclusive: args.cursor_inclusive,
            skip,
            take: args.take,
            distinct: args.distinct.clone(),
            fields: self.fields(descriptor, &args.selection)?,
            relations: Vec::new(),
            counts: Vec::new(),
        };
        // Unordered reads keep scan order; a cursor needs a total order.
        if !order.is_empty() || node.cursor.is_some() {
            append_tie_break(descriptor, &mut order);
        }
        node.order = order;

        for selected in args.selection.relations() {
            let resolved = self.registry.relation(model, &selected.relation)?;
            if node.relations.iter().any(|r| r.name == selected.relation) {
                return Err(Error::validation(format!(
                    "relation `{}.{}` is selected twice",
                    model, selected.relation
                )));
            }
            if depth + 1 > self.max_depth {
                return Err(Error::validation(format!(
                    "relation `{}.{}` exceeds the maximum include depth of {}",
                    model, selected.relation, self.max_depth
                )));
            }
            let cardinality = resolved.descriptor.cardinality;
            if cardinality.is_one() && restricts_rows(&selected.args) {
                return Err(Error::validation(format!(
                    "to-one relation `{}.{}` cannot be filtered, ordered or paginated",
                    model, selected.relation
                )));
            }
            let child = self.node(&resolved.target.name, &selected.args, depth + 1)?;
            node.relations.push(RelationPlan {
                name: selected.relation.clone(),
                cardinality,
                join: resolved.join.clone(),
                node: child,
            });
        }

        // declaration order
        node.relations.sort_by_key(|r| {
            descriptor
                .relations
                .iter()
                .position(|d| d.name == r.name)
                .unwrap_or(usize::MAX)
        });

        for count in args.selection.counts() {
            let resolved = self.registry.relation(model, &count.relation)?;
            if resolved.descriptor.cardinality != Cardinality::Many {
                return Err(Error::validation(format!(
                    "`_count` needs a to-many relation, `{}.{}` is to-one",
                    model, count.relation
                )));
            }
            let target = resolved.target.name.clone();
            let predicate = self
                .compiler
                .compile_optional(&target, count.filter.as_ref())?;
            node.counts.push(CountPlan {
                name: count.relation.clone(),
                target,
                join: resolved.join.clone(),
                predicate,
            });
        }

        Ok(node)
    }

    /// Returned scalar fields for a selection, in declaration order.
    fn fields(&self, descriptor: &ModelDescriptor, selection: &SelectionSpec) -> Result<Vec<String>> {
        match selection.mode() {
            SelectionMode::Select => {
                let mut wanted = HashSet::new();
                for field in selection.fields() {
                    scalar(descriptor, field, "select")?;
                    wanted.insert(field.as_str());
                }
                Ok(descriptor
                    .scalar_names()
                    .filter(|name| wanted.contains(name))
                    .map(str::to_string)
                    .collect())
            }
            SelectionMode::Default | SelectionMode::Include => {
                let mut omitted = HashSet::new();
                for field in selection.omitted() {
                    scalar(descriptor, field, "omit")?;
                    omitted.insert(field.as_str());
                }
                Ok(descriptor
                    .scalar_names()
                    .filter(|name| !omitted.contains(name))
                    .map(str::to_string)
                    .collect())
            }
        }
    }
}

fn plan(root: LoadPlanNode) -> LoadPlan {
    let mut queries = Vec::new();
    describe(&root, String::new(), 0, None, &mut queries);
    LoadPlan { root, queries }
}

fn describe(
    node: &LoadPlanNode,
    path: String,
    depth: usize,
    parent: Option<usize>,
    out: &mut Vec<QueryDescriptor>,
) {
    let index = out.len();
    out.push(QueryDescriptor {
        path: path.clone(),
        model: node.model.clone(),
        depth,
        parent,
    });
    for relation in &node.relations {
        let child_path = if path.is_empty() {
            relation.name.clone()
        } else {
            format!("{}.{}", path, relation.name)
        };
        describe(&relation.node, child_path, depth + 1, Some(index), out);
    }
}

fn scalar<'m>(
    descriptor: &'m ModelDescriptor,
    field: &str,
    clause: &str,
) -> Result<&'m FieldDescriptor> {
    match descriptor.kind_of(field) {
        Some(FieldKind::Scalar(f)) => Ok(f),
        Some(FieldKind::Relation(_)) => Err(Error::validation(format!(
            "`{}` in {} on {} is a relation, not a scalar field",
            field, clause, descriptor.name
        ))),
        None => Err(Error::validation(format!(
            "unknown field `{}` in {} on {}",
            field, clause, descriptor.name
        ))),
    }
}

/// Check an ordering: scalar fields of a sortable kind, each at most once.
pub(crate) fn validate_order(
    descriptor: &ModelDescriptor,
    order: &[OrderBy],
) -> Result<Vec<OrderBy>> {
    let mut seen = HashSet::new();
    for spec in order {
        let field = scalar(descriptor, &spec.field, "orderBy")?;
        if matches!(field.kind, ScalarKind::Json | ScalarKind::StringList) {
            return Err(Error::validation(format!(
                "cannot order by {} field `{}.{}`",
                field.kind.as_str(),
                descriptor.name,
                field.name
            )));
        }
        if !seen.insert(spec.field.as_str()) {
            return Err(Error::validation(format!(
                "field `{}` appears twice in orderBy",
                spec.field
            )));
        }
    }
    Ok(order.to_vec())
}

/// Append primary key fields (ascending) not already ordered on.
pub(crate) fn append_tie_break(descriptor: &ModelDescriptor, order: &mut Vec<OrderBy>) {
    for id in descriptor.id_fields() {
        if !order.iter().any(|o| &o.field == id) {
            order.push(OrderBy::asc(id.clone()));
        }
    }
}

fn restricts_rows(args: &FindManyArgs) -> bool {
    args.filter.is_some()
        || !args.order_by.is_empty()
        || args.cursor.is_some()
        || args.take.is_some()
        || args.skip.is_some()
        || !args.distinct.is_empty()
}

/// Filter with equality on every primary key field of a row.
pub(crate) fn identity_filter(descriptor: &ModelDescriptor, row: &Row) -> Filter {
    let mut parts: Vec<Filter> = descriptor
        .id_fields()
        .iter()
        .map(|f| Filter::eq(f.clone(), row.value(f).clone()))
        .collect();
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        Filter::and(parts)
    }
}
