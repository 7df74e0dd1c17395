//! Result shaper.
//!
//! Projects fetched rows onto the returned fields of a plan level and hangs
//! the loaded relations and counts under them.

use relq_proto::{AggregateResult, GroupRow, Node, Record, Value};

use super::planner::LoadPlanNode;
use crate::storage::Row;

/// A fetched row together with everything loaded beneath it.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded {
    pub row: Row,
    /// Indexed like the relations of the plan level.
    pub relations: Vec<LoadedRelation>,
    /// Indexed like the counts of the plan level.
    pub counts: Vec<u64>,
}

impl Loaded {
    /// A row with nothing loaded beneath it.
    pub fn bare(row: Row) -> Self {
        Self {
            row,
            relations: Vec::new(),
            counts: Vec::new(),
        }
    }
}

/// Related records loaded for one parent.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedRelation {
    One(Option<Box<Loaded>>),
    Many(Vec<Loaded>),
}

/// Shape one loaded row into a record.
///
/// Scalars come first in declaration order, then relations, then `_count`.
/// Join keys fetched only for stitching are dropped here.
pub fn shape(node: &LoadPlanNode, loaded: Loaded) -> Record {
    let mut record = Record::new();
    for field in &node.fields {
        record.push(field.clone(), Node::Value(loaded.row.value(field).clone()));
    }

    for (plan, related) in node.relations.iter().zip(loaded.relations) {
        let value = match related {
            LoadedRelation::One(Some(child)) => Node::One(Box::new(shape(&plan.node, *child))),
            LoadedRelation::One(None) => Node::Absent,
            LoadedRelation::Many(children) => Node::Many(
                children
                    .into_iter()
                    .map(|child| shape(&plan.node, child))
                    .collect(),
            ),
        };
        record.push(plan.name.clone(), value);
    }

    if !node.counts.is_empty() {
        let mut counts = Record::new();
        for (plan, n) in node.counts.iter().zip(loaded.counts) {
            counts.push(plan.name.clone(), Node::Value(Value::Int(count_value(n))));
        }
        record.push("_count", Node::One(Box::new(counts)));
    }
    record
}

/// Shape every loaded row of a level.
pub fn shape_all(node: &LoadPlanNode, loaded: Vec<Loaded>) -> Vec<Record> {
    loaded.into_iter().map(|l| shape(node, l)).collect()
}

/// Package one group of a `groupBy`.
pub fn group_row(by: &[String], first: &Row, aggregates: AggregateResult) -> GroupRow {
    GroupRow {
        keys: by
            .iter()
            .map(|field| (field.clone(), first.value(field).clone()))
            .collect(),
        aggregates,
    }
}

pub(crate) fn count_value(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
