//! Relation stitcher.
//!
//! Executes a load plan parent-before-child. Each relation level is fetched
//! with one query filtered on the parent join keys, grouped back onto its
//! parents and windowed per parent. Sibling relations load concurrently.

use std::collections::{HashMap, HashSet};

use futures::future::{try_join_all, BoxFuture, FutureExt};
use relq_proto::{Record, Value};
use tracing::debug;

use super::pagination::{window, CursorPosition};
use super::planner::{CountPlan, LoadPlanNode, RelationPlan};
use super::predicate::PredicateNode;
use super::shaper::{shape_all, Loaded, LoadedRelation};
use crate::catalog::Cardinality;
use crate::error::{Error, Result};
use crate::storage::{codec, Row, Scope, Storage, StoreQuery};

/// Loads plan levels from a store in one scope.
pub struct RelationStitcher<'a> {
    storage: &'a dyn Storage,
    scope: Scope,
}

impl<'a> RelationStitcher<'a> {
    pub fn new(storage: &'a dyn Storage, scope: Scope) -> Self {
        Self { storage, scope }
    }

    /// Fetch the rows of a root level: filter, order and the full window.
    pub async fn root_rows(&self, node: &LoadPlanNode) -> Result<Vec<Row>> {
        if !node.needs_window() {
            let limit = node.take.map(|n| usize::try_from(n).unwrap_or(usize::MAX));
            let query = StoreQuery::Select {
                model: node.model.clone(),
                predicate: node.predicate.clone(),
                order: node.order.clone(),
                offset: node.skip,
                limit,
            };
            return Ok(self.select(query).await?);
        }

        let cursor = self.cursor(node).await?;
        let query = StoreQuery::Select {
            model: node.model.clone(),
            predicate: node.predicate.clone(),
            order: node.order.clone(),
            offset: 0,
            limit: None,
        };
        let rows = self.select(query).await?;
        Ok(window(node, rows, &cursor)?)
    }

    /// Load relations and counts beneath `rows` and shape the result.
    pub async fn stitch(&self, node: &LoadPlanNode, rows: Vec<Row>) -> Result<Vec<Record>> {
        let loaded = self.load(node, rows).await?;
        Ok(shape_all(node, loaded))
    }

    fn load<'n>(
        &'n self,
        node: &'n LoadPlanNode,
        rows: Vec<Row>,
    ) -> BoxFuture<'n, Result<Vec<Loaded>>> {
        async move {
            if rows.is_empty() || (node.relations.is_empty() && node.counts.is_empty()) {
                return Ok(rows.into_iter().map(Loaded::bare).collect());
            }

            let relations = try_join_all(node.relations.iter().map(|r| self.relation(r, &rows)));
            let counts = try_join_all(node.counts.iter().map(|c| self.count(c, &rows)));
            let (mut relations, mut counts) = futures::try_join!(relations, counts)?;

            let mut out = Vec::with_capacity(rows.len());
            for (i, row) in rows.into_iter().enumerate() {
                out.push(Loaded {
                    row,
                    relations: relations
                        .iter_mut()
                        .map(|per_parent| {
                            std::mem::replace(&mut per_parent[i], LoadedRelation::Many(Vec::new()))
                        })
                        .collect(),
                    counts: counts.iter_mut().map(|per_parent| per_parent[i]).collect(),
                });
            }
            Ok(out)
        }
        .boxed()
    }

    /// Load one relation for every parent, returning one entry per parent.
    async fn relation(&self, plan: &RelationPlan, parents: &[Row]) -> Result<Vec<LoadedRelation>> {
        let child = &plan.node;
        let (keys, parent_keys) = join_keys(parents, &plan.join.local)?;

        let mut groups: HashMap<Vec<u8>, Vec<Row>> = HashMap::new();
        if !keys.is_empty() {
            let query = StoreQuery::Select {
                model: child.model.clone(),
                predicate: PredicateNode::conjoin(
                    Some(PredicateNode::in_list(plan.join.foreign.clone(), keys)),
                    child.predicate.clone(),
                ),
                order: child.order.clone(),
                offset: 0,
                limit: None,
            };
            let rows = self.select(query).await?;
            debug!(
                relation = %plan.name,
                model = %child.model,
                rows = rows.len(),
                "relation level loaded"
            );
            for row in rows {
                let key = codec::encode_key(std::slice::from_ref(row.value(&plan.join.foreign)))?;
                groups.entry(key).or_default().push(row);
            }
        }

        let cursor = self.cursor(child).await?;
        let mut per_parent: Vec<Vec<Row>> = Vec::with_capacity(parents.len());
        for key in &parent_keys {
            let group = match key {
                Some(key) => groups.get(key).cloned().unwrap_or_default(),
                None => Vec::new(),
            };
            per_parent.push(match plan.cardinality {
                Cardinality::Many => window(child, group, &cursor)?,
                _ => group,
            });
        }

        for (group, parent) in per_parent.iter().zip(parents) {
            check_to_one(plan, group.len(), parent)?;
        }

        // load the next level once for every kept child, then hand them back
        let sizes: Vec<usize> = per_parent.iter().map(Vec::len).collect();
        let children: Vec<Row> = per_parent.into_iter().flatten().collect();
        let mut loaded = self.load(child, children).await?.into_iter();

        let mut out = Vec::with_capacity(sizes.len());
        for size in sizes {
            let group: Vec<Loaded> = loaded.by_ref().take(size).collect();
            out.push(match plan.cardinality {
                Cardinality::Many => LoadedRelation::Many(group),
                _ => LoadedRelation::One(group.into_iter().next().map(Box::new)),
            });
        }
        Ok(out)
    }

    /// Count related records per parent.
    async fn count(&self, plan: &CountPlan, parents: &[Row]) -> Result<Vec<u64>> {
        let (keys, parent_keys) = join_keys(parents, &plan.join.local)?;
        let mut counts: HashMap<Vec<u8>, u64> = HashMap::new();
        if !keys.is_empty() {
            let query = StoreQuery::select(
                plan.target.clone(),
                PredicateNode::conjoin(
                    Some(PredicateNode::in_list(plan.join.foreign.clone(), keys)),
                    plan.predicate.clone(),
                ),
            );
            for row in self.select(query).await? {
                let key = codec::encode_key(std::slice::from_ref(row.value(&plan.join.foreign)))?;
                *counts.entry(key).or_default() += 1;
            }
        }
        Ok(parent_keys
            .iter()
            .map(|key| key.as_ref().and_then(|k| counts.get(k)).copied().unwrap_or(0))
            .collect())
    }

    /// Locate the cursor row of a level.
    async fn cursor(&self, node: &LoadPlanNode) -> Result<CursorPosition> {
        let Some(predicate) = &node.cursor else {
            return Ok(CursorPosition::Unset);
        };
        let query = StoreQuery::Select {
            model: node.model.clone(),
            predicate: Some(predicate.clone()),
            order: Vec::new(),
            offset: 0,
            limit: Some(1),
        };
        Ok(match self.select(query).await?.into_iter().next() {
            Some(row) => CursorPosition::At(row),
            None => CursorPosition::Missing,
        })
    }

    async fn select(&self, query: StoreQuery) -> Result<Vec<Row>> {
        Ok(self.storage.execute(self.scope, query).await?.into_rows())
    }
}

/// Distinct non-null join values of the parents, plus each parent's encoded key.
#[allow(clippy::type_complexity)]
fn join_keys(parents: &[Row], field: &str) -> Result<(Vec<Value>, Vec<Option<Vec<u8>>>)> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    let mut per_parent = Vec::with_capacity(parents.len());
    for parent in parents {
        let value = parent.value(field);
        if value.is_null() {
            per_parent.push(None);
            continue;
        }
        let encoded = codec::encode_key(std::slice::from_ref(value))?;
        if seen.insert(encoded.clone()) {
            keys.push(value.clone());
        }
        per_parent.push(Some(encoded));
    }
    Ok((keys, per_parent))
}

fn check_to_one(plan: &RelationPlan, found: usize, parent: &Row) -> Result<()> {
    match plan.cardinality {
        Cardinality::Many => Ok(()),
        _ if found > 1 => Err(Error::InternalConsistency(format!(
            "to-one relation `{}` matched {} {} records for key {:?}",
            plan.name,
            found,
            plan.node.model,
            parent.value(&plan.join.local)
        ))),
        Cardinality::OneRequired if found == 0 => Err(Error::InternalConsistency(format!(
            "required relation `{}` has no {} record for key {:?}",
            plan.name,
            plan.node.model,
            parent.value(&plan.join.local)
        ))),
        _ => Ok(()),
    }
}
