//! Transaction state and read views.
//!
//! Writes of an open transaction are buffered in an [`Overlay`] keyed like
//! the committed tree. Reads merge the committed rows with the overlay
//! entries visible to the reading scope.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use relq_proto::{IsolationLevel, OrderBy, Value};
use sled::Tree;
use tokio::sync::OwnedSemaphorePermit;

use super::codec::{decode_row, encode_row};
use super::error::StoreError;
use super::row::Row;
use crate::query::compare::{compare_rows, values_equal};
use crate::query::predicate::{PredicateNode, RelatedRows};

/// A buffered write: the new row, or `None` for a delete.
#[derive(Debug, Clone)]
pub(crate) struct Pending {
    pub model: String,
    pub row: Option<Row>,
    /// Batch statement that wrote the entry; `None` for transaction-wide writes.
    pub statement: Option<u32>,
}

/// Buffered writes ordered by storage key.
pub(crate) type Overlay = BTreeMap<Vec<u8>, Pending>;

/// An open transaction. Holds the writer gate until dropped.
pub(crate) struct TxState {
    pub isolation: IsolationLevel,
    pub overlay: Overlay,
    /// Overlay copies taken at each open savepoint, oldest first.
    pub savepoints: Vec<Overlay>,
    _permit: OwnedSemaphorePermit,
}

impl TxState {
    pub fn new(isolation: IsolationLevel, permit: OwnedSemaphorePermit) -> Self {
        Self {
            isolation,
            overlay: Overlay::new(),
            savepoints: Vec::new(),
            _permit: permit,
        }
    }
}

/// Convert an overlay into an atomic sled batch.
pub(crate) fn to_batch(overlay: &Overlay) -> Result<sled::Batch, StoreError> {
    let mut batch = sled::Batch::default();
    for (key, pending) in overlay {
        match &pending.row {
            Some(row) => batch.insert(key.as_slice(), encode_row(row)?),
            None => batch.remove(key.as_slice()),
        }
    }
    Ok(batch)
}

/// Key prefix shared by every row of a model.
pub(crate) fn model_prefix(model: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(model.len() + 1);
    prefix.extend_from_slice(model.as_bytes());
    prefix.push(0);
    prefix
}

type Scanned = Rc<Vec<(Vec<u8>, Row)>>;

/// A consistent read of committed rows plus visible overlay entries.
///
/// Scans are cached per model for the lifetime of the view, so a view must
/// not outlive a write to the overlay it reads.
pub(crate) struct View<'a> {
    tree: &'a Tree,
    overlay: Option<&'a Overlay>,
    statement: Option<u32>,
    cache: RefCell<HashMap<String, Scanned>>,
}

impl<'a> View<'a> {
    /// A view of committed data only.
    pub fn committed(tree: &'a Tree) -> Self {
        Self::new(tree, None, None)
    }

    /// A view through an overlay. With a statement, only that statement's
    /// entries (and transaction-wide entries) are visible.
    pub fn new(tree: &'a Tree, overlay: Option<&'a Overlay>, statement: Option<u32>) -> Self {
        Self {
            tree,
            overlay,
            statement,
            cache: RefCell::new(HashMap::new()),
        }
    }

    fn visible(&self, pending: &Pending) -> bool {
        self.statement.is_none()
            || pending.statement.is_none()
            || pending.statement == self.statement
    }

    /// Every row of a model in key order.
    pub fn scan(&self, model: &str) -> Result<Scanned, StoreError> {
        if let Some(rows) = self.cache.borrow().get(model) {
            return Ok(Rc::clone(rows));
        }

        let prefix = model_prefix(model);
        let mut rows = BTreeMap::new();
        for item in self.tree.scan_prefix(&prefix) {
            let (key, bytes) = item?;
            rows.insert(key.to_vec(), decode_row(&bytes)?);
        }

        if let Some(overlay) = self.overlay {
            let pending = overlay
                .range(prefix.clone()..)
                .take_while(|(key, _)| key.starts_with(&prefix));
            for (key, entry) in pending {
                if !self.visible(entry) {
                    continue;
                }
                match &entry.row {
                    Some(row) => {
                        rows.insert(key.clone(), row.clone());
                    }
                    None => {
                        rows.remove(key);
                    }
                }
            }
        }

        let scanned: Scanned = Rc::new(rows.into_iter().collect());
        self.cache
            .borrow_mut()
            .insert(model.to_string(), Rc::clone(&scanned));
        Ok(scanned)
    }

    /// Check if a key holds a row in this view.
    pub fn contains(&self, model: &str, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.scan(model)?.iter().any(|(k, _)| k == key))
    }

    /// Rows matching a predicate, with their keys, in key order.
    pub fn matching(
        &self,
        model: &str,
        predicate: Option<&PredicateNode>,
    ) -> Result<Vec<(Vec<u8>, Row)>, StoreError> {
        let rows = self.scan(model)?;
        let mut out = Vec::new();
        for (key, row) in rows.iter() {
            let keep = match predicate {
                Some(p) => p.evaluate(row, self)?,
                None => true,
            };
            if keep {
                out.push((key.clone(), row.clone()));
            }
        }
        Ok(out)
    }

    /// Matching rows ordered and windowed.
    pub fn select(
        &self,
        model: &str,
        predicate: Option<&PredicateNode>,
        order: &[OrderBy],
        offset: usize,
        limit: Option<usize>,
    ) -> Result<Vec<Row>, StoreError> {
        let mut rows: Vec<Row> = self
            .matching(model, predicate)?
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        if !order.is_empty() {
            // stable: ties keep storage order
            rows.sort_by(|a, b| compare_rows(a, b, order));
        }
        let window = rows.into_iter().skip(offset);
        Ok(match limit {
            Some(n) => window.take(n).collect(),
            None => window.collect(),
        })
    }

    /// Rows of `model` whose `field` equals `value`, with their keys.
    pub fn keyed_by(
        &self,
        model: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<(Vec<u8>, Row)>, StoreError> {
        Ok(self
            .scan(model)?
            .iter()
            .filter(|(_, row)| values_equal(row.value(field), value))
            .cloned()
            .collect())
    }
}

impl RelatedRows for View<'_> {
    fn related(&self, model: &str, field: &str, key: &Value) -> Result<Vec<Row>, StoreError> {
        Ok(self
            .keyed_by(model, field, key)?
            .into_iter()
            .map(|(_, row)| row)
            .collect())
    }
}
