//! Storage layer for relq.
//!
//! The engine talks to storage only through the [`Storage`] trait: a query
//! vocabulary over flat rows plus transaction control. [`SledStore`] is the
//! sled-backed implementation used by the facade and the tests.

mod config;
mod engine;
mod error;
mod row;
mod transaction;

pub mod codec;

use std::fmt;

use async_trait::async_trait;
use relq_proto::{IsolationLevel, OrderBy, Value};

use crate::query::predicate::PredicateNode;

pub use config::StoreConfig;
pub use engine::SledStore;
pub use error::StoreError;
pub use row::Row;

/// Identifier of an open store transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId(pub u64);

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// A mark in a transaction's writes that later writes can be undone to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Savepoint(pub u32);

impl fmt::Display for Savepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sp{}", self.0)
    }
}

/// The visibility and write scope of a store query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Sees committed data; writes commit immediately.
    Autocommit,
    /// Sees committed data plus every write of the transaction.
    Transaction(TxId),
    /// One statement of a batch: sees committed data plus its own writes only.
    Statement { tx: TxId, index: u32 },
}

impl Scope {
    /// The enclosing transaction, if any.
    pub fn tx(&self) -> Option<TxId> {
        match self {
            Scope::Autocommit => None,
            Scope::Transaction(tx) | Scope::Statement { tx, .. } => Some(*tx),
        }
    }
}

/// Arithmetic or list operator of an assignment.
#[derive(Debug, Clone, PartialEq)]
pub enum AssignOp {
    Set(Value),
    Increment(Value),
    Decrement(Value),
    Multiply(Value),
    Divide(Value),
    Push(Vec<String>),
}

/// A single field assignment of an update.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub field: String,
    pub op: AssignOp,
}

impl Assignment {
    /// Store a value.
    pub fn set(field: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            op: AssignOp::Set(value),
        }
    }
}

/// A query against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreQuery {
    /// Matching rows in order, after `offset`, at most `limit`.
    Select {
        model: String,
        predicate: Option<PredicateNode>,
        order: Vec<OrderBy>,
        offset: usize,
        limit: Option<usize>,
    },
    /// Number of matching rows.
    Count {
        model: String,
        predicate: Option<PredicateNode>,
    },
    /// Insert complete rows. Returns the inserted rows.
    Insert {
        model: String,
        rows: Vec<Row>,
        /// Skip rows that would violate a unique key instead of failing.
        skip_duplicates: bool,
    },
    /// Apply assignments to matching rows. Returns the updated rows.
    Update {
        model: String,
        predicate: Option<PredicateNode>,
        assignments: Vec<Assignment>,
    },
    /// Delete matching rows, applying referential actions. Returns the deleted rows.
    Delete {
        model: String,
        predicate: Option<PredicateNode>,
    },
}

impl StoreQuery {
    /// Select every matching row in storage order.
    pub fn select(model: impl Into<String>, predicate: Option<PredicateNode>) -> Self {
        StoreQuery::Select {
            model: model.into(),
            predicate,
            order: Vec::new(),
            offset: 0,
            limit: None,
        }
    }

    /// Model the query targets.
    pub fn model(&self) -> &str {
        match self {
            StoreQuery::Select { model, .. }
            | StoreQuery::Count { model, .. }
            | StoreQuery::Insert { model, .. }
            | StoreQuery::Update { model, .. }
            | StoreQuery::Delete { model, .. } => model,
        }
    }

    /// Check if the query writes.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StoreQuery::Insert { .. } | StoreQuery::Update { .. } | StoreQuery::Delete { .. }
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreQuery::Select { .. } => "select",
            StoreQuery::Count { .. } => "count",
            StoreQuery::Insert { .. } => "insert",
            StoreQuery::Update { .. } => "update",
            StoreQuery::Delete { .. } => "delete",
        }
    }
}

/// Result of a [`StoreQuery`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOutput {
    Rows(Vec<Row>),
    Count(u64),
}

impl StoreOutput {
    /// Rows of the output; a count yields no rows.
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            StoreOutput::Rows(rows) => rows,
            StoreOutput::Count(_) => Vec::new(),
        }
    }

    /// Count of the output; for rows, their number.
    pub fn count(&self) -> u64 {
        match self {
            StoreOutput::Rows(rows) => rows.len() as u64,
            StoreOutput::Count(n) => *n,
        }
    }
}

/// The storage collaborator.
///
/// Implementations evaluate [`PredicateNode`] trees (including relation
/// quantifiers), enforce unique keys and foreign keys, apply referential
/// actions on delete and provide transactions.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Run a query in a scope.
    async fn execute(&self, scope: Scope, query: StoreQuery) -> Result<StoreOutput, StoreError>;

    /// Open a transaction. May wait for other writers.
    async fn begin(&self, isolation: IsolationLevel) -> Result<TxId, StoreError>;

    /// Make a transaction's writes durable and visible.
    async fn commit(&self, tx: TxId) -> Result<(), StoreError>;

    /// Discard a transaction's writes.
    async fn rollback(&self, tx: TxId) -> Result<(), StoreError>;

    /// Mark the transaction's current writes.
    async fn savepoint(&self, tx: TxId) -> Result<Savepoint, StoreError>;

    /// Discard writes made since `savepoint`. The savepoint and any later
    /// ones are released.
    async fn rollback_to_savepoint(&self, tx: TxId, savepoint: Savepoint)
        -> Result<(), StoreError>;

    /// Forget `savepoint` and any later ones, keeping their writes.
    async fn release_savepoint(&self, tx: TxId, savepoint: Savepoint) -> Result<(), StoreError>;

    /// Isolation levels this store can honor.
    fn supported_isolation_levels(&self) -> &[IsolationLevel];

    /// Level used when a transaction does not ask for one.
    fn default_isolation_level(&self) -> IsolationLevel;
}
