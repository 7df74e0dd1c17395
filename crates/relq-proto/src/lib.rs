//! relq request/response types.
//!
//! This crate defines the typed intermediate representation exchanged with the
//! relq engine. It carries no behaviour beyond construction-time validation.
//!
//! # Modules
//!
//! - [`value`] - Runtime values, including the database-null / JSON-null split
//! - [`filter`] - `where` filter trees
//! - [`selection`] - `select` / `include` / `omit` result shapes
//! - [`query`] - Ordering, pagination and read arguments
//! - [`mutation`] - Write payloads and write arguments
//! - [`aggregate`] - Aggregate and group-by arguments and results
//! - [`result`] - Shaped result records
//! - [`message`] - Tagged request and response envelopes
//! - [`transaction`] - Transaction options and isolation levels
//! - [`error`] - Construction errors

pub mod aggregate;
pub mod error;
pub mod filter;
pub mod message;
pub mod mutation;
pub mod query;
pub mod result;
pub mod selection;
pub mod transaction;
pub mod value;

pub use error::Error;

pub use aggregate::{
    AggregateArgs, AggregateFunction, AggregateResult, AggregateSelection, CountAggregate,
    CountResult, GroupByArgs, GroupOrderBy, GroupRow, HavingFilter,
};
pub use filter::{Condition, Filter, JsonCondition, NullKind, QueryMode, RelationFilter};
pub use message::{Action, Operation, Request, Response};
pub use mutation::{
    CreateArgs, CreateManyArgs, Data, DeleteArgs, DeleteManyArgs, FieldWrite, RelationWrite,
    UpdateArgs, UpdateManyArgs, UpsertArgs,
};
pub use query::{CountArgs, FindManyArgs, FindUniqueArgs, NullsOrder, OrderBy, SortOrder};
pub use result::{BatchPayload, Node, Record};
pub use selection::{
    CountSelection, RelationSelection, SelectEntry, SelectionInput, SelectionMode, SelectionSpec,
};
pub use transaction::{IsolationLevel, TransactionOptions};
pub use value::Value;
