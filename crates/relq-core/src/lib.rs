//! relq core - schema registry, query execution and transactions.
//!
//! This crate turns typed [`proto::Request`]s into store queries against a
//! registered schema, stitches related records into nested results and runs
//! batch and interactive transactions.
//!
//! # Modules
//!
//! - [`catalog`] - Model, field and relation descriptors and the registry
//! - [`query`] - Predicate compiler, selection resolver, executor and stitcher
//! - [`request`] - JSON argument decoding
//! - [`storage`] - The storage trait and its sled implementation
//! - [`transaction`] - Batch and interactive transactions
//! - [`engine`] - The engine handle and typed model clients

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod query;
pub mod request;
pub mod storage;
pub mod transaction;

#[cfg(test)]
mod fixtures;

pub use catalog::{
    Cardinality, DefaultValue, FieldDescriptor, FieldKind, ModelDescriptor, ReferentialAction,
    RegistryBuilder, RelationDescriptor, ScalarKind, SchemaRegistry,
};
pub use config::EngineConfig;
pub use engine::{Engine, ModelClient};
pub use error::{Error, ErrorKind, Result, TimeoutPhase};
pub use storage::{Row, Savepoint, Scope, SledStore, Storage, StoreConfig, StoreError, StoreQuery, TxId};
pub use transaction::Transaction;

/// Re-export protocol types.
pub use relq_proto as proto;
