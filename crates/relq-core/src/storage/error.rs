//! Storage errors.

use relq_proto::IsolationLevel;
use thiserror::Error;

/// Errors raised by a [`Storage`](super::Storage) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write would duplicate a unique key.
    #[error("unique constraint `{constraint}` failed on {model} (fields: {})", fields.join(", "))]
    UniqueViolation {
        model: String,
        constraint: String,
        fields: Vec<String>,
    },

    /// A write references a missing record, or a delete/update would orphan referencing records.
    #[error("foreign key constraint `{constraint}` failed on {model} (fields: {})", fields.join(", "))]
    ForeignKeyViolation {
        model: String,
        constraint: String,
        fields: Vec<String>,
    },

    /// Two statements of one batch wrote the same record.
    #[error("write conflict on {model}: {reason}")]
    WriteConflict { model: String, reason: String },

    /// Numeric update overflowed.
    #[error("arithmetic overflow updating {model}.{field}")]
    Overflow { model: String, field: String },

    /// The transaction is not open.
    #[error("unknown transaction {0}")]
    UnknownTransaction(u64),

    /// The savepoint was released or never taken.
    #[error("unknown savepoint {savepoint} in transaction {tx}")]
    UnknownSavepoint { tx: u64, savepoint: u32 },

    /// The store cannot provide the requested isolation level.
    #[error("isolation level {0} is not supported")]
    UnsupportedIsolation(IsolationLevel),

    /// The writer gate was closed; the store is shutting down.
    #[error("store is closed")]
    Closed,

    /// The query names a model the store does not know.
    #[error("unknown model `{0}`")]
    UnknownModel(String),

    /// Underlying sled failure.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Row encoding or decoding failure.
    #[error("codec error: {0}")]
    Codec(String),
}
