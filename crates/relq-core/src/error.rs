//! Core error types.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::storage::StoreError;

/// Stable category of an [`Error`], suitable for matching by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Schema,
    NotFound,
    ConstraintViolation,
    TransactionTimeout,
    InternalConsistency,
    TransactionClosed,
    Storage,
}

impl ErrorKind {
    /// Stable tag of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Schema => "schema",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::TransactionTimeout => "transaction_timeout",
            ErrorKind::InternalConsistency => "internal_consistency",
            ErrorKind::TransactionClosed => "transaction_closed",
            ErrorKind::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The stage of a transaction that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting for the transaction to start (`maxWait`).
    Acquire,
    /// Running the transaction body (`timeout`).
    Execute,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::Acquire => f.write_str("waiting to start"),
            TimeoutPhase::Execute => f.write_str("running"),
        }
    }
}

/// Engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request: unknown field, operator invalid for the field type,
    /// bad aggregate argument, invalid transaction option.
    #[error("validation error: {0}")]
    Validation(String),

    /// Invalid model registry definition.
    #[error("schema error: {0}")]
    Schema(String),

    /// A throwing read, update or delete found no record.
    #[error("no {model} record found: {reason}")]
    NotFound { model: String, reason: String },

    /// The store rejected a write.
    #[error("constraint `{constraint}` violated on {model} (fields: {})", fields.join(", "))]
    ConstraintViolation {
        model: String,
        constraint: String,
        fields: Vec<String>,
    },

    /// A transaction exceeded `maxWait` or `timeout` and was rolled back.
    #[error("transaction timed out {phase} after {limit:?}")]
    TransactionTimeout { phase: TimeoutPhase, limit: Duration },

    /// Stored data contradicts the registry (e.g. several rows for a to-one relation).
    #[error("inconsistent query result: {0}")]
    InternalConsistency(String),

    /// An operation was issued on a transaction that already ended.
    #[error("transaction already {0}")]
    TransactionClosed(&'static str),

    /// Any other storage failure, propagated unchanged.
    #[error("storage error: {0}")]
    Storage(StoreError),
}

impl Error {
    /// Stable category of the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Schema(_) => ErrorKind::Schema,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::ConstraintViolation { .. } => ErrorKind::ConstraintViolation,
            Error::TransactionTimeout { .. } => ErrorKind::TransactionTimeout,
            Error::InternalConsistency(_) => ErrorKind::InternalConsistency,
            Error::TransactionClosed(_) => ErrorKind::TransactionClosed,
            Error::Storage(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn not_found(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::NotFound {
            model: model.into(),
            reason: reason.into(),
        }
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniqueViolation {
                model,
                constraint,
                fields,
            }
            | StoreError::ForeignKeyViolation {
                model,
                constraint,
                fields,
            } => Error::ConstraintViolation {
                model,
                constraint,
                fields,
            },
            other => Error::Storage(other),
        }
    }
}

impl From<relq_proto::Error> for Error {
    fn from(err: relq_proto::Error) -> Self {
        Error::Validation(err.to_string())
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
