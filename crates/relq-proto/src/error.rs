//! Request construction errors.

use thiserror::Error;

/// Errors raised while building request values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Invalid combination of `select`, `include` and `omit`.
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    /// Unknown operation name.
    #[error("unknown action `{0}`")]
    UnknownAction(String),

    /// Unknown isolation level name.
    #[error("unknown isolation level `{0}`")]
    UnknownIsolationLevel(String),
}
