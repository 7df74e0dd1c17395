//! Transaction coordinator.
//!
//! Batch transactions run a list of requests as statements of one store
//! transaction. Interactive transactions hand a [`Transaction`] to a closure
//! and commit when it returns `Ok`. Both are bounded by `maxWait` while
//! starting and by `timeout` while running.

mod batch;
mod interactive;

use std::time::Duration;

use relq_proto::{IsolationLevel, TransactionOptions};
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::{Error, Result, TimeoutPhase};
use crate::storage::{Storage, TxId};

pub use interactive::Transaction;

/// Transaction options with engine defaults filled in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Settings {
    pub max_wait: Duration,
    pub timeout: Duration,
    pub isolation: IsolationLevel,
}

impl Settings {
    /// Validate options against the store and fill in defaults.
    pub(crate) fn resolve(
        storage: &dyn Storage,
        config: &EngineConfig,
        options: &TransactionOptions,
    ) -> Result<Self> {
        let max_wait = options.max_wait.unwrap_or_else(|| config.max_wait());
        let timeout = options.timeout.unwrap_or_else(|| config.timeout());
        if max_wait.is_zero() {
            return Err(Error::validation("transaction maxWait must be positive"));
        }
        if timeout.is_zero() {
            return Err(Error::validation("transaction timeout must be positive"));
        }

        let isolation = options
            .isolation_level
            .unwrap_or_else(|| storage.default_isolation_level());
        let supported = storage.supported_isolation_levels();
        if !supported.contains(&isolation) {
            let names: Vec<&str> = supported.iter().map(IsolationLevel::as_str).collect();
            return Err(Error::validation(format!(
                "isolation level {} is not supported by the store (supported: {})",
                isolation,
                names.join(", ")
            )));
        }

        Ok(Self {
            max_wait,
            timeout,
            isolation,
        })
    }
}

/// Start a store transaction, waiting at most `max_wait`.
pub(crate) async fn begin(
    storage: &dyn Storage,
    isolation: IsolationLevel,
    max_wait: Duration,
) -> Result<TxId> {
    match tokio::time::timeout(max_wait, storage.begin(isolation)).await {
        Ok(tx) => Ok(tx?),
        Err(_) => {
            warn!(?max_wait, %isolation, "transaction could not start in time");
            Err(Error::TransactionTimeout {
                phase: TimeoutPhase::Acquire,
                limit: max_wait,
            })
        }
    }
}

/// Roll back, logging instead of failing: the caller is already reporting an error.
pub(crate) async fn rollback_quietly(storage: &dyn Storage, tx: TxId) {
    if let Err(err) = storage.rollback(tx).await {
        warn!(%tx, error = %err, "rollback failed");
    }
}
