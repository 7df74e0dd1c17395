//! Interactive transactions.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use relq_proto::{Request, Response, TransactionOptions};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::{begin, rollback_quietly, Settings};
use crate::engine::{Engine, Inner, ModelClient};
use crate::error::{Error, Result, TimeoutPhase};
use crate::storage::{Scope, TxId};

const COMMITTED: &str = "committed";
const ROLLED_BACK: &str = "rolled back";
const TIMED_OUT: &str = "timed out";

/// An open interactive transaction.
///
/// Every operation takes `&mut self`, so a transaction runs one operation at
/// a time. Once committed, rolled back or expired, every further operation
/// fails with [`Error::TransactionClosed`]. Dropping an open handle rolls the
/// transaction back.
pub struct Transaction {
    engine: Arc<Inner>,
    tx: TxId,
    deadline: Instant,
    timeout: Duration,
    closed: Option<&'static str>,
}

impl Transaction {
    pub(crate) fn new(engine: Arc<Inner>, tx: TxId, timeout: Duration) -> Self {
        Self {
            engine,
            tx,
            deadline: Instant::now() + timeout,
            timeout,
            closed: None,
        }
    }

    pub fn id(&self) -> TxId {
        self.tx
    }

    pub fn is_open(&self) -> bool {
        self.closed.is_none()
    }

    /// Run a request inside the transaction.
    #[instrument(skip_all, fields(tx = %self.tx, model = %request.model, action = %request.action()))]
    pub async fn execute(&mut self, request: Request) -> Result<Response> {
        self.ensure_open()?;
        if Instant::now() >= self.deadline {
            self.expire().await;
            return Err(self.timeout_error());
        }
        let engine = self.engine.clone();
        engine
            .executor()
            .execute(Scope::Transaction(self.tx), &request)
            .await
    }

    /// Operations on one model inside the transaction.
    pub fn model(&mut self, name: impl Into<String>) -> ModelClient<'_> {
        ModelClient::in_transaction(self, name.into())
    }

    /// Make the transaction's writes durable.
    pub async fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = Some(COMMITTED);
        self.engine.storage.commit(self.tx).await?;
        debug!(tx = %self.tx, "interactive transaction committed");
        Ok(())
    }

    /// Discard the transaction's writes.
    pub async fn rollback(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = Some(ROLLED_BACK);
        self.engine.storage.rollback(self.tx).await?;
        debug!(tx = %self.tx, "interactive transaction rolled back");
        Ok(())
    }

    /// Roll back after a failure, if still open.
    pub(crate) async fn abort(&mut self) {
        if self.closed.is_none() {
            self.closed = Some(ROLLED_BACK);
            rollback_quietly(self.engine.storage.as_ref(), self.tx).await;
        }
    }

    /// Roll back after the deadline passed.
    pub(crate) async fn expire(&mut self) {
        if self.closed.is_none() {
            warn!(tx = %self.tx, timeout = ?self.timeout, "transaction expired, rolling back");
            self.closed = Some(TIMED_OUT);
            rollback_quietly(self.engine.storage.as_ref(), self.tx).await;
        }
    }

    pub(crate) fn timeout_error(&self) -> Error {
        Error::TransactionTimeout {
            phase: TimeoutPhase::Execute,
            limit: self.timeout,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.closed {
            Some(state) => Err(Error::TransactionClosed(state)),
            None => Ok(()),
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.closed.is_some() {
            return;
        }
        warn!(tx = %self.tx, "transaction dropped while open, rolling back");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let storage = self.engine.storage.clone();
            let tx = self.tx;
            runtime.spawn(async move {
                rollback_quietly(storage.as_ref(), tx).await;
            });
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("tx", &self.tx)
            .field("timeout", &self.timeout)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Engine {
    /// Run `body` in an interactive transaction.
    ///
    /// The transaction commits when `body` returns `Ok` (unless `body` already
    /// ended it) and rolls back when it returns `Err` or runs past `timeout`.
    ///
    /// ```ignore
    /// engine
    ///     .transaction(TransactionOptions::new(), |tx| {
    ///         Box::pin(async move {
    ///             tx.model("User").create(CreateArgs::new(data)).await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<T, F>(&self, options: TransactionOptions, body: F) -> Result<T>
    where
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, Result<T>>,
    {
        let inner = self.inner();
        let settings = Settings::resolve(inner.storage.as_ref(), &inner.config, &options)?;
        let tx = begin(inner.storage.as_ref(), settings.isolation, settings.max_wait).await?;
        debug!(%tx, isolation = %settings.isolation, "interactive transaction started");

        let mut handle = Transaction::new(inner.clone(), tx, settings.timeout);
        let outcome = tokio::time::timeout(settings.timeout, body(&mut handle)).await;
        match outcome {
            Ok(Ok(value)) => {
                if handle.is_open() {
                    handle.commit().await?;
                }
                Ok(value)
            }
            Ok(Err(err)) => {
                debug!(%tx, error = %err, "transaction body failed");
                handle.abort().await;
                Err(err)
            }
            Err(_) => {
                handle.expire().await;
                Err(handle.timeout_error())
            }
        }
    }
}
