//! Batch transactions.

use relq_proto::{Request, Response, TransactionOptions};
use tracing::{debug, instrument, warn};

use super::{begin, rollback_quietly, Settings};
use crate::engine::Engine;
use crate::error::{Error, Result, TimeoutPhase};
use crate::storage::Scope;

impl Engine {
    /// Run `requests` atomically, each as its own statement of one transaction.
    ///
    /// Every request is validated before the transaction starts. A statement
    /// sees the data as of the start plus its own writes, never those of
    /// another statement. Any failure rolls back the whole batch.
    #[instrument(skip_all, fields(requests = requests.len()))]
    pub async fn batch(
        &self,
        requests: Vec<Request>,
        options: TransactionOptions,
    ) -> Result<Vec<Response>> {
        let inner = self.inner();
        let storage = inner.storage.as_ref();
        let settings = Settings::resolve(storage, &inner.config, &options)?;
        if u32::try_from(requests.len()).is_err() {
            return Err(Error::validation("too many requests in one batch"));
        }

        let executor = inner.executor();
        let prepared = requests
            .iter()
            .map(|request| executor.prepare(request))
            .collect::<Result<Vec<_>>>()?;

        let tx = begin(storage, settings.isolation, settings.max_wait).await?;
        let statements = async {
            let mut responses = Vec::with_capacity(prepared.len());
            for (index, request) in (0u32..).zip(&prepared) {
                let scope = Scope::Statement { tx, index };
                responses.push(executor.run(request, scope).await?);
            }
            Ok::<_, Error>(responses)
        };

        match tokio::time::timeout(settings.timeout, statements).await {
            Ok(Ok(responses)) => {
                storage.commit(tx).await?;
                debug!(%tx, statements = responses.len(), "batch committed");
                Ok(responses)
            }
            Ok(Err(err)) => {
                warn!(%tx, error = %err, "batch failed, rolling back");
                rollback_quietly(storage, tx).await;
                Err(err)
            }
            Err(_) => {
                warn!(%tx, timeout = ?settings.timeout, "batch timed out, rolling back");
                rollback_quietly(storage, tx).await;
                Err(Error::TransactionTimeout {
                    phase: TimeoutPhase::Execute,
                    limit: settings.timeout,
                })
            }
        }
    }
}
