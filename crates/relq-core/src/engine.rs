//! The engine handle.
//!
//! [`Engine`] owns the registry, the store and the configuration. It is cheap
//! to clone and every clone talks to the same store.

use std::sync::Arc;

use relq_proto::{
    AggregateArgs, AggregateResult, BatchPayload, CountArgs, CreateArgs, CreateManyArgs,
    DeleteArgs, DeleteManyArgs, FindManyArgs, FindUniqueArgs, GroupByArgs, GroupRow, Operation,
    Record, Request, Response, UpdateArgs, UpdateManyArgs, UpsertArgs,
};
use tracing::info;

use crate::catalog::SchemaRegistry;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::query::QueryExecutor;
use crate::request;
use crate::storage::{Scope, Storage};
use crate::transaction::Transaction;

pub(crate) struct Inner {
    pub registry: Arc<SchemaRegistry>,
    pub storage: Arc<dyn Storage>,
    pub config: EngineConfig,
}

impl Inner {
    pub(crate) fn executor(&self) -> QueryExecutor<'_> {
        QueryExecutor::new(&self.registry, self.storage.as_ref(), &self.config)
    }
}

/// Data-access engine over a registry and a store.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    /// Create an engine.
    pub fn new(
        registry: Arc<SchemaRegistry>,
        storage: Arc<dyn Storage>,
        config: EngineConfig,
    ) -> Self {
        info!(
            models = registry.models().count(),
            max_depth = config.max_depth,
            "engine ready"
        );
        Self {
            inner: Arc::new(Inner {
                registry,
                storage,
                config,
            }),
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.inner.storage
    }

    pub(crate) fn inner(&self) -> &Arc<Inner> {
        &self.inner
    }

    /// Run one request outside any transaction.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.inner
            .executor()
            .execute(Scope::Autocommit, &request)
            .await
    }

    /// Decode a JSON argument object and run it.
    ///
    /// `action` is an operation name such as `"findMany"`.
    pub async fn execute_json(
        &self,
        model: &str,
        action: &str,
        args: serde_json::Value,
    ) -> Result<Response> {
        let action = action.parse()?;
        let request = request::decode(&self.inner.registry, model, action, args)?;
        self.execute(request).await
    }

    /// Operations on one model.
    pub fn model(&self, name: impl Into<String>) -> ModelClient<'_> {
        ModelClient {
            model: name.into(),
            target: Target::Engine(self),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

enum Target<'e> {
    Engine(&'e Engine),
    Transaction(&'e mut Transaction),
}

/// Typed operations on one model, outside or inside a transaction.
pub struct ModelClient<'e> {
    model: String,
    target: Target<'e>,
}

impl<'e> ModelClient<'e> {
    pub(crate) fn in_transaction(tx: &'e mut Transaction, model: String) -> Self {
        Self {
            model,
            target: Target::Transaction(tx),
        }
    }

    async fn send(self, operation: Operation) -> Result<Response> {
        let request = Request::new(self.model, operation);
        match self.target {
            Target::Engine(engine) => engine.execute(request).await,
            Target::Transaction(tx) => tx.execute(request).await,
        }
    }

    pub async fn find_many(self, args: FindManyArgs) -> Result<Vec<Record>> {
        match self.send(Operation::FindMany(args)).await? {
            Response::Many(records) => Ok(records),
            other => Err(unexpected("findMany", &other)),
        }
    }

    pub async fn find_first(self, args: FindManyArgs) -> Result<Option<Record>> {
        optional("findFirst", self.send(Operation::FindFirst(args)).await?)
    }

    pub async fn find_first_or_throw(self, args: FindManyArgs) -> Result<Record> {
        record("findFirstOrThrow", self.send(Operation::FindFirstOrThrow(args)).await?)
    }

    pub async fn find_unique(self, args: FindUniqueArgs) -> Result<Option<Record>> {
        optional("findUnique", self.send(Operation::FindUnique(args)).await?)
    }

    pub async fn find_unique_or_throw(self, args: FindUniqueArgs) -> Result<Record> {
        record("findUniqueOrThrow", self.send(Operation::FindUniqueOrThrow(args)).await?)
    }

    pub async fn create(self, args: CreateArgs) -> Result<Record> {
        record("create", self.send(Operation::Create(args)).await?)
    }

    pub async fn create_many(self, args: CreateManyArgs) -> Result<BatchPayload> {
        batch("createMany", self.send(Operation::CreateMany(args)).await?)
    }

    pub async fn update(self, args: UpdateArgs) -> Result<Record> {
        record("update", self.send(Operation::Update(args)).await?)
    }

    pub async fn update_many(self, args: UpdateManyArgs) -> Result<BatchPayload> {
        batch("updateMany", self.send(Operation::UpdateMany(args)).await?)
    }

    pub async fn delete(self, args: DeleteArgs) -> Result<Record> {
        record("delete", self.send(Operation::Delete(args)).await?)
    }

    pub async fn delete_many(self, args: DeleteManyArgs) -> Result<BatchPayload> {
        batch("deleteMany", self.send(Operation::DeleteMany(args)).await?)
    }

    pub async fn upsert(self, args: UpsertArgs) -> Result<Record> {
        record("upsert", self.send(Operation::Upsert(args)).await?)
    }

    pub async fn aggregate(self, args: AggregateArgs) -> Result<AggregateResult> {
        match self.send(Operation::Aggregate(args)).await? {
            Response::Aggregate(result) => Ok(result),
            other => Err(unexpected("aggregate", &other)),
        }
    }

    pub async fn group_by(self, args: GroupByArgs) -> Result<Vec<GroupRow>> {
        match self.send(Operation::GroupBy(args)).await? {
            Response::Groups(groups) => Ok(groups),
            other => Err(unexpected("groupBy", &other)),
        }
    }

    pub async fn count(self, args: CountArgs) -> Result<u64> {
        match self.send(Operation::Count(args)).await? {
            Response::Count(n) => Ok(n),
            other => Err(unexpected("count", &other)),
        }
    }
}

fn optional(action: &str, response: Response) -> Result<Option<Record>> {
    match response {
        Response::Optional(record) => Ok(record),
        other => Err(unexpected(action, &other)),
    }
}

fn record(action: &str, response: Response) -> Result<Record> {
    match response {
        Response::Record(record) => Ok(record),
        other => Err(unexpected(action, &other)),
    }
}

fn batch(action: &str, response: Response) -> Result<BatchPayload> {
    match response {
        Response::Batch(payload) => Ok(payload),
        other => Err(unexpected(action, &other)),
    }
}

fn unexpected(action: &str, response: &Response) -> Error {
    Error::InternalConsistency(format!("{} produced an unexpected response: {:?}", action, response))
}
