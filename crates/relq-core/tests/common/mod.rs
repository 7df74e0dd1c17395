//! Shared harness for the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relq_core::proto::{CreateArgs, Data, IsolationLevel, Record, RelationWrite, Value};
use relq_core::storage::StoreOutput;
use relq_core::{
    DefaultValue, Engine, EngineConfig, FieldDescriptor, ModelDescriptor, ReferentialAction,
    RelationDescriptor, Savepoint, ScalarKind, SchemaRegistry, Scope, SledStore, Storage,
    StoreConfig, StoreError, StoreQuery, TxId,
};

/// Users with orders, payments and an optional profile. Payments block
/// deleting their user.
pub fn shop() -> SchemaRegistry {
    SchemaRegistry::builder()
        .model(
            ModelDescriptor::new("User", "id")
                .with_fields([
                    FieldDescriptor::new("id", ScalarKind::String).with_default(DefaultValue::Uuid),
                    FieldDescriptor::new("email", ScalarKind::String),
                    FieldDescriptor::optional("name", ScalarKind::String),
                    FieldDescriptor::new("role", ScalarKind::String)
                        .with_default(DefaultValue::Static(Value::from("member"))),
                    FieldDescriptor::optional("age", ScalarKind::Int),
                    FieldDescriptor::optional("meta", ScalarKind::Json),
                ])
                .with_unique(["email"])
                .with_relation(RelationDescriptor::has_many("orders", "Order"))
                .with_relation(RelationDescriptor::has_many("payments", "Payment"))
                .with_relation(RelationDescriptor::has_one("profile", "Profile")),
        )
        .model(
            ModelDescriptor::new("Order", "id")
                .with_fields([
                    FieldDescriptor::new("id", ScalarKind::String).with_default(DefaultValue::Uuid),
                    FieldDescriptor::new("userId", ScalarKind::String),
                    FieldDescriptor::new("amount", ScalarKind::Float),
                    FieldDescriptor::new("status", ScalarKind::String)
                        .with_default(DefaultValue::Static(Value::from("open"))),
                ])
                .with_relation(
                    RelationDescriptor::belongs_to("user", "User", "userId", "id")
                        .with_on_delete(ReferentialAction::Cascade),
                ),
        )
        .model(
            ModelDescriptor::new("Profile", "id")
                .with_fields([
                    FieldDescriptor::new("id", ScalarKind::String).with_default(DefaultValue::Uuid),
                    FieldDescriptor::new("userId", ScalarKind::String),
                    FieldDescriptor::optional("bio", ScalarKind::String),
                ])
                .with_unique(["userId"])
                .with_relation(
                    RelationDescriptor::belongs_to("user", "User", "userId", "id")
                        .with_on_delete(ReferentialAction::Cascade),
                ),
        )
        .model(
            ModelDescriptor::new("Payment", "id")
                .with_fields([
                    FieldDescriptor::new("id", ScalarKind::String).with_default(DefaultValue::Uuid),
                    FieldDescriptor::new("userId", ScalarKind::String),
                    FieldDescriptor::new("amount", ScalarKind::Float),
                ])
                .with_relation(RelationDescriptor::belongs_to("user", "User", "userId", "id")),
        )
        .build()
        .unwrap()
}

/// Send engine logs to the test writer, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An engine over a fresh on-disk store.
pub struct TestContext {
    pub engine: Engine,
    _dir: tempfile::TempDir,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(shop());
        let store = SledStore::open(StoreConfig::new(dir.path()), registry.clone()).unwrap();
        Self {
            engine: Engine::new(registry, Arc::new(store), config),
            _dir: dir,
        }
    }

    /// An engine whose store counts every call.
    pub fn counting() -> (Self, Arc<CountingStore>) {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(shop());
        let store = SledStore::open(StoreConfig::new(dir.path()), registry.clone()).unwrap();
        let counting = Arc::new(CountingStore::new(store));
        let context = Self {
            engine: Engine::new(registry, counting.clone(), EngineConfig::default()),
            _dir: dir,
        };
        (context, counting)
    }

    /// Create a user with the given orders.
    pub async fn user(&self, email: &str, age: Option<i64>, amounts: &[f64]) -> Record {
        let mut data = Data::new().set("email", email);
        if let Some(age) = age {
            data = data.set("age", age);
        }
        if !amounts.is_empty() {
            let orders = amounts
                .iter()
                .map(|amount| Data::new().set("amount", *amount))
                .collect();
            data = data.relation("orders", RelationWrite::create_many(orders));
        }
        self.engine
            .model("User")
            .create(CreateArgs::new(data))
            .await
            .unwrap()
    }
}

/// Delegates to a [`SledStore`] and counts the calls that reach it.
pub struct CountingStore {
    inner: SledStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: SledStore) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Storage for CountingStore {
    async fn execute(&self, scope: Scope, query: StoreQuery) -> Result<StoreOutput, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.execute(scope, query).await
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<TxId, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.begin(isolation).await
    }

    async fn commit(&self, tx: TxId) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.commit(tx).await
    }

    async fn rollback(&self, tx: TxId) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback(tx).await
    }

    async fn savepoint(&self, tx: TxId) -> Result<Savepoint, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.savepoint(tx).await
    }

    async fn rollback_to_savepoint(
        &self,
        tx: TxId,
        savepoint: Savepoint,
    ) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.rollback_to_savepoint(tx, savepoint).await
    }

    async fn release_savepoint(&self, tx: TxId, savepoint: Savepoint) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.release_savepoint(tx, savepoint).await
    }

    fn supported_isolation_levels(&self) -> &[IsolationLevel] {
        self.inner.supported_isolation_levels()
    }

    fn default_isolation_level(&self) -> IsolationLevel {
        self.inner.default_isolation_level()
    }
}

/// String value of a record field.
pub fn text(record: &Record, field: &str) -> String {
    record
        .get(field)
        .and_then(Value::as_str)
        .unwrap()
        .to_string()
}
