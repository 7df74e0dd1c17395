//! Sled-backed store implementation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use relq_proto::{IsolationLevel, Value};
use sled::{Db, Tree};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::transaction::{model_prefix, to_batch, Overlay, Pending, TxState, View};
use super::{
    AssignOp, Assignment, Row, Savepoint, Scope, Storage, StoreConfig, StoreError, StoreOutput, StoreQuery,
    TxId,
};
use crate::catalog::{ModelDescriptor, ReferentialAction, RelationLink, SchemaRegistry};
use crate::query::compare::values_equal;
use crate::query::predicate::PredicateNode;

/// Tree name for row data.
const ROWS_TREE: &str = "rows";

/// Isolation levels the store honors. Write transactions are serialized by
/// the writer gate, so every level listed is satisfied.
const SUPPORTED_ISOLATION: &[IsolationLevel] = &[
    IsolationLevel::ReadCommitted,
    IsolationLevel::RepeatableRead,
    IsolationLevel::Serializable,
];

/// The reference store: rows in one sled tree keyed by `model\0seq`.
pub struct SledStore {
    db: Db,
    rows: Tree,
    registry: Arc<SchemaRegistry>,
    /// Writer gate; one open transaction at a time.
    gate: Arc<Semaphore>,
    open: DashMap<u64, Arc<Mutex<TxState>>>,
    next_tx: AtomicU64,
    flush_on_commit: bool,
}

impl SledStore {
    /// Open or create a store for the models of a registry.
    pub fn open(config: StoreConfig, registry: Arc<SchemaRegistry>) -> Result<Self, StoreError> {
        let db = config.to_sled_config().open()?;
        let rows = db.open_tree(ROWS_TREE)?;
        info!(
            path = %config.path.display(),
            temporary = config.temporary,
            recovered = db.was_recovered(),
            "store opened"
        );

        Ok(Self {
            db,
            rows,
            registry,
            gate: Arc::new(Semaphore::new(1)),
            open: DashMap::new(),
            next_tx: AtomicU64::new(1),
            flush_on_commit: config.flush_every_ms.is_none(),
        })
    }

    /// Check if the database was recovered from a previous run.
    pub fn was_recovered(&self) -> bool {
        self.db.was_recovered()
    }

    /// Number of open transactions.
    pub fn open_transactions(&self) -> usize {
        self.open.len()
    }

    /// Flush all pending writes to disk.
    pub async fn flush(&self) -> Result<(), StoreError> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn state(&self, tx: TxId) -> Result<Arc<Mutex<TxState>>, StoreError> {
        self.open
            .get(&tx.0)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StoreError::UnknownTransaction(tx.0))
    }

    fn new_key(&self, model: &str) -> Result<Vec<u8>, StoreError> {
        let mut key = model_prefix(model);
        key.extend_from_slice(&self.db.generate_id()?.to_be_bytes());
        Ok(key)
    }

    fn read(&self, view: &View<'_>, query: &StoreQuery) -> Result<StoreOutput, StoreError> {
        match query {
            StoreQuery::Select {
                model,
                predicate,
                order,
                offset,
                limit,
            } => {
                self.check_model(model)?;
                let rows = view.select(model, predicate.as_ref(), order, *offset, *limit)?;
                Ok(StoreOutput::Rows(rows))
            }
            StoreQuery::Count { model, predicate } => {
                self.check_model(model)?;
                let n = view.matching(model, predicate.as_ref())?.len();
                Ok(StoreOutput::Count(n as u64))
            }
            _ => Err(StoreError::Codec(format!(
                "{} is not a read query",
                query.kind()
            ))),
        }
    }

    /// Apply a write to an overlay. On error the overlay is left unchanged.
    fn write(
        &self,
        overlay: &mut Overlay,
        statement: Option<u32>,
        query: StoreQuery,
    ) -> Result<StoreOutput, StoreError> {
        let saved = overlay.clone();
        let mut writer = Writer {
            store: self,
            overlay,
            statement,
        };
        let result = match query {
            StoreQuery::Insert {
                model,
                rows,
                skip_duplicates,
            } => writer.insert(&model, rows, skip_duplicates),
            StoreQuery::Update {
                model,
                predicate,
                assignments,
            } => writer.update(&model, predicate.as_ref(), &assignments),
            StoreQuery::Delete { model, predicate } => writer.delete(&model, predicate.as_ref()),
            other => self.read(&writer.view(), &other).map(StoreOutput::into_rows),
        };
        match result {
            Ok(rows) => Ok(StoreOutput::Rows(rows)),
            Err(err) => {
                *overlay = saved;
                Err(err)
            }
        }
    }

    fn execute_in(
        &self,
        tx: TxId,
        statement: Option<u32>,
        query: StoreQuery,
    ) -> Result<StoreOutput, StoreError> {
        let state = self.state(tx)?;
        let mut guard = state.lock();
        if query.is_write() {
            self.write(&mut guard.overlay, statement, query)
        } else {
            let view = View::new(&self.rows, Some(&guard.overlay), statement);
            self.read(&view, &query)
        }
    }

    fn check_model(&self, model: &str) -> Result<&ModelDescriptor, StoreError> {
        self.registry
            .describe(model)
            .map_err(|_| StoreError::UnknownModel(model.to_string()))
    }

    fn commit_overlay(&self, overlay: &Overlay) -> Result<(), StoreError> {
        if overlay.is_empty() {
            return Ok(());
        }
        self.rows.apply_batch(to_batch(overlay)?)?;
        Ok(())
    }
}

#[async_trait]
impl Storage for SledStore {
    #[instrument(skip(self, query), fields(model = query.model(), kind = query.kind()))]
    async fn execute(&self, scope: Scope, query: StoreQuery) -> Result<StoreOutput, StoreError> {
        match scope {
            Scope::Autocommit if query.is_write() => {
                let permit = self
                    .gate
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| StoreError::Closed)?;
                let mut state = TxState::new(self.default_isolation_level(), permit);
                let out = self.write(&mut state.overlay, None, query)?;
                self.commit_overlay(&state.overlay)?;
                if self.flush_on_commit {
                    self.db.flush_async().await?;
                }
                debug!(rows = out.count(), "autocommit write applied");
                Ok(out)
            }
            Scope::Autocommit => self.read(&View::committed(&self.rows), &query),
            Scope::Transaction(tx) => self.execute_in(tx, None, query),
            Scope::Statement { tx, index } => self.execute_in(tx, Some(index), query),
        }
    }

    async fn begin(&self, isolation: IsolationLevel) -> Result<TxId, StoreError> {
        if !SUPPORTED_ISOLATION.contains(&isolation) {
            return Err(StoreError::UnsupportedIsolation(isolation));
        }
        let permit = self
            .gate
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Closed)?;
        let id = self.next_tx.fetch_add(1, Ordering::Relaxed);
        self.open
            .insert(id, Arc::new(Mutex::new(TxState::new(isolation, permit))));
        debug!(tx = id, %isolation, "transaction started");
        Ok(TxId(id))
    }

    async fn commit(&self, tx: TxId) -> Result<(), StoreError> {
        let (_, state) = self
            .open
            .remove(&tx.0)
            .ok_or(StoreError::UnknownTransaction(tx.0))?;
        let (writes, isolation) = {
            let guard = state.lock();
            self.commit_overlay(&guard.overlay)?;
            (guard.overlay.len(), guard.isolation)
        };
        if self.flush_on_commit {
            self.db.flush_async().await?;
        }
        debug!(tx = tx.0, %isolation, writes, "transaction committed");
        Ok(())
    }

    async fn rollback(&self, tx: TxId) -> Result<(), StoreError> {
        let (_, state) = self
            .open
            .remove(&tx.0)
            .ok_or(StoreError::UnknownTransaction(tx.0))?;
        let discarded = state.lock().overlay.len();
        debug!(tx = tx.0, discarded, "transaction rolled back");
        Ok(())
    }

    async fn savepoint(&self, tx: TxId) -> Result<Savepoint, StoreError> {
        let state = self.state(tx)?;
        let mut guard = state.lock();
        let copy = guard.overlay.clone();
        guard.savepoints.push(copy);
        Ok(Savepoint((guard.savepoints.len() - 1) as u32))
    }

    async fn rollback_to_savepoint(
        &self,
        tx: TxId,
        savepoint: Savepoint,
    ) -> Result<(), StoreError> {
        let state = self.state(tx)?;
        let mut guard = state.lock();
        let index = savepoint.0 as usize;
        if index >= guard.savepoints.len() {
            return Err(StoreError::UnknownSavepoint {
                tx: tx.0,
                savepoint: savepoint.0,
            });
        }
        let mut restored = guard.savepoints.split_off(index);
        guard.overlay = restored.swap_remove(0);
        debug!(tx = tx.0, %savepoint, "rolled back to savepoint");
        Ok(())
    }

    async fn release_savepoint(&self, tx: TxId, savepoint: Savepoint) -> Result<(), StoreError> {
        let state = self.state(tx)?;
        let mut guard = state.lock();
        let index = savepoint.0 as usize;
        if index >= guard.savepoints.len() {
            return Err(StoreError::UnknownSavepoint {
                tx: tx.0,
                savepoint: savepoint.0,
            });
        }
        guard.savepoints.truncate(index);
        Ok(())
    }

    fn supported_isolation_levels(&self) -> &[IsolationLevel] {
        SUPPORTED_ISOLATION
    }

    fn default_isolation_level(&self) -> IsolationLevel {
        IsolationLevel::Serializable
    }
}

/// Applies one write query to an overlay, enforcing constraints.
struct Writer<'a> {
    store: &'a SledStore,
    overlay: &'a mut Overlay,
    statement: Option<u32>,
}

impl Writer<'_> {
    /// What the writing statement sees.
    fn view(&self) -> View<'_> {
        View::new(&self.store.rows, Some(&*self.overlay), self.statement)
    }

    /// Committed data plus every buffered write, for constraint checks.
    fn full_view(&self) -> View<'_> {
        View::new(&self.store.rows, Some(&*self.overlay), None)
    }

    fn put(&mut self, key: Vec<u8>, model: &str, row: Option<Row>) -> Result<(), StoreError> {
        if let Some(existing) = self.overlay.get(&key) {
            if let (Some(theirs), Some(ours)) = (existing.statement, self.statement) {
                if theirs != ours {
                    warn!(model, theirs, ours, "batch statements wrote the same row");
                    return Err(StoreError::WriteConflict {
                        model: model.to_string(),
                        reason: format!(
                            "row written by statement {} and statement {}",
                            theirs, ours
                        ),
                    });
                }
            }
        }
        self.overlay.insert(
            key,
            Pending {
                model: model.to_string(),
                row,
                statement: self.statement,
            },
        );
        Ok(())
    }

    fn insert(
        &mut self,
        model: &str,
        rows: Vec<Row>,
        skip_duplicates: bool,
    ) -> Result<Vec<Row>, StoreError> {
        let store = self.store;
        let descriptor = store.check_model(model)?;
        let mut inserted = Vec::with_capacity(rows.len());

        for row in rows {
            match self.check_unique(descriptor, &row, None, None) {
                Err(StoreError::UniqueViolation { constraint, .. }) if skip_duplicates => {
                    debug!(model, constraint = %constraint, "skipping duplicate row");
                    continue;
                }
                other => other?,
            }
            self.check_foreign_keys(descriptor, &row, None)?;
            let key = store.new_key(model)?;
            self.put(key, model, Some(row.clone()))?;
            inserted.push(row);
        }
        Ok(inserted)
    }

    fn update(
        &mut self,
        model: &str,
        predicate: Option<&PredicateNode>,
        assignments: &[Assignment],
    ) -> Result<Vec<Row>, StoreError> {
        let store = self.store;
        let descriptor = store.check_model(model)?;
        let targets = self.view().matching(model, predicate)?;
        let mut updated = Vec::with_capacity(targets.len());

        for (key, old) in targets {
            let new = apply_assignments(model, &old, assignments)?;
            self.check_unique(descriptor, &new, Some(&old), Some(&key))?;
            self.check_foreign_keys(descriptor, &new, Some(&old))?;
            self.check_referenced_keys(model, &old, &new)?;
            self.put(key, model, Some(new.clone()))?;
            updated.push(new);
        }
        Ok(updated)
    }

    fn delete(
        &mut self,
        model: &str,
        predicate: Option<&PredicateNode>,
    ) -> Result<Vec<Row>, StoreError> {
        self.store.check_model(model)?;
        let targets = self.view().matching(model, predicate)?;
        let mut deleted = Vec::with_capacity(targets.len());

        for (key, row) in targets {
            // an earlier cascade in this query may already have removed it
            if !self.full_view().contains(model, &key)? {
                continue;
            }
            self.delete_row(model, key, &row)?;
            deleted.push(row);
        }
        Ok(deleted)
    }

    fn delete_row(&mut self, model: &str, key: Vec<u8>, row: &Row) -> Result<(), StoreError> {
        self.put(key, model, None)?;

        let store = self.store;
        for incoming in store.registry.incoming(model) {
            let value = row.value(&incoming.references);
            if value.is_null() {
                continue;
            }
            let children = self
                .full_view()
                .keyed_by(&incoming.model, &incoming.field, value)?;
            if children.is_empty() {
                continue;
            }
            match incoming.on_delete {
                ReferentialAction::Restrict => {
                    return Err(StoreError::ForeignKeyViolation {
                        model: incoming.model.clone(),
                        constraint: incoming.constraint.clone(),
                        fields: vec![incoming.field.clone()],
                    });
                }
                ReferentialAction::Cascade => {
                    debug!(model = %incoming.model, count = children.len(), "cascading delete");
                    for (child_key, child) in children {
                        if self.full_view().contains(&incoming.model, &child_key)? {
                            self.delete_row(&incoming.model, child_key, &child)?;
                        }
                    }
                }
                ReferentialAction::SetNull => {
                    for (child_key, mut child) in children {
                        child.set(incoming.field.clone(), Value::Null);
                        self.put(child_key, &incoming.model, Some(child))?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Unique keys of `row` must not collide with any other visible row.
    /// On update only keys whose values changed are checked.
    fn check_unique(
        &self,
        descriptor: &ModelDescriptor,
        row: &Row,
        old: Option<&Row>,
        own_key: Option<&[u8]>,
    ) -> Result<(), StoreError> {
        let view = self.full_view();
        for unique in descriptor.unique_keys() {
            let tuple = row.project(&unique.fields);
            if tuple.iter().any(Value::is_null) {
                continue;
            }
            if let Some(old) = old {
                let before = old.project(&unique.fields);
                if before.iter().zip(&tuple).all(|(a, b)| values_equal(a, b)) {
                    continue;
                }
            }
            let rows = view.scan(&descriptor.name)?;
            let clash = rows.iter().any(|(key, other)| {
                Some(key.as_slice()) != own_key
                    && unique
                        .fields
                        .iter()
                        .zip(&tuple)
                        .all(|(f, v)| values_equal(other.value(f), v))
            });
            if clash {
                return Err(StoreError::UniqueViolation {
                    model: descriptor.name.clone(),
                    constraint: unique.name.clone(),
                    fields: unique.fields.clone(),
                });
            }
        }
        Ok(())
    }

    /// Owned foreign keys must point at a row the statement can see.
    fn check_foreign_keys(
        &self,
        descriptor: &ModelDescriptor,
        row: &Row,
        old: Option<&Row>,
    ) -> Result<(), StoreError> {
        let view = self.view();
        let full = self.full_view();
        for relation in &descriptor.relations {
            let RelationLink::Owned { field, references } = &relation.link else {
                continue;
            };
            let value = row.value(field);
            if value.is_null() {
                continue;
            }
            if old.is_some_and(|old| values_equal(old.value(field), value)) {
                continue;
            }
            let exists = !view.keyed_by(&relation.target, references, value)?.is_empty()
                && !full.keyed_by(&relation.target, references, value)?.is_empty();
            if !exists {
                return Err(StoreError::ForeignKeyViolation {
                    model: descriptor.name.clone(),
                    constraint: format!("{}_{}_fkey", descriptor.name, field),
                    fields: vec![field.clone()],
                });
            }
        }
        Ok(())
    }

    /// A referenced key may not change while other rows point at it.
    fn check_referenced_keys(&self, model: &str, old: &Row, new: &Row) -> Result<(), StoreError> {
        let view = self.full_view();
        for incoming in self.store.registry.incoming(model) {
            let before = old.value(&incoming.references);
            if before.is_null() || values_equal(before, new.value(&incoming.references)) {
                continue;
            }
            if !view
                .keyed_by(&incoming.model, &incoming.field, before)?
                .is_empty()
            {
                return Err(StoreError::ForeignKeyViolation {
                    model: incoming.model.clone(),
                    constraint: incoming.constraint.clone(),
                    fields: vec![incoming.field.clone()],
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
}

fn apply_assignments(model: &str, old: &Row, assignments: &[Assignment]) -> Result<Row, StoreError> {
    let mut row = old.clone();
    for assignment in assignments {
        let current = row.value(&assignment.field).clone();
        let next = match &assignment.op {
            AssignOp::Set(value) => Some(value.clone()),
            AssignOp::Increment(v) => arithmetic(&current, v, Arith::Add),
            AssignOp::Decrement(v) => arithmetic(&current, v, Arith::Sub),
            AssignOp::Multiply(v) => arithmetic(&current, v, Arith::Mul),
            AssignOp::Divide(v) => arithmetic(&current, v, Arith::Div),
            AssignOp::Push(items) => Some(match current {
                Value::StringList(mut list) => {
                    list.extend(items.iter().cloned());
                    Value::StringList(list)
                }
                _ => Value::StringList(items.clone()),
            }),
        };
        let next = next.ok_or_else(|| StoreError::Overflow {
            model: model.to_string(),
            field: assignment.field.clone(),
        })?;
        row.set(assignment.field.clone(), next);
    }
    Ok(row)
}

/// Numeric update. A null operand stays null; `None` means overflow.
fn arithmetic(current: &Value, operand: &Value, op: Arith) -> Option<Value> {
    match (current, operand) {
        (Value::Null, _) => Some(Value::Null),
        (Value::Int(a), Value::Int(b)) => match op {
            Arith::Add => a.checked_add(*b),
            Arith::Sub => a.checked_sub(*b),
            Arith::Mul => a.checked_mul(*b),
            Arith::Div => a.checked_div(*b),
        }
        .map(Value::Int),
        (a, b) => {
            let (a, b) = (a.as_f64()?, b.as_f64()?);
            let result = match op {
                Arith::Add => a + b,
                Arith::Sub => a - b,
                Arith::Mul => a * b,
                Arith::Div => a / b,
            };
            result.is_finite().then_some(Value::Float(result))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldDescriptor, RelationDescriptor, ScalarKind};

    fn registry() -> Arc<SchemaRegistry> {
        Arc::new(
            SchemaRegistry::builder()
                .model(
                    ModelDescriptor::new("User", "id")
                        .with_field(FieldDescriptor::new("id", ScalarKind::String))
                        .with_field(FieldDescriptor::new("email", ScalarKind::String))
                        .with_field(FieldDescriptor::new("visits", ScalarKind::Int))
                        .with_unique(["email"])
                        .with_relation(RelationDescriptor::has_many("posts", "Post")),
                )
                .model(
                    ModelDescriptor::new("Post", "id")
                        .with_field(FieldDescriptor::new("id", ScalarKind::String))
                        .with_field(FieldDescriptor::new("authorId", ScalarKind::String))
                        .with_relation(
                            RelationDescriptor::belongs_to("author", "User", "authorId", "id")
                                .with_on_delete(ReferentialAction::Cascade),
                        ),
                )
                .build()
                .unwrap(),
        )
    }

    fn store() -> SledStore {
        SledStore::open(StoreConfig::temporary(), registry()).unwrap()
    }

    fn user(id: &str, email: &str) -> Row {
        Row::new().with("id", id).with("email", email).with("visits", 0)
    }

    fn insert(model: &str, rows: Vec<Row>) -> StoreQuery {
        StoreQuery::Insert {
            model: model.into(),
            rows,
            skip_duplicates: false,
        }
    }

    async fn all(store: &SledStore, scope: Scope, model: &str) -> Vec<Row> {
        store
            .execute(scope, StoreQuery::select(model, None))
            .await
            .unwrap()
            .into_rows()
    }

    #[tokio::test]
    async fn test_insert_and_select_in_creation_order() {
        let store = store();
        store
            .execute(
                Scope::Autocommit,
                insert("User", vec![user("b", "b@x"), user("a", "a@x")]),
            )
            .await
            .unwrap();
        let rows = all(&store, Scope::Autocommit, "User").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value("id"), &Value::from("b"));
    }

    #[tokio::test]
    async fn test_unique_violation_and_skip_duplicates() {
        let store = store();
        store
            .execute(Scope::Autocommit, insert("User", vec![user("a", "a@x")]))
            .await
            .unwrap();

        let err = store
            .execute(Scope::Autocommit, insert("User", vec![user("b", "a@x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { ref constraint, .. } if constraint == "User_email_key"));

        let out = store
            .execute(
                Scope::Autocommit,
                StoreQuery::Insert {
                    model: "User".into(),
                    rows: vec![user("b", "a@x"), user("c", "c@x")],
                    skip_duplicates: true,
                },
            )
            .await
            .unwrap();
        assert_eq!(out.count(), 1);
    }

    #[tokio::test]
    async fn test_foreign_key_checked_on_insert() {
        let store = store();
        let err = store
            .execute(
                Scope::Autocommit,
                insert("Post", vec![Row::new().with("id", "p1").with("authorId", "ghost")]),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ForeignKeyViolation { ref constraint, .. } if constraint == "Post_authorId_fkey"));
    }

    #[tokio::test]
    async fn test_cascade_delete() {
        let store = store();
        store
            .execute(Scope::Autocommit, insert("User", vec![user("u1", "a@x")]))
            .await
            .unwrap();
        store
            .execute(
                Scope::Autocommit,
                insert("Post", vec![Row::new().with("id", "p1").with("authorId", "u1")]),
            )
            .await
            .unwrap();

        let out = store
            .execute(
                Scope::Autocommit,
                StoreQuery::Delete {
                    model: "User".into(),
                    predicate: Some(PredicateNode::eq("id", Value::from("u1"))),
                },
            )
            .await
            .unwrap();
        assert_eq!(out.count(), 1);
        assert!(all(&store, Scope::Autocommit, "Post").await.is_empty());
    }

    #[tokio::test]
    async fn test_increment_overflow_leaves_row_untouched() {
        let store = store();
        store
            .execute(
                Scope::Autocommit,
                insert("User", vec![user("u1", "a@x").with("visits", i64::MAX)]),
            )
            .await
            .unwrap();
        let err = store
            .execute(
                Scope::Autocommit,
                StoreQuery::Update {
                    model: "User".into(),
                    predicate: None,
                    assignments: vec![Assignment {
                        field: "visits".into(),
                        op: AssignOp::Increment(Value::Int(1)),
                    }],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Overflow { .. }));
        let rows = all(&store, Scope::Autocommit, "User").await;
        assert_eq!(rows[0].value("visits"), &Value::Int(i64::MAX));
    }

    #[tokio::test]
    async fn test_transaction_visibility_and_rollback() {
        let store = store();
        let tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        store
            .execute(Scope::Transaction(tx), insert("User", vec![user("u1", "a@x")]))
            .await
            .unwrap();

        assert_eq!(all(&store, Scope::Transaction(tx), "User").await.len(), 1);
        assert!(all(&store, Scope::Autocommit, "User").await.is_empty());

        store.rollback(tx).await.unwrap();
        assert!(all(&store, Scope::Autocommit, "User").await.is_empty());
        assert!(matches!(
            store.commit(tx).await,
            Err(StoreError::UnknownTransaction(_))
        ));
    }

    #[tokio::test]
    async fn test_savepoint_discards_later_writes_only() {
        let store = store();
        let tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        let scope = Scope::Transaction(tx);
        store
            .execute(scope, insert("User", vec![user("u1", "a@x")]))
            .await
            .unwrap();

        let sp = store.savepoint(tx).await.unwrap();
        store
            .execute(scope, insert("User", vec![user("u2", "b@x")]))
            .await
            .unwrap();
        assert_eq!(all(&store, scope, "User").await.len(), 2);

        store.rollback_to_savepoint(tx, sp).await.unwrap();
        let rows = all(&store, scope, "User").await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value("id"), &Value::from("u1"));
        assert!(matches!(
            store.release_savepoint(tx, sp).await,
            Err(StoreError::UnknownSavepoint { .. })
        ));

        let kept = store.savepoint(tx).await.unwrap();
        store
            .execute(scope, insert("User", vec![user("u3", "c@x")]))
            .await
            .unwrap();
        store.release_savepoint(tx, kept).await.unwrap();
        store.commit(tx).await.unwrap();
        assert_eq!(all(&store, Scope::Autocommit, "User").await.len(), 2);
    }

    #[tokio::test]
    async fn test_statements_do_not_see_each_other() {
        let store = store();
        let tx = store.begin(IsolationLevel::Serializable).await.unwrap();
        let first = Scope::Statement { tx, index: 0 };
        let second = Scope::Statement { tx, index: 1 };

        store
            .execute(first, insert("User", vec![user("u1", "a@x")]))
            .await
            .unwrap();
        assert_eq!(all(&store, first, "User").await.len(), 1);
        assert!(all(&store, second, "User").await.is_empty());

        // unique keys are still checked across statements
        let err = store
            .execute(second, insert("User", vec![user("u2", "a@x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { .. }));

        store.commit(tx).await.unwrap();
        assert_eq!(all(&store, Scope::Autocommit, "User").await.len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_isolation() {
        let store = store();
        let err = store.begin(IsolationLevel::Snapshot).await.unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedIsolation(IsolationLevel::Snapshot)));
        assert_eq!(store.open_transactions(), 0);
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(
            arithmetic(&Value::Int(6), &Value::Int(3), Arith::Div),
            Some(Value::Int(2))
        );
        assert_eq!(
            arithmetic(&Value::Float(1.5), &Value::Int(2), Arith::Mul),
            Some(Value::Float(3.0))
        );
        assert_eq!(
            arithmetic(&Value::Null, &Value::Int(1), Arith::Add),
            Some(Value::Null)
        );
        assert_eq!(arithmetic(&Value::Int(i64::MIN), &Value::Int(-1), Arith::Div), None);
    }
}
