//! Query executor.
//!
//! Turns one [`Request`] into store calls. Preparation is synchronous and
//! validates the whole request against the registry before anything is read,
//! so a rejected request never reaches storage. Running a prepared request
//! issues the store queries in the scope it is given.

use relq_proto::{Action, CountArgs, FindManyArgs, Operation, Record, Request, Response};
use tracing::{debug, instrument};

use super::aggregate::{self, AggregatePlan, AggregatePlanner, GroupByPlan};
use super::filter::PredicateCompiler;
use super::mutation::{complete_row, identity, CreatePlan, MutationPlanner, NestedWriter, UpdatePlan};
use super::planner::{LoadPlan, SelectionResolver};
use super::predicate::PredicateNode;
use super::stitcher::RelationStitcher;
use crate::catalog::SchemaRegistry;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::storage::{Row, Scope, Storage, StoreQuery};
use crate::transaction;

/// A request validated against the registry, ready to run.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub model: String,
    pub action: Action,
    prepared: Prepared,
}

impl PreparedRequest {
    /// Check if running the request takes more than one store write.
    ///
    /// Such requests run inside a transaction even when issued outside one.
    pub fn needs_transaction(&self) -> bool {
        matches!(
            self.prepared,
            Prepared::Create { .. }
                | Prepared::Update { .. }
                | Prepared::Delete { .. }
                | Prepared::Upsert { .. }
        )
    }
}

#[derive(Debug, Clone)]
enum Prepared {
    FindMany(LoadPlan),
    /// `findFirst` and `findUnique`, with or without the throwing variant.
    FindOne {
        plan: LoadPlan,
        throw: bool,
    },
    Create {
        plan: CreatePlan,
        shape: LoadPlan,
    },
    CreateMany {
        plans: Vec<CreatePlan>,
        skip_duplicates: bool,
    },
    Update {
        predicate: PredicateNode,
        plan: UpdatePlan,
        shape: LoadPlan,
    },
    UpdateMany {
        predicate: Option<PredicateNode>,
        plan: UpdatePlan,
    },
    Delete {
        predicate: PredicateNode,
        shape: LoadPlan,
    },
    DeleteMany {
        predicate: Option<PredicateNode>,
    },
    Upsert {
        predicate: PredicateNode,
        create: CreatePlan,
        update: UpdatePlan,
        shape: LoadPlan,
    },
    Aggregate(AggregatePlan),
    GroupBy(GroupByPlan),
    Count(LoadPlan),
}

/// Executes requests against a store.
pub struct QueryExecutor<'a> {
    registry: &'a SchemaRegistry,
    storage: &'a dyn Storage,
    config: &'a EngineConfig,
}

impl<'a> QueryExecutor<'a> {
    pub fn new(
        registry: &'a SchemaRegistry,
        storage: &'a dyn Storage,
        config: &'a EngineConfig,
    ) -> Self {
        Self {
            registry,
            storage,
            config,
        }
    }

    /// Validate a request and plan it. Does not touch storage.
    pub fn prepare(&self, request: &Request) -> Result<PreparedRequest> {
        let model = request.model.as_str();
        self.registry.describe(model)?;

        let resolver = SelectionResolver::new(self.registry, self.config.max_depth);
        let compiler = PredicateCompiler::new(self.registry);
        let mutations = MutationPlanner::new(self.registry);
        let aggregates = AggregatePlanner::new(self.registry, self.config.max_depth);

        let prepared = match &request.operation {
            Operation::FindMany(args) => Prepared::FindMany(resolver.resolve(model, args)?),
            Operation::FindFirst(args) | Operation::FindFirstOrThrow(args) => Prepared::FindOne {
                plan: resolver.resolve(model, &first_only(args))?,
                throw: matches!(request.operation, Operation::FindFirstOrThrow(_)),
            },
            Operation::FindUnique(args) | Operation::FindUniqueOrThrow(args) => {
                compiler.compile_unique(model, &args.filter)?;
                let find = FindManyArgs::new()
                    .with_filter(args.filter.clone())
                    .with_selection(args.selection.clone())
                    .take(1);
                Prepared::FindOne {
                    plan: resolver.resolve(model, &find)?,
                    throw: matches!(request.operation, Operation::FindUniqueOrThrow(_)),
                }
            }
            Operation::Create(args) => Prepared::Create {
                plan: mutations.create(model, &args.data, None)?,
                shape: resolver.resolve_shape(model, &args.selection)?,
            },
            Operation::CreateMany(args) => Prepared::CreateMany {
                plans: args
                    .data
                    .iter()
                    .map(|data| mutations.create_flat(model, data))
                    .collect::<Result<_>>()?,
                skip_duplicates: args.skip_duplicates,
            },
            Operation::Update(args) => Prepared::Update {
                predicate: compiler.compile_unique(model, &args.filter)?,
                plan: mutations.update(model, &args.data)?,
                shape: resolver.resolve_shape(model, &args.selection)?,
            },
            Operation::UpdateMany(args) => Prepared::UpdateMany {
                predicate: compiler.compile_optional(model, args.filter.as_ref())?,
                plan: mutations.update_flat(model, &args.data)?,
            },
            Operation::Delete(args) => Prepared::Delete {
                predicate: compiler.compile_unique(model, &args.filter)?,
                shape: resolver.resolve_shape(model, &args.selection)?,
            },
            Operation::DeleteMany(args) => Prepared::DeleteMany {
                predicate: compiler.compile_optional(model, args.filter.as_ref())?,
            },
            Operation::Upsert(args) => Prepared::Upsert {
                predicate: compiler.compile_unique(model, &args.filter)?,
                create: mutations.create(model, &args.create, None)?,
                update: mutations.update(model, &args.update)?,
                shape: resolver.resolve_shape(model, &args.selection)?,
            },
            Operation::Aggregate(args) => Prepared::Aggregate(aggregates.aggregate(model, args)?),
            Operation::GroupBy(args) => Prepared::GroupBy(aggregates.group_by(model, args)?),
            Operation::Count(args) => Prepared::Count(resolver.resolve(model, &count_rows(args))?),
        };

        Ok(PreparedRequest {
            model: model.to_string(),
            action: request.action(),
            prepared,
        })
    }

    /// Prepare and run a request.
    ///
    /// Requests that write more than once apply entirely or not at all: in
    /// [`Scope::Autocommit`] they run in an implicit transaction, inside a
    /// transaction they run behind a savepoint.
    pub async fn execute(&self, scope: Scope, request: &Request) -> Result<Response> {
        let prepared = self.prepare(request)?;
        if !prepared.needs_transaction() {
            return self.run(&prepared, scope).await;
        }
        let Some(tx) = scope.tx() else {
            return self.run_implicit(&prepared).await;
        };

        let savepoint = self.storage.savepoint(tx).await?;
        match self.run(&prepared, scope).await {
            Ok(response) => {
                self.storage.release_savepoint(tx, savepoint).await?;
                Ok(response)
            }
            Err(err) => {
                debug!(%tx, %savepoint, error = %err, "operation failed, undoing its writes");
                self.storage.rollback_to_savepoint(tx, savepoint).await?;
                Err(err)
            }
        }
    }

    async fn run_implicit(&self, prepared: &PreparedRequest) -> Result<Response> {
        let isolation = self.storage.default_isolation_level();
        let tx = transaction::begin(self.storage, isolation, self.config.max_wait()).await?;
        match self.run(prepared, Scope::Transaction(tx)).await {
            Ok(response) => {
                self.storage.commit(tx).await?;
                Ok(response)
            }
            Err(err) => {
                transaction::rollback_quietly(self.storage, tx).await;
                Err(err)
            }
        }
    }

    /// Run a prepared request in a scope.
    #[instrument(skip_all, fields(model = %prepared.model, action = %prepared.action))]
    pub async fn run(&self, prepared: &PreparedRequest, scope: Scope) -> Result<Response> {
        let model = prepared.model.as_str();
        let stitcher = RelationStitcher::new(self.storage, scope);
        let writer = NestedWriter::new(self.registry, self.storage, scope);

        let response = match &prepared.prepared {
            Prepared::FindMany(plan) => {
                let rows = stitcher.root_rows(&plan.root).await?;
                Response::Many(stitcher.stitch(&plan.root, rows).await?)
            }
            Prepared::FindOne { plan, throw } => {
                let rows = stitcher.root_rows(&plan.root).await?;
                let record = stitcher.stitch(&plan.root, rows).await?.into_iter().next();
                match (record, throw) {
                    (Some(record), true) => Response::Record(record),
                    (None, true) => {
                        return Err(Error::not_found(
                            model,
                            format!("{} matched no record", prepared.action),
                        ))
                    }
                    (record, false) => Response::Optional(record),
                }
            }
            Prepared::Create { plan, shape } => {
                let row = writer.create(plan, None).await?;
                Response::Record(self.shape_one(&stitcher, shape, row).await?)
            }
            Prepared::CreateMany {
                plans,
                skip_duplicates,
            } => {
                let descriptor = self.registry.describe(model)?;
                let rows = plans
                    .iter()
                    .map(|plan| complete_row(descriptor, plan, &[]))
                    .collect();
                let query = StoreQuery::Insert {
                    model: model.to_string(),
                    rows,
                    skip_duplicates: *skip_duplicates,
                };
                let count = self.storage.execute(scope, query).await?.count();
                Response::Batch(relq_proto::BatchPayload { count })
            }
            Prepared::Update {
                predicate,
                plan,
                shape,
            } => {
                let current = self
                    .find_row(model, predicate, scope)
                    .await?
                    .ok_or_else(|| Error::not_found(model, "record to update does not exist"))?;
                let updated = writer.update(plan, &current).await?;
                Response::Record(self.shape_one(&stitcher, shape, updated).await?)
            }
            Prepared::UpdateMany { predicate, plan } => {
                let query = if plan.assignments.is_empty() {
                    StoreQuery::Count {
                        model: model.to_string(),
                        predicate: predicate.clone(),
                    }
                } else {
                    StoreQuery::Update {
                        model: model.to_string(),
                        predicate: predicate.clone(),
                        assignments: plan.assignments.clone(),
                    }
                };
                let count = self.storage.execute(scope, query).await?.count();
                Response::Batch(relq_proto::BatchPayload { count })
            }
            Prepared::Delete { predicate, shape } => {
                let current = self
                    .find_row(model, predicate, scope)
                    .await?
                    .ok_or_else(|| Error::not_found(model, "record to delete does not exist"))?;
                let descriptor = self.registry.describe(model)?;
                let query = StoreQuery::Delete {
                    model: model.to_string(),
                    predicate: Some(identity(descriptor, &current)),
                };
                // the graph is read before the row and its dependents go away
                let record = self.shape_one(&stitcher, shape, current).await?;
                self.storage.execute(scope, query).await?;
                Response::Record(record)
            }
            Prepared::DeleteMany { predicate } => {
                let query = StoreQuery::Delete {
                    model: model.to_string(),
                    predicate: predicate.clone(),
                };
                let count = self.storage.execute(scope, query).await?.count();
                Response::Batch(relq_proto::BatchPayload { count })
            }
            Prepared::Upsert {
                predicate,
                create,
                update,
                shape,
            } => {
                let row = match self.find_row(model, predicate, scope).await? {
                    Some(current) => {
                        debug!("upsert matched an existing record");
                        writer.update(update, &current).await?
                    }
                    None => writer.create(create, None).await?,
                };
                Response::Record(self.shape_one(&stitcher, shape, row).await?)
            }
            Prepared::Aggregate(plan) => {
                let rows = stitcher.root_rows(&plan.rows.root).await?;
                Response::Aggregate(aggregate::compute(&plan.aggregates, &rows))
            }
            Prepared::GroupBy(plan) => {
                let query = StoreQuery::select(model, plan.predicate.clone());
                let rows = self.storage.execute(scope, query).await?.into_rows();
                Response::Groups(aggregate::group(plan, rows)?)
            }
            Prepared::Count(plan) => {
                let count = if plan.root.is_paginated() || !plan.root.distinct.is_empty() {
                    stitcher.root_rows(&plan.root).await?.len() as u64
                } else {
                    let query = StoreQuery::Count {
                        model: model.to_string(),
                        predicate: plan.root.predicate.clone(),
                    };
                    self.storage.execute(scope, query).await?.count()
                };
                Response::Count(count)
            }
        };

        debug!(?scope, "request completed");
        Ok(response)
    }

    async fn shape_one(
        &self,
        stitcher: &RelationStitcher<'_>,
        shape: &LoadPlan,
        row: Row,
    ) -> Result<Record> {
        stitcher
            .stitch(&shape.root, vec![row])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::InternalConsistency("shaping a written row yielded nothing".into()))
    }

    async fn find_row(
        &self,
        model: &str,
        predicate: &PredicateNode,
        scope: Scope,
    ) -> Result<Option<Row>> {
        let query = StoreQuery::Select {
            model: model.to_string(),
            predicate: Some(predicate.clone()),
            order: Vec::new(),
            offset: 0,
            limit: Some(1),
        };
        Ok(self
            .storage
            .execute(scope, query)
            .await?
            .into_rows()
            .into_iter()
            .next())
    }
}

/// `findFirst` reads one record from the front, or from the back for a negative `take`.
fn first_only(args: &FindManyArgs) -> FindManyArgs {
    let backward = args.take.is_some_and(|t| t < 0);
    FindManyArgs {
        take: Some(if backward { -1 } else { 1 }),
        ..args.clone()
    }
}

fn count_rows(args: &CountArgs) -> FindManyArgs {
    FindManyArgs {
        filter: args.filter.clone(),
        order_by: args.order_by.clone(),
        cursor: args.cursor.clone(),
        cursor_inclusive: args.cursor_inclusive,
        take: args.take,
        skip: args.skip,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::fixtures::shop_arc;
    use crate::storage::{SledStore, StoreConfig};
    use relq_proto::{
        CreateArgs, CreateManyArgs, Data, DeleteArgs, Filter, FindUniqueArgs, OrderBy,
        RelationWrite, SelectEntry, SelectionSpec, UpdateArgs, UpdateManyArgs, UpsertArgs, Value,
    };
    use std::sync::Arc;

    struct Harness {
        registry: Arc<SchemaRegistry>,
        store: SledStore,
        config: EngineConfig,
    }

    impl Harness {
        fn new() -> Self {
            let registry = shop_arc();
            let store = SledStore::open(StoreConfig::temporary(), registry.clone()).unwrap();
            Self {
                registry,
                store,
                config: EngineConfig::default(),
            }
        }

        async fn run(&self, model: &str, operation: Operation) -> Result<Response> {
            QueryExecutor::new(&self.registry, &self.store, &self.config)
                .execute(Scope::Autocommit, &Request::new(model, operation))
                .await
        }

        async fn user(&self, email: &str, amounts: &[f64]) -> Record {
            let orders = amounts
                .iter()
                .map(|a| Data::new().set("amount", *a))
                .collect();
            let data = Data::new()
                .set("email", email)
                .relation("orders", RelationWrite::create_many(orders));
            self.run("User", Operation::Create(CreateArgs::new(data)))
                .await
                .unwrap()
                .into_record()
                .unwrap()
        }
    }

    fn with_orders() -> SelectionSpec {
        SelectionSpec::include(vec![SelectEntry::relation(
            "orders",
            FindManyArgs::new().order_by(OrderBy::asc("amount")),
        )])
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_fills_defaults_and_nested_rows() {
        let h = Harness::new();
        let data = Data::new()
            .set("email", "a@x.io")
            .relation(
                "orders",
                RelationWrite::create_many(vec![
                    Data::new().set("amount", 9.0),
                    Data::new().set("amount", 4.0),
                ]),
            );
        let args = CreateArgs::new(data).with_selection(with_orders());
        let record = h
            .run("User", Operation::Create(args))
            .await
            .unwrap()
            .into_record()
            .unwrap();

        assert_eq!(record.get("role"), Some(&Value::from("member")));
        assert_eq!(record.get("name"), Some(&Value::Null));
        let orders = record.many("orders").unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].get("amount"), Some(&Value::Float(4.0)));
        assert_eq!(orders[0].get("status"), Some(&Value::from("open")));
        assert_eq!(orders[0].get("userId"), record.get("id"));
    }

    #[tokio::test]
    async fn test_failed_nested_create_leaves_nothing_behind() {
        let h = Harness::new();
        h.user("a@x.io", &[]).await;

        // the order connect fails after the user row is written
        let data = Data::new().set("email", "b@x.io").relation(
            "orders",
            RelationWrite::connect(Filter::eq("id", "missing")),
        );
        let err = h
            .run("User", Operation::Create(CreateArgs::new(data)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let count = h
            .run("User", Operation::Count(CountArgs::new()))
            .await
            .unwrap();
        assert_eq!(count.count(), Some(1));
    }

    #[tokio::test]
    async fn test_find_first_and_unique() {
        let h = Harness::new();
        h.user("a@x.io", &[3.0, 8.0]).await;
        h.user("b@x.io", &[1.0]).await;

        let args = FindManyArgs::new().order_by(OrderBy::desc("amount"));
        let top = h
            .run("Order", Operation::FindFirst(args))
            .await
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(top.get("amount"), Some(&Value::Float(8.0)));

        let args = FindManyArgs::new().order_by(OrderBy::asc("amount")).take(-1);
        let last = h
            .run("Order", Operation::FindFirst(args))
            .await
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(last.get("amount"), Some(&Value::Float(8.0)));

        let found = h
            .run(
                "User",
                Operation::FindUnique(FindUniqueArgs::new(Filter::eq("email", "b@x.io"))),
            )
            .await
            .unwrap();
        assert!(found.into_record().is_some());

        let missing = h
            .run(
                "User",
                Operation::FindUnique(FindUniqueArgs::new(Filter::eq("email", "z@x.io"))),
            )
            .await
            .unwrap();
        assert_eq!(missing, Response::Optional(None));

        let err = h
            .run(
                "User",
                Operation::FindUniqueOrThrow(FindUniqueArgs::new(Filter::eq("email", "z@x.io"))),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        // findUnique needs a unique key
        let err = h
            .run(
                "User",
                Operation::FindUnique(FindUniqueArgs::new(Filter::eq("role", "member"))),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_update_operators_and_missing_rows() {
        let h = Harness::new();
        let user = h.user("a@x.io", &[]).await;
        let id = user.get("id").unwrap().clone();

        let data = Data::new()
            .set("age", 30)
            .write("tags", relq_proto::FieldWrite::Push(vec!["vip".into()]));
        let updated = h
            .run(
                "User",
                Operation::Update(UpdateArgs::new(Filter::eq("id", id.clone()), data)),
            )
            .await
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(updated.get("age"), Some(&Value::Int(30)));
        assert_eq!(
            updated.get("tags"),
            Some(&Value::StringList(vec!["vip".into()]))
        );

        let bump = Data::new().write("age", relq_proto::FieldWrite::Increment(Value::Int(2)));
        let updated = h
            .run("User", Operation::Update(UpdateArgs::new(Filter::eq("id", id), bump)))
            .await
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(updated.get("age"), Some(&Value::Int(32)));

        let err = h
            .run(
                "User",
                Operation::Update(UpdateArgs::new(
                    Filter::eq("id", "nobody"),
                    Data::new().set("age", 1),
                )),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_returns_graph_and_cascades() {
        let h = Harness::new();
        let user = h.user("a@x.io", &[1.0, 2.0]).await;
        let id = user.get("id").unwrap().clone();

        let args = DeleteArgs::new(Filter::eq("id", id)).with_selection(with_orders());
        let deleted = h
            .run("User", Operation::Delete(args))
            .await
            .unwrap()
            .into_record()
            .unwrap();
        assert_eq!(deleted.many("orders").unwrap().len(), 2);

        let orders = h
            .run("Order", Operation::Count(CountArgs::new()))
            .await
            .unwrap();
        assert_eq!(orders.count(), Some(0));

        let err = h
            .run("User", Operation::Delete(DeleteArgs::new(Filter::eq("email", "a@x.io"))))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let h = Harness::new();
        let args = UpsertArgs::new(
            Filter::eq("email", "a@x.io"),
            Data::new().set("email", "a@x.io").set("age", 1),
            Data::new().write("age", relq_proto::FieldWrite::Increment(Value::Int(1))),
        );
        for expected in [1, 2] {
            let record = h
                .run("User", Operation::Upsert(args.clone()))
                .await
                .unwrap()
                .into_record()
                .unwrap();
            assert_eq!(record.get("age"), Some(&Value::Int(expected)));
        }
        let users = h
            .run("User", Operation::Count(CountArgs::new()))
            .await
            .unwrap();
        assert_eq!(users.count(), Some(1));
    }

    #[tokio::test]
    async fn test_bulk_writes_report_counts() {
        let h = Harness::new();
        let data = vec![
            Data::new().set("email", "a@x.io"),
            Data::new().set("email", "b@x.io"),
            Data::new().set("email", "a@x.io"),
        ];
        let err = h
            .run("User", Operation::CreateMany(CreateManyArgs::new(data.clone())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

        let created = h
            .run(
                "User",
                Operation::CreateMany(CreateManyArgs::new(data).skip_duplicates()),
            )
            .await
            .unwrap();
        assert_eq!(created.count(), Some(2));

        let args = UpdateManyArgs::new(Data::new().set("role", "admin"))
            .with_filter(Filter::eq("email", "b@x.io"));
        let updated = h.run("User", Operation::UpdateMany(args)).await.unwrap();
        assert_eq!(updated.count(), Some(1));

        let deleted = h
            .run("User", Operation::DeleteMany(relq_proto::DeleteManyArgs::new()))
            .await
            .unwrap();
        assert_eq!(deleted.count(), Some(2));
    }

    #[tokio::test]
    async fn test_count_respects_pagination() {
        let h = Harness::new();
        h.user("a@x.io", &[1.0, 2.0, 3.0, 4.0]).await;
        let args = CountArgs {
            take: Some(2),
            skip: Some(1),
            ..CountArgs::new()
        };
        let count = h.run("Order", Operation::Count(args)).await.unwrap();
        assert_eq!(count.count(), Some(2));

        let args = CountArgs::new().with_filter(Filter::gt("amount", 2.5));
        let count = h.run("Order", Operation::Count(args)).await.unwrap();
        assert_eq!(count.count(), Some(2));
    }

    #[test]
    fn test_prepare_rejects_unknown_model() {
        let h = Harness::new();
        let executor = QueryExecutor::new(&h.registry, &h.store, &h.config);
        let err = executor
            .prepare(&Request::new("Invoice", Operation::FindMany(FindManyArgs::new())))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
