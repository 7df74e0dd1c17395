//! Write payloads.
//!
//! [`MutationPlanner`] checks `data` payloads against the registry and turns
//! them into create and update plans, including nested relation writes.
//! [`NestedWriter`] runs those plans against a store: writes on relations
//! whose key lives on this model resolve before the row is written, writes
//! on relations whose key lives on the target run after.

use std::collections::HashSet;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use relq_proto::{Data, FieldWrite, NullKind, RelationWrite, Value};
use tracing::debug;

use super::filter::PredicateCompiler;
use super::predicate::PredicateNode;
use crate::catalog::{
    Cardinality, FieldDescriptor, FieldKind, ModelDescriptor, RelationDescriptor, RelationLink,
    ScalarKind, SchemaRegistry,
};
use crate::error::{Error, Result};
use crate::storage::{AssignOp, Assignment, Row, Scope, Storage, StoreQuery};

/// A validated create payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatePlan {
    pub model: String,
    /// Explicit scalar values, coerced to their field kinds.
    pub values: Vec<(String, Value)>,
    pub owned: Vec<OwnedWrite>,
    pub inverse: Vec<InverseWrite>,
}

impl CreatePlan {
    /// Check if the plan writes nothing but its own row.
    pub fn is_flat(&self) -> bool {
        self.owned.is_empty() && self.inverse.is_empty()
    }
}

/// A validated update payload.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePlan {
    pub model: String,
    pub assignments: Vec<Assignment>,
    pub owned: Vec<OwnedWrite>,
    pub inverse: Vec<InverseWrite>,
}

impl UpdatePlan {
    pub fn is_flat(&self) -> bool {
        self.owned.is_empty() && self.inverse.is_empty()
    }
}

/// A write on a relation whose key is stored on the written row.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedWrite {
    Connect {
        relation: String,
        field: String,
        references: String,
        target: String,
        predicate: PredicateNode,
    },
    Create {
        relation: String,
        field: String,
        references: String,
        plan: Box<CreatePlan>,
    },
    Disconnect {
        relation: String,
        field: String,
    },
}

impl OwnedWrite {
    fn field(&self) -> &str {
        match self {
            OwnedWrite::Connect { field, .. }
            | OwnedWrite::Create { field, .. }
            | OwnedWrite::Disconnect { field, .. } => field,
        }
    }
}

/// A write on a relation whose key is stored on the related rows.
#[derive(Debug, Clone, PartialEq)]
pub enum InverseWrite {
    Connect {
        relation: String,
        target: String,
        /// Key field on the target.
        foreign: String,
        /// Referenced field on the written row.
        local: String,
        predicate: PredicateNode,
    },
    Create {
        relation: String,
        foreign: String,
        local: String,
        plan: CreatePlan,
    },
    /// Unlink the matching related record, or every linked one when `predicate` is `None`.
    Disconnect {
        relation: String,
        target: String,
        foreign: String,
        local: String,
        predicate: Option<PredicateNode>,
    },
}

/// Validates write payloads against the registry.
pub struct MutationPlanner<'a> {
    registry: &'a SchemaRegistry,
    compiler: PredicateCompiler<'a>,
}

impl<'a> MutationPlanner<'a> {
    pub fn new(registry: &'a SchemaRegistry) -> Self {
        Self {
            registry,
            compiler: PredicateCompiler::new(registry),
        }
    }

    /// Plan a create. `forced` names a key field set by the parent of a nested create.
    pub fn create(&self, model: &str, data: &Data, forced: Option<&str>) -> Result<CreatePlan> {
        let descriptor = self.registry.describe(model)?;
        let mut plan = CreatePlan {
            model: model.to_string(),
            values: Vec::new(),
            owned: Vec::new(),
            inverse: Vec::new(),
        };

        for (name, write) in data.entries() {
            match lookup(descriptor, name)? {
                FieldKind::Scalar(field) => {
                    if forced == Some(name) {
                        return Err(Error::validation(format!(
                            "`{}.{}` is set by the enclosing relation write",
                            model, name
                        )));
                    }
                    let value = match write {
                        FieldWrite::Set(v) => set_value(model, field, v.clone())?,
                        FieldWrite::Null(kind) => null_value(model, field, *kind)?,
                        _ => {
                            return Err(Error::validation(format!(
                                "`{}.{}`: update operators are not allowed in create",
                                model, name
                            )))
                        }
                    };
                    plan.values.push((name.to_string(), value));
                }
                FieldKind::Relation(relation) => {
                    let write = relation_write(model, name, write)?;
                    if !write.disconnect.is_empty() || write.disconnect_current {
                        return Err(Error::validation(format!(
                            "`{}.{}`: disconnect is not allowed in create",
                            model, name
                        )));
                    }
                    if forced.is_some() && relation.owned_field() == forced {
                        return Err(Error::validation(format!(
                            "`{}.{}` is linked by the enclosing relation write",
                            model, name
                        )));
                    }
                    self.relation_writes(
                        descriptor,
                        relation,
                        write,
                        &mut plan.owned,
                        &mut plan.inverse,
                    )?;
                }
            }
        }

        // owned relation keys must not also be given as scalars
        for owned in &plan.owned {
            if plan.values.iter().any(|(f, _)| f == owned.field()) {
                return Err(Error::validation(format!(
                    "`{}.{}` is written both directly and through a relation",
                    model,
                    owned.field()
                )));
            }
        }

        let provided: HashSet<&str> = plan
            .values
            .iter()
            .map(|(f, _)| f.as_str())
            .chain(plan.owned.iter().map(OwnedWrite::field))
            .chain(forced)
            .collect();
        let missing: Vec<&str> = descriptor
            .fields
            .iter()
            .filter(|f| f.is_required() && !provided.contains(f.name.as_str()))
            .map(|f| f.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::validation(format!(
                "missing required field(s) on {}: {}",
                model,
                missing.join(", ")
            )));
        }
        Ok(plan)
    }

    /// Plan a create that may not contain relation writes.
    pub fn create_flat(&self, model: &str, data: &Data) -> Result<CreatePlan> {
        let plan = self.create(model, data, None)?;
        if !plan.is_flat() {
            return Err(Error::validation(format!(
                "createMany on {} takes scalar fields only",
                model
            )));
        }
        Ok(plan)
    }

    /// Plan an update.
    pub fn update(&self, model: &str, data: &Data) -> Result<UpdatePlan> {
        let descriptor = self.registry.describe(model)?;
        let mut plan = UpdatePlan {
            model: model.to_string(),
            assignments: Vec::new(),
            owned: Vec::new(),
            inverse: Vec::new(),
        };

        for (name, write) in data.entries() {
            match lookup(descriptor, name)? {
                FieldKind::Scalar(field) => {
                    let op = assign_op(model, field, write)?;
                    plan.assignments.push(Assignment {
                        field: name.to_string(),
                        op,
                    });
                }
                FieldKind::Relation(relation) => {
                    let write = relation_write(model, name, write)?;
                    self.relation_writes(
                        descriptor,
                        relation,
                        write,
                        &mut plan.owned,
                        &mut plan.inverse,
                    )?;
                }
            }
        }

        for owned in &plan.owned {
            if plan.assignments.iter().any(|a| a.field == owned.field()) {
                return Err(Error::validation(format!(
                    "`{}.{}` is written both directly and through a relation",
                    model,
                    owned.field()
                )));
            }
        }

        for field in descriptor.fields.iter().filter(|f| f.updated_at) {
            if !plan.assignments.iter().any(|a| a.field == field.name) {
                plan.assignments
                    .push(Assignment::set(field.name.clone(), Value::DateTime(Utc::now())));
            }
        }
        Ok(plan)
    }

    /// Plan an update that may not contain relation writes.
    pub fn update_flat(&self, model: &str, data: &Data) -> Result<UpdatePlan> {
        let plan = self.update(model, data)?;
        if !plan.is_flat() {
            return Err(Error::validation(format!(
                "updateMany on {} takes scalar fields only",
                model
            )));
        }
        Ok(plan)
    }

    fn relation_writes(
        &self,
        descriptor: &ModelDescriptor,
        relation: &RelationDescriptor,
        write: &RelationWrite,
        owned: &mut Vec<OwnedWrite>,
        inverse: &mut Vec<InverseWrite>,
    ) -> Result<()> {
        let model = descriptor.name.as_str();
        let resolved = self.registry.relation(model, &relation.name)?;
        let target = resolved.target.name.as_str();
        let to_one = relation.cardinality.is_one();

        let links = write.connect.len() + write.create.len();
        if to_one && links > 1 {
            return Err(Error::validation(format!(
                "to-one relation `{}.{}` takes a single connect or create",
                model, relation.name
            )));
        }
        if to_one && !write.disconnect.is_empty() {
            return Err(Error::validation(format!(
                "to-one relation `{}.{}` is disconnected with `disconnect: true`",
                model, relation.name
            )));
        }
        if !to_one && write.disconnect_current {
            return Err(Error::validation(format!(
                "to-many relation `{}.{}` needs the records to disconnect",
                model, relation.name
            )));
        }
        if links > 0 && write.disconnect_current {
            return Err(Error::validation(format!(
                "relation `{}.{}` cannot be linked and disconnected at once",
                model, relation.name
            )));
        }

        match &relation.link {
            RelationLink::Owned { field, references } => {
                if write.disconnect_current {
                    if relation.cardinality != Cardinality::OneOptional {
                        return Err(Error::validation(format!(
                            "required relation `{}.{}` cannot be disconnected",
                            model, relation.name
                        )));
                    }
                    owned.push(OwnedWrite::Disconnect {
                        relation: relation.name.clone(),
                        field: field.clone(),
                    });
                }
                for filter in &write.connect {
                    owned.push(OwnedWrite::Connect {
                        relation: relation.name.clone(),
                        field: field.clone(),
                        references: references.clone(),
                        target: target.to_string(),
                        predicate: self.compiler.compile_unique(target, filter)?,
                    });
                }
                for data in &write.create {
                    owned.push(OwnedWrite::Create {
                        relation: relation.name.clone(),
                        field: field.clone(),
                        references: references.clone(),
                        plan: Box::new(self.create(target, data, None)?),
                    });
                }
            }
            RelationLink::Inverse => {
                let local = resolved.join.local.clone();
                let foreign = resolved.join.foreign.clone();
                let unlinkable = write.disconnect_current || !write.disconnect.is_empty();
                if unlinkable {
                    let nullable = resolved.target.field(&foreign).is_some_and(|f| f.nullable);
                    if !nullable {
                        return Err(Error::validation(format!(
                            "relation `{}.{}` cannot be disconnected: `{}.{}` is required",
                            model, relation.name, target, foreign
                        )));
                    }
                }
                if write.disconnect_current {
                    inverse.push(InverseWrite::Disconnect {
                        relation: relation.name.clone(),
                        target: target.to_string(),
                        foreign: foreign.clone(),
                        local: local.clone(),
                        predicate: None,
                    });
                }
                for filter in &write.disconnect {
                    inverse.push(InverseWrite::Disconnect {
                        relation: relation.name.clone(),
                        target: target.to_string(),
                        foreign: foreign.clone(),
                        local: local.clone(),
                        predicate: Some(self.compiler.compile_unique(target, filter)?),
                    });
                }
                for filter in &write.connect {
                    inverse.push(InverseWrite::Connect {
                        relation: relation.name.clone(),
                        target: target.to_string(),
                        foreign: foreign.clone(),
                        local: local.clone(),
                        predicate: self.compiler.compile_unique(target, filter)?,
                    });
                }
                for data in &write.create {
                    inverse.push(InverseWrite::Create {
                        relation: relation.name.clone(),
                        foreign: foreign.clone(),
                        local: local.clone(),
                        plan: self.create(target, data, Some(&foreign))?,
                    });
                }
            }
        }
        Ok(())
    }
}

fn lookup<'m>(descriptor: &'m ModelDescriptor, name: &str) -> Result<FieldKind<'m>> {
    descriptor.kind_of(name).ok_or_else(|| {
        Error::validation(format!(
            "unknown field `{}` in data for {}",
            name, descriptor.name
        ))
    })
}

fn relation_write<'w>(model: &str, name: &str, write: &'w FieldWrite) -> Result<&'w RelationWrite> {
    match write {
        FieldWrite::Relation(w) => Ok(w),
        _ => Err(Error::validation(format!(
            "`{}.{}` is a relation; write it with connect, create or disconnect",
            model, name
        ))),
    }
}

/// Check and coerce a value written to a field.
fn set_value(model: &str, field: &FieldDescriptor, value: Value) -> Result<Value> {
    if value.is_null() {
        if field.kind == ScalarKind::Json {
            return Err(Error::validation(format!(
                "`{}.{}`: a plain null is ambiguous on a Json field; write DbNull or JsonNull",
                model, field.name
            )));
        }
        return null_value(model, field, NullKind::Db);
    }
    if !field.kind.accepts(&value) {
        return Err(Error::validation(format!(
            "`{}.{}` expects {}, got {}",
            model,
            field.name,
            field.kind.as_str(),
            value.type_name()
        )));
    }
    Ok(field.kind.coerce(value))
}

fn null_value(model: &str, field: &FieldDescriptor, kind: NullKind) -> Result<Value> {
    match kind {
        NullKind::Db if field.nullable => Ok(Value::Null),
        NullKind::Db => Err(Error::validation(format!(
            "`{}.{}` is required and cannot be set to null",
            model, field.name
        ))),
        NullKind::Json if field.kind == ScalarKind::Json => Ok(Value::json_null()),
        NullKind::Json => Err(Error::validation(format!(
            "`{}.{}`: JsonNull is only valid on Json fields",
            model, field.name
        ))),
        NullKind::Any => Err(Error::validation(format!(
            "`{}.{}`: AnyNull is only valid in filters",
            model, field.name
        ))),
    }
}

fn assign_op(model: &str, field: &FieldDescriptor, write: &FieldWrite) -> Result<AssignOp> {
    let numeric = |operand: &Value, divide: bool| -> Result<Value> {
        let fits = match field.kind {
            ScalarKind::Int => matches!(operand, Value::Int(_)),
            ScalarKind::Float => matches!(operand, Value::Int(_) | Value::Float(_)),
            _ => false,
        };
        if !fits {
            return Err(Error::validation(format!(
                "`{}.{}`: arithmetic needs a numeric field and operand, got {} on {}",
                model,
                field.name,
                operand.type_name(),
                field.kind.as_str()
            )));
        }
        if divide && operand.as_f64() == Some(0.0) {
            return Err(Error::validation(format!(
                "`{}.{}`: division by zero",
                model, field.name
            )));
        }
        Ok(field.kind.coerce(operand.clone()))
    };

    Ok(match write {
        FieldWrite::Set(v) => AssignOp::Set(set_value(model, field, v.clone())?),
        FieldWrite::Null(kind) => AssignOp::Set(null_value(model, field, *kind)?),
        FieldWrite::Increment(v) => AssignOp::Increment(numeric(v, false)?),
        FieldWrite::Decrement(v) => AssignOp::Decrement(numeric(v, false)?),
        FieldWrite::Multiply(v) => AssignOp::Multiply(numeric(v, false)?),
        FieldWrite::Divide(v) => AssignOp::Divide(numeric(v, true)?),
        FieldWrite::Push(items) if field.kind == ScalarKind::StringList => {
            AssignOp::Push(items.clone())
        }
        FieldWrite::Push(_) => {
            return Err(Error::validation(format!(
                "`{}.{}`: push is only valid on string lists",
                model, field.name
            )))
        }
        FieldWrite::Relation(_) => {
            return Err(Error::validation(format!(
                "`{}.{}` is a scalar field",
                model, field.name
            )))
        }
    })
}

/// Equality on every primary key field of a row.
pub fn identity(descriptor: &ModelDescriptor, row: &Row) -> PredicateNode {
    PredicateNode::all(
        descriptor
            .id_fields()
            .iter()
            .map(|f| PredicateNode::eq(f.clone(), row.value(f).clone()))
            .collect(),
    )
}

/// Complete row for a flat create: explicit values, the forced key, then defaults.
pub fn complete_row(
    descriptor: &ModelDescriptor,
    plan: &CreatePlan,
    filled: &[(String, Value)],
) -> Row {
    let mut row = Row::new();
    for field in &descriptor.fields {
        let explicit = plan
            .values
            .iter()
            .chain(filled)
            .find(|(name, _)| *name == field.name)
            .map(|(_, v)| v.clone());
        let value = match explicit {
            Some(v) => v,
            None => match &field.default {
                Some(default) => default.generate(),
                None if field.updated_at => Value::DateTime(Utc::now()),
                None => Value::Null,
            },
        };
        row.set(field.name.clone(), value);
    }
    row
}

/// Runs create and update plans, including nested writes, in one scope.
pub struct NestedWriter<'a> {
    registry: &'a SchemaRegistry,
    storage: &'a dyn Storage,
    scope: Scope,
}

impl<'a> NestedWriter<'a> {
    pub fn new(registry: &'a SchemaRegistry, storage: &'a dyn Storage, scope: Scope) -> Self {
        Self {
            registry,
            storage,
            scope,
        }
    }

    /// Create a row and its nested writes. Returns the inserted row.
    pub fn create<'p>(
        &'p self,
        plan: &'p CreatePlan,
        forced: Option<(String, Value)>,
    ) -> BoxFuture<'p, Result<Row>> {
        async move {
            let descriptor = self.registry.describe(&plan.model)?;
            let mut filled: Vec<(String, Value)> = forced.into_iter().collect();
            for write in &plan.owned {
                if let Some(entry) = self.resolve_owned(write).await? {
                    filled.push(entry);
                }
            }

            let row = complete_row(descriptor, plan, &filled);
            let inserted = self
                .storage
                .execute(
                    self.scope,
                    StoreQuery::Insert {
                        model: plan.model.clone(),
                        rows: vec![row],
                        skip_duplicates: false,
                    },
                )
                .await?
                .into_rows()
                .into_iter()
                .next()
                .ok_or_else(|| {
                    Error::InternalConsistency(format!("insert into {} returned no row", plan.model))
                })?;

            for write in &plan.inverse {
                self.run_inverse(write, &inserted).await?;
            }
            debug!(model = %plan.model, nested = plan.owned.len() + plan.inverse.len(), "record created");
            Ok(inserted)
        }
        .boxed()
    }

    /// Apply an update plan to one existing row. Returns the updated row.
    pub async fn update(&self, plan: &UpdatePlan, current: &Row) -> Result<Row> {
        let descriptor = self.registry.describe(&plan.model)?;
        let mut assignments = plan.assignments.clone();
        for write in &plan.owned {
            if let Some((field, value)) = self.resolve_owned(write).await? {
                assignments.push(Assignment::set(field, value));
            }
        }

        let updated = if assignments.is_empty() {
            current.clone()
        } else {
            self.storage
                .execute(
                    self.scope,
                    StoreQuery::Update {
                        model: plan.model.clone(),
                        predicate: Some(identity(descriptor, current)),
                        assignments,
                    },
                )
                .await?
                .into_rows()
                .into_iter()
                .next()
                .ok_or_else(|| Error::not_found(&plan.model, "record disappeared during update"))?
        };

        for write in &plan.inverse {
            self.run_inverse(write, &updated).await?;
        }
        Ok(updated)
    }

    /// Resolve an owned-side write into the key assignment it implies.
    async fn resolve_owned(&self, write: &OwnedWrite) -> Result<Option<(String, Value)>> {
        match write {
            OwnedWrite::Connect {
                relation,
                field,
                references,
                target,
                predicate,
            } => {
                let row = self.find_one(target, predicate.clone()).await?.ok_or_else(|| {
                    Error::not_found(
                        target,
                        format!("no record to connect through relation `{}`", relation),
                    )
                })?;
                Ok(Some((field.clone(), row.value(references).clone())))
            }
            OwnedWrite::Create {
                field,
                references,
                plan,
                ..
            } => {
                let row = self.create(plan, None).await?;
                Ok(Some((field.clone(), row.value(references).clone())))
            }
            OwnedWrite::Disconnect { field, .. } => Ok(Some((field.clone(), Value::Null))),
        }
    }

    async fn run_inverse(&self, write: &InverseWrite, row: &Row) -> Result<()> {
        match write {
            InverseWrite::Connect {
                relation,
                target,
                foreign,
                local,
                predicate,
            } => {
                let linked = self
                    .assign(target, predicate.clone(), foreign, row.value(local).clone())
                    .await?;
                if linked == 0 {
                    return Err(Error::not_found(
                        target,
                        format!("no record to connect through relation `{}`", relation),
                    ));
                }
            }
            InverseWrite::Create {
                foreign,
                local,
                plan,
                ..
            } => {
                self.create(plan, Some((foreign.clone(), row.value(local).clone())))
                    .await?;
            }
            InverseWrite::Disconnect {
                target,
                foreign,
                local,
                predicate,
                ..
            } => {
                let linked = PredicateNode::eq(foreign.clone(), row.value(local).clone());
                let matching = match predicate {
                    Some(p) => PredicateNode::all(vec![p.clone(), linked]),
                    None => linked,
                };
                self.assign(target, matching, foreign, Value::Null).await?;
            }
        }
        Ok(())
    }

    async fn assign(
        &self,
        model: &str,
        predicate: PredicateNode,
        field: &str,
        value: Value,
    ) -> Result<u64> {
        let out = self
            .storage
            .execute(
                self.scope,
                StoreQuery::Update {
                    model: model.to_string(),
                    predicate: Some(predicate),
                    assignments: vec![Assignment::set(field, value)],
                },
            )
            .await?;
        Ok(out.count())
    }

    async fn find_one(&self, model: &str, predicate: PredicateNode) -> Result<Option<Row>> {
        let query = StoreQuery::Select {
            model: model.to_string(),
            predicate: Some(predicate),
            order: Vec::new(),
            offset: 0,
            limit: Some(1),
        };
        Ok(self
            .storage
            .execute(self.scope, query)
            .await?
            .into_rows()
            .into_iter()
            .next())
    }
}
