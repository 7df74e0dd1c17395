//! `data` payloads of `create`, `update` and `upsert`.

use relq_proto::{Data, FieldWrite, NullKind, RelationWrite};
use serde_json::Value as JsonValue;

use super::value::{field_value, is_tagged, scalar, tagged, Tagged};
use super::{check_keys, object, one_or_many, required, string, Decoder};
use crate::catalog::{FieldDescriptor, FieldKind, ScalarKind};
use crate::error::{Error, Result};

const UPDATE_OPERATORS: &[&str] = &["set", "increment", "decrement", "multiply", "divide", "push"];

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Create,
    Update,
}

impl Decoder<'_> {
    pub(super) fn create_data(&self, model: &str, value: &JsonValue, at: &str) -> Result<Data> {
        self.data(model, value, at, Mode::Create)
    }

    pub(super) fn update_data(&self, model: &str, value: &JsonValue, at: &str) -> Result<Data> {
        self.data(model, value, at, Mode::Update)
    }

    fn data(&self, model: &str, value: &JsonValue, at: &str, mode: Mode) -> Result<Data> {
        let mut data = Data::new();
        for (key, value) in object(value, at)? {
            let path = format!("{}.{}", at, key);
            let write = match self.registry.field_type(model, key)? {
                FieldKind::Scalar(field) if mode == Mode::Update => {
                    update_write(field, value, &path)?
                }
                FieldKind::Scalar(field) => set_write(field, value, &path)?,
                FieldKind::Relation(relation) => FieldWrite::Relation(self.relation_write(
                    &relation.target,
                    value,
                    &path,
                    mode,
                )?),
            };
            data = data.write(key.clone(), write);
        }
        Ok(data)
    }

    fn relation_write(
        &self,
        target: &str,
        value: &JsonValue,
        at: &str,
        mode: Mode,
    ) -> Result<RelationWrite> {
        let map = object(value, at)?;
        let allowed: &[&str] = match mode {
            Mode::Create => &["connect", "create", "createMany"],
            Mode::Update => &["connect", "create", "createMany", "disconnect"],
        };
        check_keys(map, allowed, at)?;

        let mut write = RelationWrite::default();
        if let Some(connect) = map.get("connect") {
            let path = format!("{}.connect", at);
            for item in one_or_many(connect) {
                write.connect.push(self.filter(target, item, &path)?);
            }
        }
        if let Some(create) = map.get("create") {
            let path = format!("{}.create", at);
            for item in one_or_many(create) {
                write.create.push(self.create_data(target, item, &path)?);
            }
        }
        if let Some(create_many) = map.get("createMany") {
            let path = format!("{}.createMany", at);
            let nested = object(create_many, &path)?;
            check_keys(nested, &["data"], &path)?;
            let path = format!("{}.data", path);
            for item in one_or_many(required(nested, "data")?) {
                write.create.push(self.create_data(target, item, &path)?);
            }
        }
        if let Some(disconnect) = map.get("disconnect") {
            let path = format!("{}.disconnect", at);
            match disconnect {
                JsonValue::Bool(flag) => write.disconnect_current = *flag,
                other => {
                    for item in one_or_many(other) {
                        write.disconnect.push(self.filter(target, item, &path)?);
                    }
                }
            }
        }
        Ok(write)
    }
}

/// A plain value or a tagged null.
fn set_write(field: &FieldDescriptor, value: &JsonValue, at: &str) -> Result<FieldWrite> {
    match tagged(value, at)? {
        Some(Tagged::Null(NullKind::Any)) => Err(Error::validation(format!(
            "`{}`: AnyNull can only be used in filters",
            at
        ))),
        Some(Tagged::Null(kind)) => Ok(FieldWrite::Null(kind)),
        _ => Ok(FieldWrite::Set(field_value(field, value, at)?)),
    }
}

/// A plain value, a tagged null or a single update operator.
fn update_write(field: &FieldDescriptor, value: &JsonValue, at: &str) -> Result<FieldWrite> {
    let map = match value {
        JsonValue::Object(map) if field.kind != ScalarKind::Json && !is_tagged(map) => map,
        other => return set_write(field, other, at),
    };
    check_keys(map, UPDATE_OPERATORS, at)?;
    let mut iter = map.iter();
    let (op, operand) = match (iter.next(), iter.next()) {
        (Some(entry), None) => entry,
        _ => {
            return Err(Error::validation(format!(
                "`{}` must use exactly one update operation",
                at
            )))
        }
    };
    let path = format!("{}.{}", at, op);
    Ok(match op.as_str() {
        "set" => set_write(field, operand, &path)?,
        "increment" => FieldWrite::Increment(scalar(field.kind, operand, &path)?),
        "decrement" => FieldWrite::Decrement(scalar(field.kind, operand, &path)?),
        "multiply" => FieldWrite::Multiply(scalar(field.kind, operand, &path)?),
        "divide" => FieldWrite::Divide(scalar(field.kind, operand, &path)?),
        _ => FieldWrite::Push(
            one_or_many(operand)
                .into_iter()
                .map(|item| string(item, &path).map(str::to_string))
                .collect::<Result<_>>()?,
        ),
    })
}
