//! JSON request decoding.
//!
//! Decodes Prisma-style argument objects (`{"where": …, "select": …,
//! "data": …}`) into typed [`Request`]s. Decoding is schema-aware: field
//! values are read according to the kind of the field they target, and every
//! unrecognized key is rejected.

mod data;
mod filter;
mod shape;
mod value;

use std::time::Duration;

use relq_proto::{
    Action, AggregateArgs, CountArgs, CreateArgs, CreateManyArgs, DeleteArgs, DeleteManyArgs,
    FindUniqueArgs, GroupByArgs, Operation, Request, TransactionOptions, UpdateArgs,
    UpdateManyArgs, UpsertArgs,
};
use serde_json::{Map, Value as JsonValue};

use crate::catalog::SchemaRegistry;
use crate::error::{Error, Result};

type Object = Map<String, JsonValue>;

const FIND_MANY_KEYS: &[&str] = &[
    "where", "select", "include", "omit", "orderBy", "cursor", "take", "skip", "distinct",
];
const FIND_UNIQUE_KEYS: &[&str] = &["where", "select", "include", "omit"];
const COUNT_KEYS: &[&str] = &["where", "orderBy", "cursor", "take", "skip"];
const AGGREGATE_KEYS: &[&str] = &[
    "where", "orderBy", "cursor", "take", "skip", "_count", "_avg", "_sum", "_min", "_max",
];
const GROUP_BY_KEYS: &[&str] = &[
    "by", "where", "having", "orderBy", "take", "skip", "_count", "_avg", "_sum", "_min", "_max",
];

/// Decode the JSON arguments of `action` on `model`.
pub fn decode(
    registry: &SchemaRegistry,
    model: &str,
    action: Action,
    args: JsonValue,
) -> Result<Request> {
    registry.describe(model)?;
    let empty = Object::new();
    let args = match &args {
        JsonValue::Null => &empty,
        other => object(other, "arguments")?,
    };
    let decoder = Decoder { registry };

    let operation = match action {
        Action::FindMany | Action::FindFirst | Action::FindFirstOrThrow => {
            check_keys(args, FIND_MANY_KEYS, action.as_str())?;
            let find = decoder.find_many(model, args)?;
            match action {
                Action::FindMany => Operation::FindMany(find),
                Action::FindFirst => Operation::FindFirst(find),
                _ => Operation::FindFirstOrThrow(find),
            }
        }
        Action::FindUnique | Action::FindUniqueOrThrow => {
            check_keys(args, FIND_UNIQUE_KEYS, action.as_str())?;
            let unique = FindUniqueArgs::new(decoder.required_where(model, args)?)
                .with_selection(decoder.selection(model, args)?);
            if action == Action::FindUnique {
                Operation::FindUnique(unique)
            } else {
                Operation::FindUniqueOrThrow(unique)
            }
        }
        Action::Create => {
            check_keys(args, &["data", "select", "include", "omit"], "create")?;
            let data = decoder.create_data(model, required(args, "data")?, "data")?;
            Operation::Create(CreateArgs::new(data).with_selection(decoder.selection(model, args)?))
        }
        Action::CreateMany => {
            check_keys(args, &["data", "skipDuplicates"], "createMany")?;
            let data = one_or_many(required(args, "data")?)
                .into_iter()
                .map(|item| decoder.create_data(model, item, "data"))
                .collect::<Result<Vec<_>>>()?;
            let mut many = CreateManyArgs::new(data);
            if let Some(skip) = args.get("skipDuplicates") {
                many.skip_duplicates = boolean(skip, "skipDuplicates")?;
            }
            Operation::CreateMany(many)
        }
        Action::Update => {
            check_keys(args, &["where", "data", "select", "include", "omit"], "update")?;
            let filter = decoder.required_where(model, args)?;
            let data = decoder.update_data(model, required(args, "data")?, "data")?;
            Operation::Update(
                UpdateArgs::new(filter, data).with_selection(decoder.selection(model, args)?),
            )
        }
        Action::UpdateMany => {
            check_keys(args, &["where", "data"], "updateMany")?;
            let data = decoder.update_data(model, required(args, "data")?, "data")?;
            Operation::UpdateMany(UpdateManyArgs {
                filter: decoder.optional_where(model, args)?,
                data,
            })
        }
        Action::Delete => {
            check_keys(args, &["where", "select", "include", "omit"], "delete")?;
            let filter = decoder.required_where(model, args)?;
            Operation::Delete(DeleteArgs::new(filter).with_selection(decoder.selection(model, args)?))
        }
        Action::DeleteMany => {
            check_keys(args, &["where"], "deleteMany")?;
            Operation::DeleteMany(DeleteManyArgs {
                filter: decoder.optional_where(model, args)?,
            })
        }
        Action::Upsert => {
            check_keys(
                args,
                &["where", "create", "update", "select", "include", "omit"],
                "upsert",
            )?;
            let filter = decoder.required_where(model, args)?;
            let create = decoder.create_data(model, required(args, "create")?, "create")?;
            let update = decoder.update_data(model, required(args, "update")?, "update")?;
            Operation::Upsert(
                UpsertArgs::new(filter, create, update)
                    .with_selection(decoder.selection(model, args)?),
            )
        }
        Action::Aggregate => {
            check_keys(args, AGGREGATE_KEYS, "aggregate")?;
            let find = decoder.window(model, args)?;
            Operation::Aggregate(AggregateArgs {
                filter: find.filter,
                order_by: find.order_by,
                cursor: find.cursor,
                take: find.take,
                skip: find.skip,
                aggregates: decoder.aggregates(model, args)?,
            })
        }
        Action::GroupBy => {
            check_keys(args, GROUP_BY_KEYS, "groupBy")?;
            Operation::GroupBy(decoder.group_by(model, args)?)
        }
        Action::Count => {
            check_keys(args, COUNT_KEYS, "count")?;
            let find = decoder.window(model, args)?;
            Operation::Count(CountArgs {
                filter: find.filter,
                order_by: find.order_by,
                cursor: find.cursor,
                cursor_inclusive: false,
                take: find.take,
                skip: find.skip,
            })
        }
    };
    Ok(Request::new(model, operation))
}

/// Decode `{maxWait, timeout, isolationLevel}`. Durations are milliseconds.
pub fn decode_transaction_options(value: &JsonValue) -> Result<TransactionOptions> {
    let map = object(value, "transaction options")?;
    check_keys(map, &["maxWait", "timeout", "isolationLevel"], "transaction options")?;
    let mut options = TransactionOptions::new();
    if let Some(ms) = map.get("maxWait") {
        options.max_wait = Some(Duration::from_millis(count(ms, "maxWait")?));
    }
    if let Some(ms) = map.get("timeout") {
        options.timeout = Some(Duration::from_millis(count(ms, "timeout")?));
    }
    if let Some(level) = map.get("isolationLevel") {
        options.isolation_level = Some(string(level, "isolationLevel")?.parse()?);
    }
    Ok(options)
}

/// Schema-aware decoding state.
struct Decoder<'r> {
    registry: &'r SchemaRegistry,
}

impl Decoder<'_> {
    fn group_by(&self, model: &str, args: &Object) -> Result<GroupByArgs> {
        let by = match required(args, "by")? {
            JsonValue::String(field) => vec![field.clone()],
            other => string_list(other, "by")?,
        };
        Ok(GroupByArgs {
            by,
            filter: self.optional_where(model, args)?,
            having: args
                .get("having")
                .map(|h| self.having(model, h, "having"))
                .transpose()?,
            order_by: args
                .get("orderBy")
                .map(|o| self.group_order(model, o))
                .transpose()?
                .unwrap_or_default(),
            take: args.get("take").map(|t| integer(t, "take")).transpose()?,
            skip: args.get("skip").map(|s| count(s, "skip")).transpose()?,
            aggregates: self.aggregates(model, args)?,
        })
    }
}

fn object<'v>(value: &'v JsonValue, at: &str) -> Result<&'v Object> {
    value
        .as_object()
        .ok_or_else(|| Error::validation(format!("`{}` must be an object", at)))
}

fn check_keys(map: &Object, allowed: &[&str], at: &str) -> Result<()> {
    match map.keys().find(|key| !allowed.contains(&key.as_str())) {
        Some(key) => Err(Error::validation(format!(
            "unknown argument `{}` in {} (expected one of: {})",
            key,
            at,
            allowed.join(", ")
        ))),
        None => Ok(()),
    }
}

fn required<'v>(map: &'v Object, key: &str) -> Result<&'v JsonValue> {
    map.get(key)
        .ok_or_else(|| Error::validation(format!("missing required argument `{}`", key)))
}

/// An array's items, or the value itself.
fn one_or_many(value: &JsonValue) -> Vec<&JsonValue> {
    match value {
        JsonValue::Array(items) => items.iter().collect(),
        other => vec![other],
    }
}

fn boolean(value: &JsonValue, at: &str) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::validation(format!("`{}` must be a boolean", at)))
}

fn string<'v>(value: &'v JsonValue, at: &str) -> Result<&'v str> {
    value
        .as_str()
        .ok_or_else(|| Error::validation(format!("`{}` must be a string", at)))
}

fn string_list(value: &JsonValue, at: &str) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| Error::validation(format!("`{}` must be a list of strings", at)))?;
    items
        .iter()
        .map(|item| string(item, at).map(str::to_string))
        .collect()
}

fn integer(value: &JsonValue, at: &str) -> Result<i64> {
    value
        .as_i64()
        .ok_or_else(|| Error::validation(format!("`{}` must be an integer", at)))
}

fn count(value: &JsonValue, at: &str) -> Result<u64> {
    value
        .as_u64()
        .ok_or_else(|| Error::validation(format!("`{}` must be a non-negative integer", at)))
}
