//! Tagged request and response envelopes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::aggregate::{AggregateArgs, AggregateResult, GroupByArgs, GroupRow};
use crate::error::Error;
use crate::mutation::{
    CreateArgs, CreateManyArgs, DeleteArgs, DeleteManyArgs, UpdateArgs, UpdateManyArgs,
    UpsertArgs,
};
use crate::query::{CountArgs, FindManyArgs, FindUniqueArgs};
use crate::result::{BatchPayload, Record};

/// Name of a model operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    FindMany,
    FindFirst,
    FindFirstOrThrow,
    FindUnique,
    FindUniqueOrThrow,
    Create,
    CreateMany,
    Update,
    UpdateMany,
    Delete,
    DeleteMany,
    Upsert,
    Aggregate,
    GroupBy,
    Count,
}

impl Action {
    pub const ALL: [Action; 15] = [
        Action::FindMany,
        Action::FindFirst,
        Action::FindFirstOrThrow,
        Action::FindUnique,
        Action::FindUniqueOrThrow,
        Action::Create,
        Action::CreateMany,
        Action::Update,
        Action::UpdateMany,
        Action::Delete,
        Action::DeleteMany,
        Action::Upsert,
        Action::Aggregate,
        Action::GroupBy,
        Action::Count,
    ];

    /// Name as used by callers (`findMany`, `groupBy`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::FindMany => "findMany",
            Action::FindFirst => "findFirst",
            Action::FindFirstOrThrow => "findFirstOrThrow",
            Action::FindUnique => "findUnique",
            Action::FindUniqueOrThrow => "findUniqueOrThrow",
            Action::Create => "create",
            Action::CreateMany => "createMany",
            Action::Update => "update",
            Action::UpdateMany => "updateMany",
            Action::Delete => "delete",
            Action::DeleteMany => "deleteMany",
            Action::Upsert => "upsert",
            Action::Aggregate => "aggregate",
            Action::GroupBy => "groupBy",
            Action::Count => "count",
        }
    }

    /// Check if the action writes.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Action::Create
                | Action::CreateMany
                | Action::Update
                | Action::UpdateMany
                | Action::Delete
                | Action::DeleteMany
                | Action::Upsert
        )
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| Error::UnknownAction(s.to_string()))
    }
}

/// An operation with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    FindMany(FindManyArgs),
    FindFirst(FindManyArgs),
    FindFirstOrThrow(FindManyArgs),
    FindUnique(FindUniqueArgs),
    FindUniqueOrThrow(FindUniqueArgs),
    Create(CreateArgs),
    CreateMany(CreateManyArgs),
    Update(UpdateArgs),
    UpdateMany(UpdateManyArgs),
    Delete(DeleteArgs),
    DeleteMany(DeleteManyArgs),
    Upsert(UpsertArgs),
    Aggregate(AggregateArgs),
    GroupBy(GroupByArgs),
    Count(CountArgs),
}

impl Operation {
    /// The operation's action name.
    pub fn action(&self) -> Action {
        match self {
            Operation::FindMany(_) => Action::FindMany,
            Operation::FindFirst(_) => Action::FindFirst,
            Operation::FindFirstOrThrow(_) => Action::FindFirstOrThrow,
            Operation::FindUnique(_) => Action::FindUnique,
            Operation::FindUniqueOrThrow(_) => Action::FindUniqueOrThrow,
            Operation::Create(_) => Action::Create,
            Operation::CreateMany(_) => Action::CreateMany,
            Operation::Update(_) => Action::Update,
            Operation::UpdateMany(_) => Action::UpdateMany,
            Operation::Delete(_) => Action::Delete,
            Operation::DeleteMany(_) => Action::DeleteMany,
            Operation::Upsert(_) => Action::Upsert,
            Operation::Aggregate(_) => Action::Aggregate,
            Operation::GroupBy(_) => Action::GroupBy,
            Operation::Count(_) => Action::Count,
        }
    }
}

/// An operation on a named model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub model: String,
    pub operation: Operation,
}

impl Request {
    pub fn new(model: impl Into<String>, operation: Operation) -> Self {
        Self {
            model: model.into(),
            operation,
        }
    }

    pub fn action(&self) -> Action {
        self.operation.action()
    }
}

/// The result of a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// `findMany`.
    Many(Vec<Record>),
    /// `findFirst`, `findUnique`.
    Optional(Option<Record>),
    /// Single-record writes and the throwing reads.
    Record(Record),
    /// `createMany`, `updateMany`, `deleteMany`.
    Batch(BatchPayload),
    Aggregate(AggregateResult),
    Groups(Vec<GroupRow>),
    Count(u64),
}

impl Response {
    /// Records of a `Many` response.
    pub fn into_many(self) -> Option<Vec<Record>> {
        match self {
            Response::Many(v) => Some(v),
            _ => None,
        }
    }

    /// The record of a `Record` or `Optional` response.
    pub fn into_record(self) -> Option<Record> {
        match self {
            Response::Record(r) => Some(r),
            Response::Optional(r) => r,
            _ => None,
        }
    }

    /// Affected count of a `Batch` response, or the value of a `Count` response.
    pub fn count(&self) -> Option<u64> {
        match self {
            Response::Batch(b) => Some(b.count),
            Response::Count(n) => Some(*n),
            _ => None,
        }
    }
}
