//! Write payloads and mutation arguments.

use serde::{Deserialize, Serialize};

use crate::filter::{Filter, NullKind};
use crate::selection::SelectionSpec;
use crate::value::Value;

/// Nested writes on a relation inside a `create` or `update` payload.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RelationWrite {
    /// Records to create and link.
    #[serde(default)]
    pub create: Vec<Data>,
    /// Existing records to link, each named by a unique filter.
    #[serde(default)]
    pub connect: Vec<Filter>,
    /// Linked records to unlink, each named by a unique filter (to-many).
    #[serde(default)]
    pub disconnect: Vec<Filter>,
    /// Unlink the current related record (to-one).
    #[serde(default)]
    pub disconnect_current: bool,
}

impl RelationWrite {
    /// Link an existing record.
    pub fn connect(filter: Filter) -> Self {
        Self {
            connect: vec![filter],
            ..Default::default()
        }
    }

    /// Create a record and link it.
    pub fn create(data: Data) -> Self {
        Self {
            create: vec![data],
            ..Default::default()
        }
    }

    /// Create several records and link them.
    pub fn create_many(data: Vec<Data>) -> Self {
        Self {
            create: data,
            ..Default::default()
        }
    }

    /// Unlink the current related record.
    pub fn disconnect() -> Self {
        Self {
            disconnect_current: true,
            ..Default::default()
        }
    }

    /// Unlink a specific related record.
    pub fn disconnect_where(filter: Filter) -> Self {
        Self {
            disconnect: vec![filter],
            ..Default::default()
        }
    }

    /// Check if no nested write is requested.
    pub fn is_empty(&self) -> bool {
        self.create.is_empty()
            && self.connect.is_empty()
            && self.disconnect.is_empty()
            && !self.disconnect_current
    }
}

/// The write applied to one field of a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldWrite {
    /// Store the value. Writing `Value::Null` to a JSON field is rejected;
    /// use [`FieldWrite::Null`] to say which null is meant.
    Set(Value),
    /// Store a null of the given kind.
    Null(NullKind),
    Increment(Value),
    Decrement(Value),
    Multiply(Value),
    Divide(Value),
    /// Append to a string list.
    Push(Vec<String>),
    /// Nested relation writes.
    Relation(RelationWrite),
}

/// An ordered write payload. Fields absent from the payload are left untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Data {
    entries: Vec<(String, FieldWrite)>,
}

impl Data {
    /// Create an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field to a value.
    pub fn set(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.write(field, FieldWrite::Set(value.into()))
    }

    /// Set a nullable field to the database null.
    pub fn db_null(self, field: impl Into<String>) -> Self {
        self.write(field, FieldWrite::Null(NullKind::Db))
    }

    /// Set a JSON field to the JSON `null` literal.
    pub fn json_null(self, field: impl Into<String>) -> Self {
        self.write(field, FieldWrite::Null(NullKind::Json))
    }

    /// Nested writes on a relation.
    pub fn relation(self, relation: impl Into<String>, write: RelationWrite) -> Self {
        self.write(relation, FieldWrite::Relation(write))
    }

    /// Add an arbitrary field write. A later write to the same field replaces the earlier one.
    pub fn write(mut self, field: impl Into<String>, write: FieldWrite) -> Self {
        let field = field.into();
        if let Some(entry) = self.entries.iter_mut().find(|(name, _)| *name == field) {
            entry.1 = write;
        } else {
            self.entries.push((field, write));
        }
        self
    }

    /// Look up the write for a field.
    pub fn get(&self, field: &str) -> Option<&FieldWrite> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, w)| w)
    }

    /// Iterate over the writes in payload order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &FieldWrite)> {
        self.entries.iter().map(|(name, w)| (name.as_str(), w))
    }

    /// Number of written fields.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the payload writes nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Arguments of `create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateArgs {
    pub data: Data,
    #[serde(default)]
    pub selection: SelectionSpec,
}

impl CreateArgs {
    pub fn new(data: Data) -> Self {
        Self {
            data,
            selection: SelectionSpec::default(),
        }
    }

    pub fn with_selection(mut self, selection: SelectionSpec) -> Self {
        self.selection = selection;
        self
    }
}

/// Arguments of `createMany`. Payloads may not contain relation writes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CreateManyArgs {
    pub data: Vec<Data>,
    /// Silently skip records that would violate a unique constraint.
    #[serde(default)]
    pub skip_duplicates: bool,
}

impl CreateManyArgs {
    pub fn new(data: Vec<Data>) -> Self {
        Self {
            data,
            skip_duplicates: false,
        }
    }

    pub fn skip_duplicates(mut self) -> Self {
        self.skip_duplicates = true;
        self
    }
}

/// Arguments of `update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateArgs {
    /// Unique filter naming the record.
    pub filter: Filter,
    pub data: Data,
    #[serde(default)]
    pub selection: SelectionSpec,
}

impl UpdateArgs {
    pub fn new(filter: Filter, data: Data) -> Self {
        Self {
            filter,
            data,
            selection: SelectionSpec::default(),
        }
    }

    pub fn with_selection(mut self, selection: SelectionSpec) -> Self {
        self.selection = selection;
        self
    }
}

/// Arguments of `updateMany`. The payload may not contain relation writes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateManyArgs {
    #[serde(default)]
    pub filter: Option<Filter>,
    pub data: Data,
}

impl UpdateManyArgs {
    pub fn new(data: Data) -> Self {
        Self { filter: None, data }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Arguments of `delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteArgs {
    /// Unique filter naming the record.
    pub filter: Filter,
    #[serde(default)]
    pub selection: SelectionSpec,
}

impl DeleteArgs {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            selection: SelectionSpec::default(),
        }
    }

    pub fn with_selection(mut self, selection: SelectionSpec) -> Self {
        self.selection = selection;
        self
    }
}

/// Arguments of `deleteMany`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeleteManyArgs {
    #[serde(default)]
    pub filter: Option<Filter>,
}

impl DeleteManyArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// Arguments of `upsert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertArgs {
    /// Unique filter naming the record.
    pub filter: Filter,
    /// Payload used when no record matches.
    pub create: Data,
    /// Payload used when the record exists.
    pub update: Data,
    #[serde(default)]
    pub selection: SelectionSpec,
}

impl UpsertArgs {
    pub fn new(filter: Filter, create: Data, update: Data) -> Self {
        Self {
            filter,
            create,
            update,
            selection: SelectionSpec::default(),
        }
    }

    pub fn with_selection(mut self, selection: SelectionSpec) -> Self {
        self.selection = selection;
        self
    }
}
