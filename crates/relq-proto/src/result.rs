//! Result graph returned by read and write operations.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// One entry of a result record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Scalar field value.
    Value(Value),
    /// Related record of a to-one relation.
    One(Box<Record>),
    /// Related records of a to-many relation, in order.
    Many(Vec<Record>),
    /// To-one relation with no related record.
    Absent,
}

/// A shaped record: only the requested fields and relations, in declaration order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    entries: Vec<(String, Node)>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&mut self, name: impl Into<String>, node: Node) {
        self.entries.push((name.into(), node));
    }

    /// Look up an entry.
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Look up a scalar value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self.node(name)? {
            Node::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Look up a to-one relation. Returns `Some(None)` when the relation is absent.
    pub fn one(&self, name: &str) -> Option<Option<&Record>> {
        match self.node(name)? {
            Node::One(r) => Some(Some(r)),
            Node::Absent => Some(None),
            _ => None,
        }
    }

    /// Look up a to-many relation.
    pub fn many(&self, name: &str) -> Option<&[Record]> {
        match self.node(name)? {
            Node::Many(v) => Some(v),
            _ => None,
        }
    }

    /// Check if the record has an entry.
    pub fn contains(&self, name: &str) -> bool {
        self.node(name).is_some()
    }

    /// Entry names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Iterate over entries in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the record has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of a bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchPayload {
    /// Number of affected records.
    pub count: u64,
}
