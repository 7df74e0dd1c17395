//! Read operation arguments: ordering, pagination and per-operation args.

use serde::{Deserialize, Serialize};

use crate::filter::Filter;
use crate::selection::SelectionSpec;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    /// The opposite direction.
    pub fn reverse(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// Placement of nulls in an ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullsOrder {
    First,
    Last,
}

/// Ordering on a single scalar field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
    /// Null placement. When unset, nulls sort before every value.
    pub nulls: Option<NullsOrder>,
}

impl OrderBy {
    /// Ascending order on a field.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
            nulls: None,
        }
    }

    /// Descending order on a field.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
            nulls: None,
        }
    }

    /// Set null placement.
    pub fn with_nulls(mut self, nulls: NullsOrder) -> Self {
        self.nulls = Some(nulls);
        self
    }
}

/// Arguments of `findMany` and `findFirst`, also used for nested relation selections.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FindManyArgs {
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub selection: SelectionSpec,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    /// Unique filter naming the cursor record.
    #[serde(default)]
    pub cursor: Option<Filter>,
    /// Include the cursor record itself in the page.
    #[serde(default)]
    pub cursor_inclusive: bool,
    /// Page size. Negative values read backwards from the cursor (or the end).
    #[serde(default)]
    pub take: Option<i64>,
    #[serde(default)]
    pub skip: Option<u64>,
    /// Keep only the first record for each distinct combination of these fields.
    #[serde(default)]
    pub distinct: Vec<String>,
}

impl FindManyArgs {
    /// Create empty arguments (all records, default selection).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set the selection.
    pub fn with_selection(mut self, selection: SelectionSpec) -> Self {
        self.selection = selection;
        self
    }

    /// Append an ordering.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set the cursor.
    pub fn with_cursor(mut self, cursor: Filter) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Set the page size.
    pub fn take(mut self, take: i64) -> Self {
        self.take = Some(take);
        self
    }

    /// Set the number of records to skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Set the distinct fields.
    pub fn distinct(mut self, fields: Vec<String>) -> Self {
        self.distinct = fields;
        self
    }

    /// Check if any pagination argument is present.
    pub fn is_paginated(&self) -> bool {
        self.cursor.is_some() || self.take.is_some() || self.skip.is_some()
    }
}

/// Arguments of `findUnique` and `findUniqueOrThrow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindUniqueArgs {
    /// Must pin every field of a unique key with an equality.
    pub filter: Filter,
    #[serde(default)]
    pub selection: SelectionSpec,
}

impl FindUniqueArgs {
    /// Create arguments from a unique filter.
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            selection: SelectionSpec::default(),
        }
    }

    /// Set the selection.
    pub fn with_selection(mut self, selection: SelectionSpec) -> Self {
        self.selection = selection;
        self
    }
}

/// Arguments of `count`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CountArgs {
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub cursor: Option<Filter>,
    #[serde(default)]
    pub cursor_inclusive: bool,
    #[serde(default)]
    pub take: Option<i64>,
    #[serde(default)]
    pub skip: Option<u64>,
}

impl CountArgs {
    /// Count every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count records matching the filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}
