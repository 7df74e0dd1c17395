//! Result shape requests (`select`, `include`, `omit`).

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::filter::Filter;
use crate::query::FindManyArgs;

/// A related record set to load, with its own nested arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSelection {
    pub relation: String,
    #[serde(default)]
    pub args: FindManyArgs,
}

/// A relation whose size is returned under `_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountSelection {
    pub relation: String,
    #[serde(default)]
    pub filter: Option<Filter>,
}

/// One entry of a `select` or `include` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SelectEntry {
    /// A scalar field (`select` only).
    Field(String),
    /// A relation with nested arguments.
    Relation(RelationSelection),
    /// Relation counts returned under `_count`.
    Count(Vec<CountSelection>),
}

impl SelectEntry {
    /// Select a scalar field.
    pub fn field(name: impl Into<String>) -> Self {
        SelectEntry::Field(name.into())
    }

    /// Load a relation with nested arguments.
    pub fn relation(name: impl Into<String>, args: FindManyArgs) -> Self {
        SelectEntry::Relation(RelationSelection {
            relation: name.into(),
            args,
        })
    }

    /// Count the given relations.
    pub fn count<I, S>(relations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SelectEntry::Count(
            relations
                .into_iter()
                .map(|r| CountSelection {
                    relation: r.into(),
                    filter: None,
                })
                .collect(),
        )
    }
}

/// How scalar fields are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Every scalar field, minus omissions.
    #[default]
    Default,
    /// Only the explicitly selected scalar fields.
    Select,
    /// Every scalar field minus omissions, plus the included relations.
    Include,
}

/// Raw `select`/`include`/`omit` triple as written by a caller.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionInput {
    #[serde(default)]
    pub select: Option<Vec<SelectEntry>>,
    #[serde(default)]
    pub include: Option<Vec<SelectEntry>>,
    #[serde(default)]
    pub omit: Option<Vec<String>>,
}

/// A validated result shape.
///
/// `select` and `include` are mutually exclusive, and `select` cannot be
/// combined with `omit`. Every constructor enforces this.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "SelectionInput", into = "SelectionInput")]
pub struct SelectionSpec {
    mode: SelectionMode,
    fields: Vec<String>,
    omit: Vec<String>,
    relations: Vec<RelationSelection>,
    counts: Vec<CountSelection>,
}

impl SelectionSpec {
    /// Every scalar field, no relations.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build from the raw triple, rejecting invalid combinations.
    pub fn new(
        select: Option<Vec<SelectEntry>>,
        include: Option<Vec<SelectEntry>>,
        omit: Option<Vec<String>>,
    ) -> Result<Self, Error> {
        let omit = omit.unwrap_or_default();
        match (select, include) {
            (Some(_), Some(_)) => Err(Error::InvalidSelection(
                "`select` and `include` cannot be used together".into(),
            )),
            (Some(_), None) if !omit.is_empty() => Err(Error::InvalidSelection(
                "`select` and `omit` cannot be used together".into(),
            )),
            (Some(entries), None) => {
                if entries.is_empty() {
                    return Err(Error::InvalidSelection(
                        "`select` must name at least one field".into(),
                    ));
                }
                let mut spec = Self {
                    mode: SelectionMode::Select,
                    ..Default::default()
                };
                for entry in entries {
                    spec.push(entry);
                }
                Ok(spec)
            }
            (None, Some(entries)) => {
                let mut spec = Self {
                    mode: SelectionMode::Include,
                    omit,
                    ..Default::default()
                };
                for entry in entries {
                    if let SelectEntry::Field(name) = &entry {
                        return Err(Error::InvalidSelection(format!(
                            "`include` only accepts relations, got scalar field `{}`",
                            name
                        )));
                    }
                    spec.push(entry);
                }
                Ok(spec)
            }
            (None, None) => Ok(Self {
                omit,
                ..Default::default()
            }),
        }
    }

    /// Explicit allow-list of fields and relations.
    pub fn select(entries: Vec<SelectEntry>) -> Result<Self, Error> {
        Self::new(Some(entries), None, None)
    }

    /// All scalar fields plus the given relations.
    pub fn include(entries: Vec<SelectEntry>) -> Result<Self, Error> {
        Self::new(None, Some(entries), None)
    }

    /// All scalar fields except the given ones.
    pub fn omit<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            omit: fields.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Add omissions to a default or include shape.
    pub fn with_omit<I, S>(mut self, fields: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.mode == SelectionMode::Select {
            return Err(Error::InvalidSelection(
                "`select` and `omit` cannot be used together".into(),
            ));
        }
        self.omit.extend(fields.into_iter().map(Into::into));
        Ok(self)
    }

    fn push(&mut self, entry: SelectEntry) {
        match entry {
            SelectEntry::Field(name) => self.fields.push(name),
            SelectEntry::Relation(rel) => self.relations.push(rel),
            SelectEntry::Count(counts) => self.counts.extend(counts),
        }
    }

    /// How scalar fields are chosen.
    pub fn mode(&self) -> SelectionMode {
        self.mode
    }

    /// Explicitly selected scalar fields (`select` mode only).
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Omitted scalar fields.
    pub fn omitted(&self) -> &[String] {
        &self.omit
    }

    /// Relations to load.
    pub fn relations(&self) -> &[RelationSelection] {
        &self.relations
    }

    /// Relations to count.
    pub fn counts(&self) -> &[CountSelection] {
        &self.counts
    }
}

impl TryFrom<SelectionInput> for SelectionSpec {
    type Error = Error;

    fn try_from(input: SelectionInput) -> Result<Self, Self::Error> {
        Self::new(input.select, input.include, input.omit)
    }
}

impl From<SelectionSpec> for SelectionInput {
    fn from(spec: SelectionSpec) -> Self {
        let mut entries: Vec<SelectEntry> =
            spec.fields.into_iter().map(SelectEntry::Field).collect();
        entries.extend(spec.relations.into_iter().map(SelectEntry::Relation));
        if !spec.counts.is_empty() {
            entries.push(SelectEntry::Count(spec.counts));
        }
        let omit = (!spec.omit.is_empty()).then_some(spec.omit);

        match spec.mode {
            SelectionMode::Select => SelectionInput {
                select: Some(entries),
                include: None,
                omit: None,
            },
            SelectionMode::Include => SelectionInput {
                select: None,
                include: Some(entries),
                omit,
            },
            SelectionMode::Default => SelectionInput {
                select: None,
                include: None,
                omit,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_and_include_are_exclusive() {
        let err = SelectionSpec::new(
            Some(vec![SelectEntry::field("id")]),
            Some(vec![SelectEntry::relation("orders", FindManyArgs::new())]),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSelection(_)));
    }

    #[test]
    fn test_select_rejects_omit() {
        let err = SelectionSpec::new(
            Some(vec![SelectEntry::field("id")]),
            None,
            Some(vec!["password".into()]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSelection(_)));

        let spec = SelectionSpec::select(vec![SelectEntry::field("id")]).unwrap();
        assert!(spec.with_omit(["password"]).is_err());
    }

    #[test]
    fn test_include_accepts_omit() {
        let spec = SelectionSpec::include(vec![SelectEntry::relation("orders", FindManyArgs::new())])
            .unwrap()
            .with_omit(["password"])
            .unwrap();
        assert_eq!(spec.mode(), SelectionMode::Include);
        assert_eq!(spec.omitted(), ["password".to_string()]);
        assert_eq!(spec.relations().len(), 1);
    }

    #[test]
    fn test_include_rejects_scalars() {
        assert!(SelectionSpec::include(vec![SelectEntry::field("email")]).is_err());
    }

    #[test]
    fn test_empty_select_rejected() {
        assert!(SelectionSpec::select(vec![]).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let bad = r#"{"select":[{"Field":"id"}],"omit":["email"]}"#;
        assert!(serde_json::from_str::<SelectionSpec>(bad).is_err());

        let good = r#"{"select":[{"Field":"id"},{"Count":[{"relation":"orders"}]}]}"#;
        let spec: SelectionSpec = serde_json::from_str(good).unwrap();
        assert_eq!(spec.fields(), ["id".to_string()]);
        assert_eq!(spec.counts()[0].relation, "orders");
    }
}
