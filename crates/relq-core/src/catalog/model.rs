//! Model descriptors.

use super::field::FieldDescriptor;
use super::relation::RelationDescriptor;

/// A unique key group. The first key of every model is its primary key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueKey {
    /// Constraint name reported on violations (`User_pkey`, `User_email_key`).
    pub name: String,
    pub fields: Vec<String>,
    pub primary: bool,
}

/// What a name on a model refers to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind<'a> {
    Scalar(&'a FieldDescriptor),
    Relation(&'a RelationDescriptor),
}

/// A record type: scalar fields, relations and unique keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    /// Model name (unique within the registry).
    pub name: String,
    /// Scalar fields in declaration order.
    pub fields: Vec<FieldDescriptor>,
    /// Relations in declaration order.
    pub relations: Vec<RelationDescriptor>,
    keys: Vec<UniqueKey>,
}

impl ModelDescriptor {
    /// Create a model whose primary key is a single field.
    pub fn new(name: impl Into<String>, id_field: impl Into<String>) -> Self {
        Self::with_primary_key(name, vec![id_field.into()])
    }

    /// Create a model with a (possibly composite) primary key.
    pub fn with_primary_key(name: impl Into<String>, fields: Vec<String>) -> Self {
        let name = name.into();
        Self {
            keys: vec![UniqueKey {
                name: format!("{}_pkey", name),
                fields,
                primary: true,
            }],
            name,
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Add a field.
    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Add multiple fields.
    pub fn with_fields(mut self, fields: impl IntoIterator<Item = FieldDescriptor>) -> Self {
        self.fields.extend(fields);
        self
    }

    /// Add a relation.
    pub fn with_relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    /// Add a unique key group.
    pub fn with_unique<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        self.keys.push(UniqueKey {
            name: format!("{}_{}_key", self.name, fields.join("_")),
            fields,
            primary: false,
        });
        self
    }

    /// Look up a scalar field.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a relation.
    pub fn relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Resolve a name to a field or relation.
    pub fn kind_of(&self, name: &str) -> Option<FieldKind<'_>> {
        self.field(name)
            .map(FieldKind::Scalar)
            .or_else(|| self.relation(name).map(FieldKind::Relation))
    }

    /// Primary key fields.
    pub fn id_fields(&self) -> &[String] {
        &self.keys[0].fields
    }

    /// Every unique key group, primary key first.
    pub fn unique_keys(&self) -> &[UniqueKey] {
        &self.keys
    }

    /// Check if the given fields form exactly one unique key group.
    pub fn is_unique(&self, fields: &[&str]) -> bool {
        self.keys.iter().any(|k| {
            k.fields.len() == fields.len() && k.fields.iter().all(|f| fields.contains(&f.as_str()))
        })
    }

    /// Scalar field names in declaration order.
    pub fn scalar_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::types::ScalarKind;

    fn user() -> ModelDescriptor {
        ModelDescriptor::new("User", "id")
            .with_field(FieldDescriptor::new("id", ScalarKind::String))
            .with_field(FieldDescriptor::new("email", ScalarKind::String))
            .with_relation(RelationDescriptor::has_many("payments", "Payment"))
            .with_unique(["email"])
    }

    #[test]
    fn test_lookup() {
        let model = user();
        assert!(matches!(model.kind_of("email"), Some(FieldKind::Scalar(_))));
        assert!(matches!(model.kind_of("payments"), Some(FieldKind::Relation(_))));
        assert!(model.kind_of("missing").is_none());
        assert_eq!(model.scalar_names().collect::<Vec<_>>(), vec!["id", "email"]);
    }

    #[test]
    fn test_unique_keys() {
        let model = user();
        assert_eq!(model.id_fields(), ["id".to_string()]);
        let keys = model.unique_keys();
        assert_eq!(keys[0].name, "User_pkey");
        assert!(keys[0].primary);
        assert_eq!(keys[1].name, "User_email_key");
        assert!(model.is_unique(&["email"]));
        assert!(!model.is_unique(&["id", "email"]));
    }
}
