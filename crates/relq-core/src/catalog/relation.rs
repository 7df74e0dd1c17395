//! Relation descriptors between models.

/// Cardinality of a relation, seen from the model that declares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cardinality {
    /// Exactly one related record.
    OneRequired,
    /// At most one related record.
    OneOptional,
    /// Any number of related records.
    Many,
}

impl Cardinality {
    /// Check if this side holds at most one record.
    pub fn is_one(&self) -> bool {
        !matches!(self, Cardinality::Many)
    }
}

/// Behavior when a referenced record is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferentialAction {
    /// Prevent deletion while referencing records exist.
    Restrict,
    /// Delete referencing records.
    Cascade,
    /// Set the foreign key of referencing records to null.
    SetNull,
}

/// Which side of a relation stores the foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationLink {
    /// This model stores `field`, referencing `references` on the target.
    Owned { field: String, references: String },
    /// The target model stores the key (through the inverse relation).
    Inverse,
}

/// A relation from one model to another. The target is referenced by name
/// and resolved through the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDescriptor {
    /// Relation name (unique within the model, shared namespace with fields).
    pub name: String,
    /// Target model name.
    pub target: String,
    pub cardinality: Cardinality,
    pub link: RelationLink,
    /// Name of the relation on the target pointing back here.
    pub inverse: Option<String>,
    /// Applied to records of this model when the target is deleted (owned side only).
    pub on_delete: ReferentialAction,
}

impl RelationDescriptor {
    /// A required to-one relation stored in `field` on this model.
    pub fn belongs_to(
        name: impl Into<String>,
        target: impl Into<String>,
        field: impl Into<String>,
        references: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::OneRequired,
            link: RelationLink::Owned {
                field: field.into(),
                references: references.into(),
            },
            inverse: None,
            on_delete: ReferentialAction::Restrict,
        }
    }

    /// A to-many relation whose key is stored on the target.
    pub fn has_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::Many,
            link: RelationLink::Inverse,
            inverse: None,
            on_delete: ReferentialAction::Restrict,
        }
    }

    /// An optional to-one relation whose key is stored on the target.
    pub fn has_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            cardinality: Cardinality::OneOptional,
            ..Self::has_many(name, target)
        }
    }

    /// Make a to-one relation optional.
    pub fn optional(mut self) -> Self {
        if self.cardinality == Cardinality::OneRequired {
            self.cardinality = Cardinality::OneOptional;
        }
        self
    }

    /// Name the inverse relation explicitly.
    pub fn with_inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    /// Set delete behavior.
    pub fn with_on_delete(mut self, on_delete: ReferentialAction) -> Self {
        self.on_delete = on_delete;
        self
    }

    /// Check if this side stores the foreign key.
    pub fn is_owned(&self) -> bool {
        matches!(self.link, RelationLink::Owned { .. })
    }

    /// Foreign key field on this model, for owned relations.
    pub fn owned_field(&self) -> Option<&str> {
        match &self.link {
            RelationLink::Owned { field, .. } => Some(field),
            RelationLink::Inverse => None,
        }
    }
}

/// Resolved join columns of a relation: `local` on the declaring model equals
/// `foreign` on the target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JoinKeys {
    pub local: String,
    pub foreign: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_belongs_to() {
        let rel = RelationDescriptor::belongs_to("user", "User", "userId", "id")
            .with_on_delete(ReferentialAction::Cascade);

        assert_eq!(rel.cardinality, Cardinality::OneRequired);
        assert!(rel.is_owned());
        assert_eq!(rel.owned_field(), Some("userId"));
        assert_eq!(rel.on_delete, ReferentialAction::Cascade);
        assert_eq!(rel.optional().cardinality, Cardinality::OneOptional);
    }

    #[test]
    fn test_inverse_sides() {
        let many = RelationDescriptor::has_many("payments", "Payment").with_inverse("user");
        assert_eq!(many.cardinality, Cardinality::Many);
        assert!(!many.is_owned());
        assert_eq!(many.inverse.as_deref(), Some("user"));

        let one = RelationDescriptor::has_one("subscription", "Subscription");
        assert_eq!(one.cardinality, Cardinality::OneOptional);
        assert!(one.cardinality.is_one());
        assert!(one.owned_field().is_none());
    }
}
