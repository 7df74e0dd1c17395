//! Field descriptors.

use super::types::{DefaultValue, ScalarKind};

/// A scalar field of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: String,
    /// Scalar kind.
    pub kind: ScalarKind,
    /// Whether the field may hold the database null.
    pub nullable: bool,
    /// Default value if absent from a create payload.
    pub default: Option<DefaultValue>,
    /// Set to the current time on every update.
    pub updated_at: bool,
}

impl FieldDescriptor {
    /// Create a new required field.
    pub fn new(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            default: None,
            updated_at: false,
        }
    }

    /// Create a nullable field.
    pub fn optional(name: impl Into<String>, kind: ScalarKind) -> Self {
        Self {
            nullable: true,
            ..Self::new(name, kind)
        }
    }

    /// Set a default value.
    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    /// Mark as an update timestamp.
    pub fn updated_at(mut self) -> Self {
        self.updated_at = true;
        self
    }

    /// Check if a create payload may leave this field out.
    pub fn has_default(&self) -> bool {
        self.default.is_some() || self.updated_at
    }

    /// Check if a create payload must provide this field.
    pub fn is_required(&self) -> bool {
        !self.nullable && !self.has_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_field() {
        let f = FieldDescriptor::new("email", ScalarKind::String);
        assert!(!f.nullable);
        assert!(f.is_required());
    }

    #[test]
    fn test_optional_and_defaulted_fields() {
        let name = FieldDescriptor::optional("name", ScalarKind::String);
        assert!(name.nullable);
        assert!(!name.is_required());

        let id = FieldDescriptor::new("id", ScalarKind::String).with_default(DefaultValue::Uuid);
        assert!(id.has_default());
        assert!(!id.is_required());

        let touched = FieldDescriptor::new("updatedAt", ScalarKind::DateTime).updated_at();
        assert!(touched.has_default());
    }
}
