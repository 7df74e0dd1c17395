//! The model registry.
//!
//! The registry is built once, validated as a whole, and then shared
//! read-only. Relations refer to their targets by name; the registry
//! resolves every relation to concrete join columns at build time so the
//! rest of the engine never walks model references.

use std::collections::{HashMap, HashSet};

use relq_proto::Value;

use super::field::FieldDescriptor;
use super::model::{FieldKind, ModelDescriptor};
use super::relation::{Cardinality, JoinKeys, ReferentialAction, RelationDescriptor, RelationLink};
use super::types::{DefaultValue, ScalarKind};
use crate::error::{Error, Result};

/// A foreign key held by another model that points at a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRef {
    /// Model storing the key.
    pub model: String,
    /// Owned relation on that model.
    pub relation: String,
    /// Key field on that model.
    pub field: String,
    /// Referenced field on the target.
    pub references: String,
    pub on_delete: ReferentialAction,
    /// Constraint name reported on violations (`Payment_userId_fkey`).
    pub constraint: String,
}

/// A relation together with its resolved target and join columns.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedRelation<'a> {
    pub descriptor: &'a RelationDescriptor,
    pub target: &'a ModelDescriptor,
    pub join: &'a JoinKeys,
}

/// Validated, immutable set of model descriptors.
#[derive(Debug)]
pub struct SchemaRegistry {
    models: Vec<ModelDescriptor>,
    index: HashMap<String, usize>,
    joins: HashMap<(String, String), JoinKeys>,
    incoming: HashMap<String, Vec<IncomingRef>>,
}

/// Collects model descriptors and validates them on [`RegistryBuilder::build`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<ModelDescriptor>,
}

impl RegistryBuilder {
    /// Add a model.
    pub fn model(mut self, model: ModelDescriptor) -> Self {
        self.models.push(model);
        self
    }

    /// Validate every model and relation and build the registry.
    pub fn build(self) -> Result<SchemaRegistry> {
        let mut index = HashMap::new();
        for (i, model) in self.models.iter().enumerate() {
            if index.insert(model.name.clone(), i).is_some() {
                return Err(Error::Schema(format!("duplicate model `{}`", model.name)));
            }
        }

        for model in &self.models {
            validate_model(model)?;
        }

        let lookup = |name: &str| index.get(name).map(|&i| &self.models[i]);
        let mut joins = HashMap::new();
        let mut incoming: HashMap<String, Vec<IncomingRef>> = HashMap::new();

        for model in &self.models {
            for relation in &model.relations {
                let target = lookup(&relation.target).ok_or_else(|| {
                    Error::Schema(format!(
                        "relation `{}.{}` references unknown model `{}`",
                        model.name, relation.name, relation.target
                    ))
                })?;

                let join = match &relation.link {
                    RelationLink::Owned { field, references } => {
                        validate_owned(model, relation, target, field, references)?;
                        incoming
                            .entry(target.name.clone())
                            .or_default()
                            .push(IncomingRef {
                                model: model.name.clone(),
                                relation: relation.name.clone(),
                                field: field.clone(),
                                references: references.clone(),
                                on_delete: relation.on_delete,
                                constraint: format!("{}_{}_fkey", model.name, field),
                            });
                        JoinKeys {
                            local: field.clone(),
                            foreign: references.clone(),
                        }
                    }
                    RelationLink::Inverse => {
                        let (field, references) = find_owning_inverse(model, relation, target)?;
                        validate_inverse(model, relation, target, field)?;
                        JoinKeys {
                            local: references.to_string(),
                            foreign: field.to_string(),
                        }
                    }
                };
                joins.insert((model.name.clone(), relation.name.clone()), join);
            }
        }

        tracing::info!(models = self.models.len(), "schema registry built");

        Ok(SchemaRegistry {
            models: self.models,
            index,
            joins,
            incoming,
        })
    }
}

fn validate_model(model: &ModelDescriptor) -> Result<()> {
    let mut names = HashSet::new();
    let all_names = model
        .fields
        .iter()
        .map(|f| f.name.as_str())
        .chain(model.relations.iter().map(|r| r.name.as_str()));
    for name in all_names {
        if !names.insert(name) {
            return Err(Error::Schema(format!(
                "duplicate field or relation `{}` on `{}`",
                name, model.name
            )));
        }
    }

    if model.id_fields().is_empty() {
        return Err(Error::Schema(format!("model `{}` has no primary key", model.name)));
    }
    for key in model.unique_keys() {
        for field in &key.fields {
            if model.field(field).is_none() {
                return Err(Error::Schema(format!(
                    "unique key `{}` names unknown field `{}.{}`",
                    key.name, model.name, field
                )));
            }
        }
    }

    for field in &model.fields {
        validate_field(model, field)?;
    }
    Ok(())
}

fn validate_field(model: &ModelDescriptor, field: &FieldDescriptor) -> Result<()> {
    if let Some(default) = &field.default {
        let null_default = matches!(default, DefaultValue::Static(Value::Null));
        if !default.fits(field.kind) || (null_default && !field.nullable) {
            return Err(Error::Schema(format!(
                "default of `{}.{}` does not fit {}",
                model.name,
                field.name,
                field.kind.as_str()
            )));
        }
    }
    if field.updated_at && field.kind != ScalarKind::DateTime {
        return Err(Error::Schema(format!(
            "update timestamp `{}.{}` must be a DateTime",
            model.name, field.name
        )));
    }
    Ok(())
}

fn validate_owned(
    model: &ModelDescriptor,
    relation: &RelationDescriptor,
    target: &ModelDescriptor,
    field: &str,
    references: &str,
) -> Result<()> {
    let qualified = format!("{}.{}", model.name, relation.name);
    if relation.cardinality == Cardinality::Many {
        return Err(Error::Schema(format!(
            "to-many relation `{}` cannot store the foreign key",
            qualified
        )));
    }
    let local = model.field(field).ok_or_else(|| {
        Error::Schema(format!("relation `{}` uses unknown field `{}`", qualified, field))
    })?;
    let foreign = target.field(references).ok_or_else(|| {
        Error::Schema(format!(
            "relation `{}` references unknown field `{}.{}`",
            qualified, target.name, references
        ))
    })?;
    if local.kind != foreign.kind {
        return Err(Error::Schema(format!(
            "relation `{}` joins {} to {}",
            qualified,
            local.kind.as_str(),
            foreign.kind.as_str()
        )));
    }
    if !target.is_unique(&[references]) {
        return Err(Error::Schema(format!(
            "relation `{}` must reference a unique key of `{}`",
            qualified, target.name
        )));
    }
    match relation.cardinality {
        Cardinality::OneRequired if local.nullable => Err(Error::Schema(format!(
            "required relation `{}` uses nullable field `{}`",
            qualified, field
        ))),
        Cardinality::OneOptional if !local.nullable => Err(Error::Schema(format!(
            "optional relation `{}` uses non-nullable field `{}`",
            qualified, field
        ))),
        _ if relation.on_delete == ReferentialAction::SetNull && !local.nullable => {
            Err(Error::Schema(format!(
                "relation `{}` sets non-nullable field `{}` to null on delete",
                qualified, field
            )))
        }
        _ => Ok(()),
    }?;

    if let Some(inverse) = &relation.inverse {
        match target.relation(inverse) {
            Some(back) if back.target == model.name && !back.is_owned() => {}
            _ => {
                return Err(Error::Schema(format!(
                    "inverse `{}.{}` of `{}` does not point back",
                    target.name, inverse, qualified
                )))
            }
        }
    }
    Ok(())
}

fn find_owning_inverse<'a>(
    model: &ModelDescriptor,
    relation: &RelationDescriptor,
    target: &'a ModelDescriptor,
) -> Result<(&'a str, &'a str)> {
    let qualified = format!("{}.{}", model.name, relation.name);
    let owned_link = |r: &'a RelationDescriptor| match &r.link {
        RelationLink::Owned { field, references } if r.target == model.name => {
            Some((field.as_str(), references.as_str()))
        }
        _ => None,
    };

    if let Some(name) = &relation.inverse {
        return target.relation(name).and_then(owned_link).ok_or_else(|| {
            Error::Schema(format!(
                "inverse `{}.{}` of `{}` does not store a key pointing back",
                target.name, name, qualified
            ))
        });
    }

    let candidates: Vec<(&str, &str)> = target
        .relations
        .iter()
        .filter(|r| r.inverse.as_deref().map_or(true, |n| n == relation.name))
        .filter_map(owned_link)
        .collect();
    match candidates.as_slice() {
        [only] => Ok(*only),
        [] => Err(Error::Schema(format!(
            "relation `{}` has no inverse on `{}` storing the key",
            qualified, target.name
        ))),
        _ => Err(Error::Schema(format!(
            "relation `{}` has several candidate inverses on `{}`; name one",
            qualified, target.name
        ))),
    }
}

fn validate_inverse(
    model: &ModelDescriptor,
    relation: &RelationDescriptor,
    target: &ModelDescriptor,
    field: &str,
) -> Result<()> {
    let qualified = format!("{}.{}", model.name, relation.name);
    match relation.cardinality {
        Cardinality::OneRequired => Err(Error::Schema(format!(
            "relation `{}` does not store the key and must be optional",
            qualified
        ))),
        Cardinality::OneOptional if !target.is_unique(&[field]) => Err(Error::Schema(format!(
            "one-to-one relation `{}` needs a unique key on `{}.{}`",
            qualified, target.name, field
        ))),
        _ => Ok(()),
    }
}

impl SchemaRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Look up a model.
    pub fn describe(&self, model: &str) -> Result<&ModelDescriptor> {
        self.index
            .get(model)
            .map(|&i| &self.models[i])
            .ok_or_else(|| Error::validation(format!("unknown model `{}`", model)))
    }

    /// Resolve a name on a model to a field or relation.
    pub fn field_type(&self, model: &str, field: &str) -> Result<FieldKind<'_>> {
        let descriptor = self.describe(model)?;
        descriptor.kind_of(field).ok_or_else(|| {
            Error::validation(format!("unknown field `{}` on model `{}`", field, model))
        })
    }

    /// Resolve a relation to its target and join columns.
    pub fn relation(&self, model: &str, relation: &str) -> Result<ResolvedRelation<'_>> {
        let descriptor = match self.field_type(model, relation)? {
            FieldKind::Relation(r) => r,
            FieldKind::Scalar(_) => {
                return Err(Error::validation(format!(
                    "`{}.{}` is a scalar field, not a relation",
                    model, relation
                )))
            }
        };
        let target = self.describe(&descriptor.target)?;
        let join = self
            .joins
            .get(&(model.to_string(), relation.to_string()))
            .ok_or_else(|| {
                Error::InternalConsistency(format!("relation `{}.{}` is unresolved", model, relation))
            })?;
        Ok(ResolvedRelation {
            descriptor,
            target,
            join,
        })
    }

    /// Foreign keys held by other models that point at this model.
    pub fn incoming(&self, model: &str) -> &[IncomingRef] {
        self.incoming.get(model).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every model in declaration order.
    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> ModelDescriptor {
        ModelDescriptor::new("User", "id")
            .with_field(FieldDescriptor::new("id", ScalarKind::String))
            .with_field(FieldDescriptor::new("email", ScalarKind::String))
            .with_relation(RelationDescriptor::has_many("payments", "Payment"))
            .with_unique(["email"])
    }

    fn payment() -> ModelDescriptor {
        ModelDescriptor::new("Payment", "id")
            .with_field(FieldDescriptor::new("id", ScalarKind::String))
            .with_field(FieldDescriptor::new("userId", ScalarKind::String))
            .with_field(FieldDescriptor::new("amount", ScalarKind::Int))
            .with_relation(RelationDescriptor::belongs_to("user", "User", "userId", "id"))
    }

    #[test]
    fn test_build_and_resolve() {
        let registry = SchemaRegistry::builder()
            .model(user())
            .model(payment())
            .build()
            .unwrap();

        let rel = registry.relation("User", "payments").unwrap();
        assert_eq!(rel.target.name, "Payment");
        assert_eq!(rel.join.local, "id");
        assert_eq!(rel.join.foreign, "userId");

        let back = registry.relation("Payment", "user").unwrap();
        assert_eq!(back.join.local, "userId");
        assert_eq!(back.join.foreign, "id");

        let incoming = registry.incoming("User");
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].constraint, "Payment_userId_fkey");
        assert!(registry.incoming("Payment").is_empty());
    }

    #[test]
    fn test_field_type() {
        let registry = SchemaRegistry::builder()
            .model(user())
            .model(payment())
            .build()
            .unwrap();
        assert!(matches!(
            registry.field_type("User", "email").unwrap(),
            FieldKind::Scalar(_)
        ));
        assert!(matches!(
            registry.field_type("User", "payments").unwrap(),
            FieldKind::Relation(_)
        ));
        assert!(matches!(
            registry.field_type("User", "nope"),
            Err(Error::Validation(_))
        ));
        assert!(matches!(registry.describe("Nope"), Err(Error::Validation(_))));
        assert!(registry.relation("User", "email").is_err());
    }

    #[test]
    fn test_unknown_target_rejected() {
        let err = SchemaRegistry::builder().model(payment()).build().unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_missing_inverse_rejected() {
        let payment = ModelDescriptor::new("Payment", "id")
            .with_field(FieldDescriptor::new("id", ScalarKind::String));
        let err = SchemaRegistry::builder()
            .model(user())
            .model(payment)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("no inverse"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let user = user().with_field(FieldDescriptor::new("payments", ScalarKind::Int));
        let err = SchemaRegistry::builder()
            .model(user)
            .model(payment())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_many_side_cannot_own_key() {
        let mut bad = RelationDescriptor::belongs_to("user", "User", "userId", "id");
        bad.cardinality = Cardinality::Many;
        let payment = ModelDescriptor::new("Payment", "id")
            .with_field(FieldDescriptor::new("id", ScalarKind::String))
            .with_field(FieldDescriptor::new("userId", ScalarKind::String))
            .with_relation(bad);
        let err = SchemaRegistry::builder()
            .model(user())
            .model(payment)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn test_required_relation_needs_non_nullable_key() {
        let payment = ModelDescriptor::new("Payment", "id")
            .with_field(FieldDescriptor::new("id", ScalarKind::String))
            .with_field(FieldDescriptor::optional("userId", ScalarKind::String))
            .with_relation(RelationDescriptor::belongs_to("user", "User", "userId", "id"));
        let err = SchemaRegistry::builder()
            .model(user())
            .model(payment)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("nullable"));
    }

    #[test]
    fn test_one_to_one_needs_unique_key() {
        let user = ModelDescriptor::new("User", "id")
            .with_field(FieldDescriptor::new("id", ScalarKind::String))
            .with_relation(RelationDescriptor::has_one("profile", "Profile"));
        let profile = ModelDescriptor::new("Profile", "id")
            .with_field(FieldDescriptor::new("id", ScalarKind::String))
            .with_field(FieldDescriptor::new("userId", ScalarKind::String))
            .with_relation(RelationDescriptor::belongs_to("user", "User", "userId", "id"));

        let err = SchemaRegistry::builder()
            .model(user.clone())
            .model(profile.clone())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("unique"));

        let registry = SchemaRegistry::builder()
            .model(user)
            .model(profile.with_unique(["userId"]))
            .build()
            .unwrap();
        assert_eq!(registry.relation("User", "profile").unwrap().join.foreign, "userId");
    }

    #[test]
    fn test_bad_default_rejected() {
        let user = user().with_field(
            FieldDescriptor::new("age", ScalarKind::Int)
                .with_default(DefaultValue::Static(Value::from("ten"))),
        );
        let err = SchemaRegistry::builder()
            .model(user)
            .model(payment())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("default"));
    }
}
