//! The application's model set.
//!
//! Users own documents, payments and subscriptions. Telemetry events may be
//! attached to a user and outlive it.

use relq_core::proto::Value;
use relq_core::{
    DefaultValue, FieldDescriptor, ModelDescriptor, ReferentialAction, RelationDescriptor,
    Result, ScalarKind, SchemaRegistry,
};

pub const USER: &str = "User";
pub const DOCUMENT: &str = "Document";
pub const PAYMENT: &str = "Payment";
pub const SUBSCRIPTION: &str = "Subscription";
pub const TELEMETRY_EVENT: &str = "TelemetryEvent";

/// Build the registry of every model.
pub fn registry() -> Result<SchemaRegistry> {
    SchemaRegistry::builder()
        .model(user())
        .model(document())
        .model(payment())
        .model(subscription())
        .model(telemetry_event())
        .build()
}

fn id() -> FieldDescriptor {
    FieldDescriptor::new("id", ScalarKind::String).with_default(DefaultValue::Uuid)
}

fn created_at() -> FieldDescriptor {
    FieldDescriptor::new("createdAt", ScalarKind::DateTime).with_default(DefaultValue::Now)
}

fn updated_at() -> FieldDescriptor {
    FieldDescriptor::new("updatedAt", ScalarKind::DateTime).updated_at()
}

fn owner(on_delete: ReferentialAction) -> RelationDescriptor {
    RelationDescriptor::belongs_to("user", USER, "userId", "id").with_on_delete(on_delete)
}

pub fn user() -> ModelDescriptor {
    ModelDescriptor::new(USER, "id")
        .with_fields([
            id(),
            FieldDescriptor::new("email", ScalarKind::String),
            FieldDescriptor::optional("name", ScalarKind::String),
            FieldDescriptor::new("role", ScalarKind::String)
                .with_default(DefaultValue::Static(Value::from("USER"))),
            FieldDescriptor::new("isActive", ScalarKind::Boolean)
                .with_default(DefaultValue::Static(Value::Bool(true))),
            FieldDescriptor::optional("loginCount", ScalarKind::Int),
            FieldDescriptor::optional("preferences", ScalarKind::Json),
            FieldDescriptor::new("tags", ScalarKind::StringList)
                .with_default(DefaultValue::Static(Value::StringList(Vec::new()))),
            created_at(),
            updated_at(),
        ])
        .with_unique(["email"])
        .with_relation(RelationDescriptor::has_many("documents", DOCUMENT))
        .with_relation(RelationDescriptor::has_many("payments", PAYMENT))
        .with_relation(RelationDescriptor::has_many("subscriptions", SUBSCRIPTION))
        .with_relation(RelationDescriptor::has_many("events", TELEMETRY_EVENT))
}

pub fn document() -> ModelDescriptor {
    ModelDescriptor::new(DOCUMENT, "id")
        .with_fields([
            id(),
            FieldDescriptor::new("userId", ScalarKind::String),
            FieldDescriptor::new("title", ScalarKind::String),
            FieldDescriptor::optional("content", ScalarKind::Json),
            FieldDescriptor::new("status", ScalarKind::String)
                .with_default(DefaultValue::Static(Value::from("draft"))),
            FieldDescriptor::new("version", ScalarKind::Int)
                .with_default(DefaultValue::Static(Value::Int(1))),
            created_at(),
            updated_at(),
        ])
        .with_relation(owner(ReferentialAction::Cascade))
}

/// Payments are kept for accounting: a user with payments cannot be deleted.
pub fn payment() -> ModelDescriptor {
    ModelDescriptor::new(PAYMENT, "id")
        .with_fields([
            id(),
            FieldDescriptor::new("userId", ScalarKind::String),
            FieldDescriptor::new("stripePaymentId", ScalarKind::String),
            FieldDescriptor::new("amount", ScalarKind::Float),
            FieldDescriptor::new("currency", ScalarKind::String)
                .with_default(DefaultValue::Static(Value::from("gbp"))),
            FieldDescriptor::new("status", ScalarKind::String),
            created_at(),
        ])
        .with_unique(["stripePaymentId"])
        .with_relation(owner(ReferentialAction::Restrict))
}

pub fn subscription() -> ModelDescriptor {
    ModelDescriptor::new(SUBSCRIPTION, "id")
        .with_fields([
            id(),
            FieldDescriptor::new("userId", ScalarKind::String),
            FieldDescriptor::new("stripeSubscriptionId", ScalarKind::String),
            FieldDescriptor::new("status", ScalarKind::String),
            FieldDescriptor::optional("currentPeriodStart", ScalarKind::DateTime),
            FieldDescriptor::optional("currentPeriodEnd", ScalarKind::DateTime),
            FieldDescriptor::new("cancelAtPeriodEnd", ScalarKind::Boolean)
                .with_default(DefaultValue::Static(Value::Bool(false))),
            created_at(),
            updated_at(),
        ])
        .with_unique(["stripeSubscriptionId"])
        .with_relation(owner(ReferentialAction::Cascade))
}

pub fn telemetry_event() -> ModelDescriptor {
    ModelDescriptor::new(TELEMETRY_EVENT, "id")
        .with_fields([
            id(),
            FieldDescriptor::optional("userId", ScalarKind::String),
            FieldDescriptor::new("name", ScalarKind::String),
            FieldDescriptor::optional("payload", ScalarKind::Json),
            FieldDescriptor::optional("durationMs", ScalarKind::Int),
            FieldDescriptor::new("occurredAt", ScalarKind::DateTime)
                .with_default(DefaultValue::Now),
        ])
        .with_relation(owner(ReferentialAction::SetNull).optional())
}

#[cfg(test)]
mod tests {
    use super::*;
    use relq_core::Cardinality;

    #[test]
    fn test_registry_builds() {
        let registry = registry().unwrap();
        assert_eq!(registry.models().count(), 5);

        let orphaned = registry.relation(TELEMETRY_EVENT, "user").unwrap();
        assert_eq!(orphaned.descriptor.cardinality, Cardinality::OneOptional);
        assert_eq!(orphaned.join.local, "userId");

        let payments = registry.relation(USER, "payments").unwrap();
        assert_eq!(payments.join.foreign, "userId");
        assert_eq!(registry.incoming(USER).len(), 4);
    }
}
