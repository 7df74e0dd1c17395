//! Shared test registry: users with orders and an optional profile.

use std::sync::Arc;

use relq_proto::Value;

use crate::catalog::{
    DefaultValue, FieldDescriptor, ModelDescriptor, ReferentialAction, RelationDescriptor,
    ScalarKind, SchemaRegistry,
};

pub(crate) fn shop() -> SchemaRegistry {
    SchemaRegistry::builder()
        .model(
            ModelDescriptor::new("User", "id")
                .with_fields([
                    FieldDescriptor::new("id", ScalarKind::String).with_default(DefaultValue::Uuid),
                    FieldDescriptor::new("email", ScalarKind::String),
                    FieldDescriptor::optional("name", ScalarKind::String),
                    FieldDescriptor::new("role", ScalarKind::String)
                        .with_default(DefaultValue::Static(Value::from("member"))),
                    FieldDescriptor::optional("age", ScalarKind::Int),
                    FieldDescriptor::optional("meta", ScalarKind::Json),
                    FieldDescriptor::new("tags", ScalarKind::StringList)
                        .with_default(DefaultValue::Static(Value::StringList(Vec::new()))),
                    FieldDescriptor::new("createdAt", ScalarKind::DateTime)
                        .with_default(DefaultValue::Now),
                ])
                .with_unique(["email"])
                .with_relation(RelationDescriptor::has_many("orders", "Order"))
                .with_relation(RelationDescriptor::has_one("profile", "Profile")),
        )
        .model(
            ModelDescriptor::new("Order", "id")
                .with_fields([
                    FieldDescriptor::new("id", ScalarKind::String).with_default(DefaultValue::Uuid),
                    FieldDescriptor::new("userId", ScalarKind::String),
                    FieldDescriptor::new("amount", ScalarKind::Float),
                    FieldDescriptor::new("status", ScalarKind::String)
                        .with_default(DefaultValue::Static(Value::from("open"))),
                    FieldDescriptor::optional("note", ScalarKind::Json),
                ])
                .with_relation(
                    RelationDescriptor::belongs_to("user", "User", "userId", "id")
                        .with_on_delete(ReferentialAction::Cascade),
                ),
        )
        .model(
            ModelDescriptor::new("Profile", "id")
                .with_fields([
                    FieldDescriptor::new("id", ScalarKind::String).with_default(DefaultValue::Uuid),
                    FieldDescriptor::new("userId", ScalarKind::String),
                    FieldDescriptor::optional("bio", ScalarKind::String),
                ])
                .with_unique(["userId"])
                .with_relation(
                    RelationDescriptor::belongs_to("user", "User", "userId", "id")
                        .with_on_delete(ReferentialAction::Cascade),
                ),
        )
        .build()
        .expect("shop registry is valid")
}

pub(crate) fn shop_arc() -> Arc<SchemaRegistry> {
    Arc::new(shop())
}
