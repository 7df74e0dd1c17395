//! Schema registry: models, fields, relations and unique keys.

mod field;
mod model;
mod registry;
mod relation;
mod types;

pub use field::FieldDescriptor;
pub use model::{FieldKind, ModelDescriptor, UniqueKey};
pub use registry::{IncomingRef, RegistryBuilder, ResolvedRelation, SchemaRegistry};
pub use relation::{Cardinality, JoinKeys, ReferentialAction, RelationDescriptor, RelationLink};
pub use types::{DefaultValue, ScalarKind};
