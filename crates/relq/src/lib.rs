//! relq - a schema-driven, type-checked data-access engine.
//!
//! This crate wires the application's models to a sled store and hands back
//! an [`Engine`].
//!
//! # Quick Start
//!
//! ```ignore
//! use relq::proto::{CreateArgs, Data, Filter, FindManyArgs};
//!
//! #[tokio::main]
//! async fn main() -> relq::Result<()> {
//!     let engine = relq::open(relq::Config::new("./relq_data"))?;
//!
//!     engine
//!         .model("User")
//!         .create(CreateArgs::new(Data::new().set("email", "ada@example.com")))
//!         .await?;
//!
//!     let admins = engine
//!         .model("User")
//!         .find_many(FindManyArgs::new().with_filter(Filter::eq("role", "ADMIN")))
//!         .await?;
//!     println!("{} admins", admins.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod models;

use std::sync::Arc;

use tracing::info;

pub use config::Config;
pub use relq_core::{
    Engine, EngineConfig, Error, ErrorKind, ModelClient, Result, SchemaRegistry, SledStore,
    StoreConfig, TimeoutPhase, Transaction,
};

/// Re-export protocol types.
pub use relq_core::proto;

/// Open the store described by `config` and build an engine over every model.
pub fn open(config: Config) -> Result<Engine> {
    let registry = Arc::new(models::registry()?);
    let store = SledStore::open(config.store, registry.clone())?;
    if store.was_recovered() {
        info!("reopened existing relq database");
    }
    Ok(Engine::new(registry, Arc::new(store), config.engine))
}
