//! Configuration for [`open`](crate::open).

use std::path::PathBuf;

use relq_core::{EngineConfig, StoreConfig};
use serde::Deserialize;

/// Store and engine settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub engine: EngineConfig,
}

impl Config {
    /// A persistent database at `path` with default engine settings.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig::new(path),
            engine: EngineConfig::default(),
        }
    }

    /// A temporary database, removed on drop.
    pub fn temporary() -> Self {
        Self {
            store: StoreConfig::temporary(),
            engine: EngineConfig::default(),
        }
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_partial() {
        let config: Config =
            serde_json::from_str(r#"{"store": {"path": "/tmp/relq"}, "engine": {"timeout_ms": 100}}"#)
                .unwrap();
        assert_eq!(config.store.path, PathBuf::from("/tmp/relq"));
        assert_eq!(config.engine.timeout_ms, 100);
        assert_eq!(
            config.engine.max_wait_ms,
            relq_core::config::DEFAULT_MAX_WAIT_MS
        );
    }
}
