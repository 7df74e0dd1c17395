//! Engine configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default time a transaction may wait to start (2 seconds).
pub const DEFAULT_MAX_WAIT_MS: u64 = 2_000;

/// Default time a transaction may run before it is rolled back (5 seconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Default maximum nesting of `include`/`select` relation levels.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Configuration for [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Milliseconds a transaction may wait for the store to start it.
    pub max_wait_ms: u64,

    /// Milliseconds a transaction may run.
    pub timeout_ms: u64,

    /// Maximum relation nesting of a selection.
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default `maxWait`.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait_ms = duration_ms(max_wait);
        self
    }

    /// Set the default `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = duration_ms(timeout);
        self
    }

    /// Set the maximum relation nesting.
    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
