//! Model configuration.

use serde::Deserialize;

use crate::dbal::Platform;
use crate::error::{Error, Result};

/// Configuration shared by the model, its mappers and the connection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrmConfig {
    /// Cache relationship fetch results until the next flush or rollback.
    pub cache_relationships: bool,

    /// Statements slower than this many milliseconds are logged at `warn`.
    /// None disables the check.
    pub slow_query_threshold_ms: Option<u64>,

    /// Render SQL for this platform instead of the connection's own.
    pub platform: Option<Platform>,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            cache_relationships: true,
            slow_query_threshold_ms: None,
            platform: None,
        }
    }
}

impl OrmConfig {
    /// Decode a configuration from JSON; missing keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))
    }

    /// Enable or disable the relationship cache.
    pub fn with_relationship_cache(mut self, enabled: bool) -> Self {
        self.cache_relationships = enabled;
        self
    }

    /// Set the slow statement threshold.
    pub fn with_slow_query_threshold_ms(mut self, ms: u64) -> Self {
        self.slow_query_threshold_ms = Some(ms);
        self
    }

    /// Override the SQL platform.
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }
}
