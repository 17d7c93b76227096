//! Cache configuration
//!
//! Loaded from TOML or built in code; validated before use.

use serde::{Deserialize, Serialize};

use crate::DEFAULT_CACHE_CAPACITY;
use crate::error::ConfigError;

/// Frame cache configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of frames held at once
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` when the capacity is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid(
                "cache capacity must be at least 1 frame".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    ///
    /// ```rust
    /// use vm_frame_cache::CacheConfig;
    ///
    /// let config = CacheConfig::from_toml("capacity = 16").unwrap();
    /// assert_eq!(config.capacity, 16);
    /// ```
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)
            .map_err(|e| ConfigError::Parse(format!("TOML parse error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Serialize(format!("TOML serialize error: {}", e)))
    }
}
