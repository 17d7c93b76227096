//! Block driver configuration

use serde::{Deserialize, Serialize};
use vm_frame_cache::{CacheConfig, ConfigError, DEFAULT_CACHE_CAPACITY, FrameIndex};

/// Number of metadata frames reserved at the start of the device
pub const DEFAULT_MAX_FILES: FrameIndex = 256;

/// Block driver configuration
///
/// ```rust
/// use vm_block::BlockConfig;
///
/// let config = BlockConfig::from_toml(
///     r#"
///     cache_frames = 32
///     max_files = 16
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.cache_frames, 32);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    /// Frame cache capacity
    pub cache_frames: usize,
    /// Maximum number of files; frames `0..max_files` hold file metadata
    pub max_files: FrameIndex,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            cache_frames: DEFAULT_CACHE_CAPACITY,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl BlockConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache_config().validate()?;
        if self.max_files == 0 {
            return Err(ConfigError::Invalid(
                "max_files must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate against a device of `frame_count` frames
    ///
    /// The device needs at least one data frame past the metadata area.
    pub fn validate_for(&self, frame_count: FrameIndex) -> Result<(), ConfigError> {
        self.validate()?;
        if frame_count <= self.max_files {
            return Err(ConfigError::Invalid(format!(
                "device has {} frames, metadata alone needs {}",
                frame_count, self.max_files
            )));
        }
        Ok(())
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::with_capacity(self.cache_frames)
    }

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BlockConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_config().capacity, DEFAULT_CACHE_CAPACITY);
    }

    #[test]
    fn test_partial_toml() {
        let config = BlockConfig::from_toml("max_files = 4").unwrap();
        assert_eq!(config.max_files, 4);
        assert_eq!(config.cache_frames, DEFAULT_CACHE_CAPACITY);
        assert_eq!(BlockConfig::from_toml(&config.to_toml().unwrap()).unwrap(), config);
    }

    #[test]
    fn test_invalid_values() {
        assert!(BlockConfig::from_toml("cache_frames = 0").is_err());
        assert!(BlockConfig::from_toml("max_files = 0").is_err());
    }

    #[test]
    fn test_device_must_exceed_metadata_area() {
        let config = BlockConfig {
            cache_frames: 4,
            max_files: 8,
        };
        assert!(config.validate_for(8).is_err());
        assert!(config.validate_for(9).is_ok());
    }
}
