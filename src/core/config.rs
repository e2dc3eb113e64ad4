use crate::errors::{LocatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub driver: DriverConfig,
    pub engine: EngineConfig,
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub headless: bool,
    pub viewport: Viewport,
    pub user_agent: Option<String>,
    pub disable_images: bool,
    pub args: Vec<String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deepest frame level searched; level 0 holds the top document's children.
    pub max_frame_depth: usize,
    pub frame_cache_ttl_ms: u64,
    pub hint_ttl_ms: u64,
    pub text_preview_chars: usize,
    pub detail_text_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub batch_item_pause_ms: u64,
    pub validate_item_pause_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Config {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.engine.max_frame_depth > 32 {
            return Err(LocatorError::ConfigurationError(format!(
                "max_frame_depth {} exceeds 32",
                self.engine.max_frame_depth
            )));
        }
        if self.engine.frame_cache_ttl_ms == 0 {
            return Err(LocatorError::ConfigurationError(
                "frame_cache_ttl_ms must be positive".to_string(),
            ));
        }
        if self.driver.viewport.width == 0 || self.driver.viewport.height == 0 {
            return Err(LocatorError::ConfigurationError(
                "viewport dimensions must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl EngineConfig {
    pub fn frame_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.frame_cache_ttl_ms)
    }

    pub fn hint_ttl(&self) -> Duration {
        Duration::from_millis(self.hint_ttl_ms)
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport: Viewport::default(),
            user_agent: None,
            disable_images: false,
            args: vec![],
            timeout_ms: 30000,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_frame_depth: 5,
            frame_cache_ttl_ms: 2000,
            hint_ttl_ms: 2000,
            text_preview_chars: 50,
            detail_text_chars: 100,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_item_pause_ms: 10,
            validate_item_pause_ms: 100,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = Config::from_json_str(r#"{ "engine": { "max_frame_depth": 3 } }"#).unwrap();
        assert_eq!(config.engine.max_frame_depth, 3);
        assert_eq!(config.engine.frame_cache_ttl_ms, 2000);
        assert!(config.driver.headless);
    }

    #[test]
    fn test_zero_ttl_is_rejected() {
        let err = Config::from_json_str(r#"{ "engine": { "frame_cache_ttl_ms": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, LocatorError::ConfigurationError(_)));
    }

    #[test]
    fn test_malformed_json_is_serialization_error() {
        let err = Config::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, LocatorError::SerializationError(_)));
    }
}
