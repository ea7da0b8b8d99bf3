//! Engine configuration.

use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};

/// XP granted for each completed level unless configured otherwise.
pub const DEFAULT_LEVEL_REWARD: u64 = 100;

/// Configuration for the progression engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// XP awarded per completed level
    pub level_reward: u64,
    /// Attempts at a contended write before reporting `Conflict`
    pub max_conflict_retries: u32,
    /// Upper bound on a single store call, in milliseconds
    pub store_timeout_ms: u64,
    /// Title of the level every new goal starts with
    pub seed_level_title: String,
    /// Description of the level every new goal starts with
    pub seed_level_description: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            level_reward: DEFAULT_LEVEL_REWARD,
            max_conflict_retries: 3,
            store_timeout_ms: 5_000,
            seed_level_title: "Level 1".to_string(),
            seed_level_description: "Get started on your journey!".to_string(),
        }
    }
}

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid JSON for this config
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is out of range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl EngineConfig {
    /// Load a JSON config file. Missing keys fall back to defaults.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = tokio::fs::read_to_string(path.as_ref()).await?;
        let config: EngineConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.level_reward == 0 {
            return Err(ConfigError::Invalid("level_reward must be positive".to_string()));
        }
        if self.max_conflict_retries == 0 {
            return Err(ConfigError::Invalid("max_conflict_retries must be at least 1".to_string()));
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::Invalid("store_timeout_ms must be positive".to_string()));
        }
        if self.seed_level_title.trim().is_empty() {
            return Err(ConfigError::Invalid("seed_level_title must not be empty".to_string()));
        }
        Ok(())
    }

    /// Store call timeout as a duration.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_reward() {
        let config = EngineConfig::default();
        assert_eq!(config.level_reward, 100);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        tokio::fs::write(&path, r#"{ "level_reward": 250 }"#).await.unwrap();

        let config = EngineConfig::load(&path).await.unwrap();
        assert_eq!(config.level_reward, 250);
        assert_eq!(config.max_conflict_retries, 3);
        assert_eq!(config.seed_level_title, "Level 1");
    }

    #[tokio::test]
    async fn test_load_rejects_zero_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        tokio::fs::write(&path, r#"{ "max_conflict_retries": 0 }"#).await.unwrap();

        let err = EngineConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
