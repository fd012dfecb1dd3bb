//! Tunables for the generation core.
//!
//! Retry count, delay, and prompt sizes are small bounded knobs, not load-bearing
//! constants. Every field has a default so partial JSON files work.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per request, first one included.
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            retry_delay_ms: 500,
        }
    }
}

impl RetryPolicy {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptConfig {
    /// Parameter names listed in the prompt for the selected region.
    pub max_candidates: usize,
    /// Non-neutral current values echoed back to the model.
    pub max_shown_params: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_candidates: 24,
            max_shown_params: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Characters after a parameter name searched for its number in prose.
    pub proximity_window: usize,
    /// Nested object levels flattened when reading JSON.
    pub max_nesting: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            proximity_window: 24,
            max_nesting: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub retry: RetryPolicy,
    pub prompt: PromptConfig,
    pub extraction: ExtractionConfig,
    pub max_tokens: u32,
    /// Skip the model entirely and use the keyword fallback.
    pub offline: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            prompt: PromptConfig::default(),
            extraction: ExtractionConfig::default(),
            max_tokens: 256,
            offline: false,
        }
    }
}

impl CoreConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            tracing::error!("retry.max_attempts must be at least 1");
            return Err(ConfigError::ZeroAttempts);
        }
        if self.prompt.max_candidates == 0 {
            tracing::error!("prompt.max_candidates must be at least 1");
            return Err(ConfigError::ZeroCandidates);
        }
        if self.extraction.proximity_window == 0 {
            tracing::error!("extraction.proximity_window must be at least 1");
            return Err(ConfigError::ZeroWindow);
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::ZeroTokens);
        }
        if self.retry.retry_delay_ms > 10_000 {
            tracing::warn!(
                retry_delay_ms = self.retry.retry_delay_ms,
                "unusually long retry delay"
            );
        }
        Ok(())
    }
}

/// Load and validate a config file.
pub fn load_config(path: impl AsRef<Path>) -> anyhow::Result<CoreConfig> {
    let path = path.as_ref();
    let data =
        fs::read_to_string(path).with_context(|| format!("read config file: {}", path.display()))?;
    let config = CoreConfig::from_json_str(&data)
        .with_context(|| format!("parse config file: {}", path.display()))?;
    Ok(config)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("retry.max_attempts must be at least 1")]
    ZeroAttempts,

    #[error("prompt.max_candidates must be at least 1")]
    ZeroCandidates,

    #[error("extraction.proximity_window must be at least 1")]
    ZeroWindow,

    #[error("max_tokens must be at least 1")]
    ZeroTokens,

    #[error("invalid config json: {0}")]
    Parse(#[from] serde_json::Error),
}
