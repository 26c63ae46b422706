use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_CONCURRENCY: usize = 1;
pub const MAX_CONCURRENCY: usize = 10;

#[derive(Debug, Error)]
#[error("invalid extraction config: {0}")]
pub struct ConfigError(pub String);

/// Settings handed to [`crate::Extractor`] at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_concurrency: usize,
    /// Upper bound on the LLM call for one document, transport retries
    /// included, in seconds.
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Replaces the built-in instruction header of the extraction prompt.
    pub custom_prompt: Option<String>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            timeout_secs: 120,
            temperature: 0.2,
            max_tokens: Some(4000),
            custom_prompt: None,
        }
    }
}

impl ExtractionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.max_concurrency) {
            return Err(ConfigError(format!(
                "max_concurrency must be in {MIN_CONCURRENCY}..={MAX_CONCURRENCY}, got {}",
                self.max_concurrency
            )));
        }
        if !(30..=300).contains(&self.timeout_secs) {
            return Err(ConfigError(format!(
                "timeout_secs must be in 30..=300, got {}",
                self.timeout_secs
            )));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError(format!(
                "temperature must be in 0.0..=2.0, got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}
