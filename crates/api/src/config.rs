use anyhow::{Context, Result};
use extract::{ExtractionConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONFIG_ENV: &str = "KG_CONFIG";
pub const API_KEY_ENV: &str = "LLM_API_KEY";
const DEFAULT_CONFIG_PATH: &str = "config.toml";
const MIN_ATTEMPT_SECS: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub llm: LlmConfig,
    pub extraction: ExtractionConfig,
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub neo4j: Neo4jConfig,
    pub query: QueryConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,      // More parallel calls, shorter timeouts, fewer retries
    Accurate,  // Sequential-ish, long timeouts, patient retries
    Balanced,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Any OpenAI-compatible `/chat/completions` endpoint.
    OpenAi,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub base_url: String,
    pub model: String,
    /// Prefer the `LLM_API_KEY` environment variable over writing the key here.
    pub api_key: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub documents_dir: PathBuf,
    pub graphs_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    pub enabled: bool,
    pub uri: String,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_max_results: usize,
    pub history_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: LlmProvider::OpenAi,
            base_url: "https://api.deepseek.com/v1".to_string(),
            model: "deepseek-chat".to_string(),
            api_key: None,
            request_timeout_secs: 120,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10000,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            documents_dir: PathBuf::from("data/documents"),
            graphs_dir: PathBuf::from("data/graphs"),
        }
    }
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "neo4j".to_string(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_max_results: 10,
            history_limit: query::service::DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            llm: LlmConfig::default(),
            extraction: ExtractionConfig::default(),
            retry: RetryConfig::default(),
            storage: StorageConfig::default(),
            neo4j: Neo4jConfig::default(),
            query: QueryConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        if self.max_retries == 0 {
            return RetryPolicy::none();
        }
        RetryPolicy::new(self.max_retries, self.initial_backoff_ms, self.max_backoff_ms)
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        Self {
            mode: OperationMode::Fast,
            extraction: ExtractionConfig {
                max_concurrency: 10,
                timeout_secs: 60,
                ..ExtractionConfig::default()
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 500,
                max_backoff_ms: 5000,
            },
            ..Self::default()
        }
    }

    pub fn accurate_mode() -> Self {
        Self {
            mode: OperationMode::Accurate,
            extraction: ExtractionConfig {
                max_concurrency: 2,
                timeout_secs: 300,
                temperature: 0.0,
                ..ExtractionConfig::default()
            },
            retry: RetryConfig {
                max_retries: 5,
                initial_backoff_ms: 2000,
                max_backoff_ms: 20000,
            },
            ..Self::default()
        }
    }

    pub fn preset(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
            OperationMode::Balanced => Self::default(),
        }
    }

    /// Settings written in the file are laid over the preset named by `mode`.
    pub fn from_toml(text: &str) -> Result<Self> {
        let overrides: toml::Table = toml::from_str(text).context("Failed to parse configuration")?;
        let mode = match overrides.get("mode") {
            Some(value) => value
                .clone()
                .try_into::<OperationMode>()
                .context("Invalid mode")?,
            None => OperationMode::Balanced,
        };

        let mut merged = match toml::Value::try_from(Self::preset(mode)).context("Failed to encode preset")? {
            toml::Value::Table(table) => table,
            _ => anyhow::bail!("Preset did not encode to a table"),
        };
        overlay(&mut merged, overrides);

        let config: Self = toml::Value::Table(merged)
            .try_into()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// HTTP timeout for one LLM attempt. `extraction.timeout_secs` bounds the
    /// whole call, so the attempts and the backoff between them share it.
    pub fn attempt_timeout(&self) -> Duration {
        let policy = self.retry.policy();
        let budget = Duration::from_secs(self.extraction.timeout_secs).saturating_sub(policy.total_backoff());
        let share = (budget.as_secs() / policy.max_attempts() as u64).max(MIN_ATTEMPT_SECS);
        Duration::from_secs(share.min(self.llm.request_timeout_secs))
    }

    /// Read the file named by `KG_CONFIG` (default `config.toml`). A missing
    /// default file yields the built-in defaults; a missing explicit file is
    /// an error.
    pub fn load() -> Result<Self> {
        let explicit = std::env::var(CONFIG_ENV).ok();
        let path = PathBuf::from(explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH));

        let mut config = if explicit.is_none() && !path.exists() {
            info!("No config.toml found, using defaults");
            Self::default()
        } else {
            Self::read(&path)?
        };

        if let Ok(key) = std::env::var(API_KEY_ENV) {
            config.llm.api_key = Some(key);
        }
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        info!(path = %path.display(), mode = ?config.mode, "Configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.extraction.validate()?;
        if self.query.default_max_results == 0 {
            anyhow::bail!("query.default_max_results must be positive");
        }
        Ok(())
    }
}

fn overlay(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match value {
            toml::Value::Table(inner) => {
                if let Some(toml::Value::Table(existing)) = base.get_mut(&key) {
                    overlay(existing, inner);
                } else {
                    base.insert(key, toml::Value::Table(inner));
                }
            }
            other => {
                base.insert(key, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for config in [AppConfig::default(), AppConfig::fast_mode(), AppConfig::accurate_mode()] {
            config.validate().unwrap();
        }
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config = AppConfig::from_toml(
            r#"
mode = "fast"

[llm]
provider = "ollama"
base_url = "http://localhost:11434"
model = "llama3"

[extraction]
max_concurrency = 5

[neo4j]
enabled = true
"#,
        )
        .unwrap();

        assert_eq!(config.mode, OperationMode::Fast);
        assert_eq!(config.llm.provider, LlmProvider::Ollama);
        assert_eq!(config.extraction.max_concurrency, 5);
        assert_eq!(config.extraction.timeout_secs, 60);
        assert_eq!(config.retry.max_retries, 2);
        assert!(config.neo4j.enabled);
        assert_eq!(config.neo4j.user, "neo4j");
        assert_eq!(config.server.bind, "0.0.0.0:3000");
    }

    #[test]
    fn invalid_extraction_settings_are_rejected() {
        let err = AppConfig::from_toml("[extraction]\nmax_concurrency = 50\n").unwrap_err();
        assert!(format!("{err:#}").contains("max_concurrency"));
    }

    #[test]
    fn mode_selects_preset_and_file_values_win() {
        let config = AppConfig::from_toml("mode = \"accurate\"\n").unwrap();
        assert_eq!(config.mode, OperationMode::Accurate);
        assert_eq!(config.extraction.timeout_secs, 300);
        assert_eq!(config.extraction.temperature, 0.0);
        assert_eq!(config.retry.max_retries, 5);

        let config = AppConfig::from_toml(
            "mode = \"accurate\"\n[retry]\nmax_retries = 1\n[extraction]\ntemperature = 0.5\n",
        )
        .unwrap();
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.initial_backoff_ms, 2000);
        assert_eq!(config.extraction.temperature, 0.5);
        assert_eq!(config.extraction.timeout_secs, 300);

        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.mode, OperationMode::Balanced);
        assert_eq!(config.extraction.timeout_secs, 120);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(AppConfig::from_toml("mode = \"turbo\"\n").is_err());
    }

    #[test]
    fn attempts_and_backoff_fit_inside_the_extraction_timeout() {
        let config = AppConfig::default();
        // 120s minus 1s + 2s + 4s of backoff, over four attempts.
        assert_eq!(config.attempt_timeout(), Duration::from_secs(28));
        let policy = config.retry.policy();
        let worst = config.attempt_timeout() * policy.max_attempts() as u32 + policy.total_backoff();
        assert!(worst <= Duration::from_secs(config.extraction.timeout_secs));

        let mut single = AppConfig::default();
        single.retry.max_retries = 0;
        single.llm.request_timeout_secs = 45;
        assert_eq!(single.retry.policy().max_attempts(), 1);
        assert_eq!(single.attempt_timeout(), Duration::from_secs(45));
    }
}
