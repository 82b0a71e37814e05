//! Configuration loader and validator for the quote→web-story pipeline.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub scrape: Scrape,
    pub batch_api: BatchApi,
    pub storage: Storage,
    pub images: Images,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Directory for generated JSONL job payloads.
    pub artifact_dir: String,
    /// Max tracker rows examined per poll invocation.
    pub poll_batch_limit: u32,
}

/// Scrape target settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scrape {
    pub base_url: String,
    /// Page links pulled from the work queue per run.
    pub pages_per_run: u32,
    /// Paginated pages walked per slug before giving up.
    pub max_pages_per_slug: u32,
    pub page_delay_ms: u64,
    pub request_timeout_secs: u64,
}

/// External LLM batch endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchApi {
    pub endpoint: String,
    pub api_key: String,
    pub api_version: String,
    pub deployment: String,
}

/// Object storage and CDN settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Storage {
    pub upload_base_url: String,
    pub bucket: String,
    pub key_prefix: String,
    pub cdn_base_url: String,
    pub media_base_url: String,
}

/// Author image lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Images {
    pub search_url: String,
    pub per_author: u32,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` and
    /// `app.artifact_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if !self.app.data_dir.trim().is_empty() {
            fs::create_dir_all(&self.app.data_dir)?;
        }
        if !self.app.artifact_dir.trim().is_empty() {
            fs::create_dir_all(&self.app.artifact_dir)?;
        }
        Ok(())
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.artifact_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.artifact_dir must be non-empty"));
    }
    if cfg.app.poll_batch_limit == 0 {
        return Err(ConfigError::Invalid("app.poll_batch_limit must be > 0"));
    }

    if cfg.scrape.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("scrape.base_url must be non-empty"));
    }
    if cfg.scrape.pages_per_run == 0 {
        return Err(ConfigError::Invalid("scrape.pages_per_run must be > 0"));
    }
    if cfg.scrape.max_pages_per_slug == 0 {
        return Err(ConfigError::Invalid("scrape.max_pages_per_slug must be > 0"));
    }
    if cfg.scrape.request_timeout_secs == 0 {
        return Err(ConfigError::Invalid("scrape.request_timeout_secs must be > 0"));
    }

    if cfg.batch_api.endpoint.trim().is_empty() {
        return Err(ConfigError::Invalid("batch_api.endpoint must be non-empty"));
    }
    if cfg.batch_api.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("batch_api.api_key must be non-empty"));
    }
    if cfg.batch_api.api_version.trim().is_empty() {
        return Err(ConfigError::Invalid("batch_api.api_version must be non-empty"));
    }
    if cfg.batch_api.deployment.trim().is_empty() {
        return Err(ConfigError::Invalid("batch_api.deployment must be non-empty"));
    }

    if cfg.storage.upload_base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.upload_base_url must be non-empty"));
    }
    if cfg.storage.bucket.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.bucket must be non-empty"));
    }
    if cfg.storage.cdn_base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.cdn_base_url must be non-empty"));
    }
    if cfg.storage.media_base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("storage.media_base_url must be non-empty"));
    }

    if cfg.images.search_url.trim().is_empty() {
        return Err(ConfigError::Invalid("images.search_url must be non-empty"));
    }
    if cfg.images.per_author == 0 {
        return Err(ConfigError::Invalid("images.per_author must be > 0"));
    }

    Ok(())
}

/// Returns a complete example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  artifact_dir: "./data/batches"
  poll_batch_limit: 15

scrape:
  base_url: "https://quotefancy.com"
  pages_per_run: 15
  max_pages_per_slug: 10
  page_delay_ms: 1000
  request_timeout_secs: 10

batch_api:
  endpoint: "https://YOUR-RESOURCE.openai.azure.com"
  api_key: "YOUR_BATCH_API_KEY"
  api_version: "2025-03-01-preview"
  deployment: "gpt-4o-global-batch"

storage:
  upload_base_url: "https://upload.suvichaar.org/suvichaarapp"
  bucket: "suvichaarapp"
  key_prefix: "media/"
  cdn_base_url: "https://cdn.suvichaar.org/"
  media_base_url: "https://media.suvichaar.org/"

images:
  search_url: "https://images.suvichaar.org/search"
  per_author: 15
"#
}
