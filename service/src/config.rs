use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_aux::prelude::{deserialize_number_from_string, deserialize_vec_from_string_or_vec};

use crate::endpoints::EndpointCatalog;
use crate::http::RetryPolicy;

/// Largest `limit` the Congress.gov list endpoints accept.
pub const MAX_PAGE_SIZE: u32 = 250;

/// Application configuration loaded from multiple sources.
///
/// Configuration is loaded in priority order (lowest to highest):
/// 1. Struct defaults
/// 2. config.yaml file (if exists)
/// 3. Environment variables with `CSYNC_` prefix (always wins)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub api: ApiConfig,
    pub sync: SyncConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    /// Congress.gov API key (required, no compiled-in default).
    #[serde(default)]
    pub key: String,

    /// Base URL every endpoint path is joined onto.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Records requested per list page, shared by every endpoint.
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Client-side request budget. Congress.gov keys allow 5,000 requests per hour.
    #[serde(default = "default_requests_per_hour")]
    pub requests_per_hour: u32,
}

/// What to do with the congress that is still in session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CurrentCongressPolicy {
    /// Keep walking from the stored cursor; a finished cursor stays finished.
    #[default]
    Resume,
    /// Reset finished cursors at the start of each run and fetch records updated since
    /// the endpoint's last sync.
    Refresh,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// First congress to sync. Accepts `118` or `"118"`.
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub starting_congress_number: u32,

    /// Congress currently in session. Derived from today's date when unset.
    #[serde(default)]
    pub current_congress: Option<u32>,

    #[serde(default)]
    pub current_congress_policy: CurrentCongressPolicy,

    /// Maximum endpoint drivers running at once.
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,

    /// Maximum detail requests in flight for a single page.
    #[serde(default = "default_detail_concurrency")]
    pub detail_concurrency: usize,

    /// Endpoints to sync. Empty means every known endpoint.
    /// Accepts either an array or comma-separated string.
    #[serde(default, deserialize_with = "deserialize_endpoint_names")]
    pub endpoints: Vec<String>,
}

/// Deserialize endpoint names from comma-separated string or array, filtering empty values.
fn deserialize_endpoint_names<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let names: Vec<String> = deserialize_vec_from_string_or_vec(deserializer)?;
    Ok(names
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Total attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles on each further attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on a single backoff delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Random extra delay added to each backoff, up to this many milliseconds.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl RetryConfig {
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    /// Checkpoint file location.
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Directory receiving one `<table>.jsonl` file per table.
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level filter (debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_base_url() -> String {
    "https://api.congress.gov/v3/".to_string()
}

// These functions cannot be const because serde uses function pointers for defaults
#[allow(clippy::missing_const_for_fn)]
fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

#[allow(clippy::missing_const_for_fn)]
fn default_timeout_secs() -> u64 {
    30
}

#[allow(clippy::missing_const_for_fn)]
fn default_requests_per_hour() -> u32 {
    5_000
}

#[allow(clippy::missing_const_for_fn)]
fn default_worker_limit() -> usize {
    4
}

#[allow(clippy::missing_const_for_fn)]
fn default_detail_concurrency() -> usize {
    8
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_attempts() -> u32 {
    4
}

#[allow(clippy::missing_const_for_fn)]
fn default_base_delay_ms() -> u64 {
    500
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_delay_ms() -> u64 {
    30_000
}

#[allow(clippy::missing_const_for_fn)]
fn default_jitter_ms() -> u64 {
    250
}

fn default_state_path() -> PathBuf {
    PathBuf::from("congress-sync-state.json")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: ApiConfig {
                key: String::new(),
                base_url: default_base_url(),
                page_size: default_page_size(),
                timeout_secs: default_timeout_secs(),
                requests_per_hour: default_requests_per_hour(),
            },
            sync: SyncConfig {
                starting_congress_number: 0,
                current_congress: None,
                current_congress_policy: CurrentCongressPolicy::default(),
                worker_limit: default_worker_limit(),
                detail_concurrency: default_detail_concurrency(),
                endpoints: Vec::new(),
            },
            retry: RetryConfig::default(),
            state: StateConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig {
                level: default_log_level(),
            },
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Sources are merged in priority order:
    /// 1. Struct defaults (lowest)
    /// 2. config.yaml file (if exists)
    /// 3. Environment variables with `CSYNC_` prefix (highest)
    ///
    /// # Errors
    /// Returns an error if configuration cannot be loaded or is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config.yaml")
    }

    /// Load configuration with a custom YAML file path.
    ///
    /// # Errors
    /// Returns an error if configuration cannot be loaded or is invalid.
    pub fn load_from(yaml_path: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Yaml::file(yaml_path))
            .merge(Env::prefixed("CSYNC_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.key.trim().is_empty() {
            return Err(ConfigError::Validation(
                "api.key is required. Set CSYNC_API__KEY environment variable or configure in config.yaml.".into(),
            ));
        }

        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(ConfigError::Validation(format!(
                "api.base_url must start with http:// or https://, got: '{}'",
                self.api.base_url
            )));
        }

        if self.api.page_size == 0 || self.api.page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Validation(format!(
                "api.page_size must be between 1 and {MAX_PAGE_SIZE}, got: {}",
                self.api.page_size
            )));
        }

        if self.api.requests_per_hour == 0 {
            return Err(ConfigError::Validation(
                "api.requests_per_hour cannot be 0".into(),
            ));
        }

        if self.sync.starting_congress_number == 0 {
            return Err(ConfigError::Validation(
                "sync.starting_congress_number is required. Set CSYNC_SYNC__STARTING_CONGRESS_NUMBER or configure in config.yaml.".into(),
            ));
        }

        if let Some(current) = self.sync.current_congress {
            if current < self.sync.starting_congress_number {
                return Err(ConfigError::Validation(format!(
                    "sync.current_congress ({current}) is before sync.starting_congress_number ({})",
                    self.sync.starting_congress_number
                )));
            }
        }

        if self.sync.worker_limit == 0 {
            return Err(ConfigError::Validation(
                "sync.worker_limit cannot be 0".into(),
            ));
        }

        if self.sync.detail_concurrency == 0 {
            return Err(ConfigError::Validation(
                "sync.detail_concurrency cannot be 0".into(),
            ));
        }

        let catalog = EndpointCatalog::congress_gov();
        for name in &self.sync.endpoints {
            if catalog.get(name).is_none() {
                return Err(ConfigError::Validation(format!(
                    "sync.endpoints contains unknown endpoint '{name}'. Known endpoints: {}",
                    catalog.names().collect::<Vec<_>>().join(", ")
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry.max_attempts cannot be 0".into(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Validation(
                "retry.base_delay_ms cannot exceed retry.max_delay_ms".into(),
            ));
        }

        Ok(())
    }
}
