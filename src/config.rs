//! Configuration loader and validator for the tracking daemon and tools.
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub carrier: Carrier,
    #[serde(default)]
    pub tracking: Tracking,
    #[serde(default)]
    pub notifications: Notifications,
    #[serde(default)]
    pub email: Email,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub sync_interval_seconds: u64,
}

/// Carrier tracking API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Carrier {
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// Cache and batch-sync tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Tracking {
    pub cache_ttl_minutes: i64,
    pub sync_max_age_minutes: i64,
    pub sync_batch_limit: u32,
    pub sync_delay_ms: u64,
    pub sync_lookback_days: i64,
    pub sync_concurrency: usize,
    pub sync_max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Notifications {
    pub dedup_window_minutes: i64,
}

/// Optional email relay. Email is disabled when `relay_url` is absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Email {
    pub relay_url: Option<String>,
    pub api_key: Option<String>,
    pub from: Option<String>,
}

fn default_timeout_seconds() -> u64 {
    15
}

impl Default for Tracking {
    fn default() -> Self {
        Self {
            cache_ttl_minutes: 30,
            sync_max_age_minutes: 60,
            sync_batch_limit: 100,
            sync_delay_ms: 500,
            sync_lookback_days: 14,
            sync_concurrency: 1,
            sync_max_retries: 2,
        }
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self {
            dedup_window_minutes: 60,
        }
    }
}

impl Tracking {
    pub fn cache_ttl(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.cache_ttl_minutes)
    }

    pub fn sync_max_age(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.sync_max_age_minutes)
    }

    pub fn sync_lookback(&self) -> ChronoDuration {
        ChronoDuration::days(self.sync_lookback_days)
    }

    pub fn sync_delay(&self) -> Duration {
        Duration::from_millis(self.sync_delay_ms)
    }
}

impl Notifications {
    pub fn dedup_window(&self) -> ChronoDuration {
        ChronoDuration::minutes(self.dedup_window_minutes)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/shiptrack.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    validate(&cfg)?;
    Ok(cfg)
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { key, value })
}

/// Overlay tuning knobs from the environment. `lookup` is injected so tests do
/// not have to mutate the process environment.
pub fn apply_env_overrides<F>(cfg: &mut Config, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let t = &mut cfg.tracking;
    if let Some(v) = lookup("TRACKING_CACHE_TTL_MINUTES") {
        t.cache_ttl_minutes = parse_env("TRACKING_CACHE_TTL_MINUTES", v)?;
    }
    if let Some(v) = lookup("TRACKING_SYNC_MAX_AGE_MINUTES") {
        t.sync_max_age_minutes = parse_env("TRACKING_SYNC_MAX_AGE_MINUTES", v)?;
    }
    if let Some(v) = lookup("TRACKING_SYNC_BATCH_LIMIT") {
        t.sync_batch_limit = parse_env("TRACKING_SYNC_BATCH_LIMIT", v)?;
    }
    if let Some(v) = lookup("TRACKING_SYNC_DELAY_MS") {
        t.sync_delay_ms = parse_env("TRACKING_SYNC_DELAY_MS", v)?;
    }
    if let Some(v) = lookup("TRACKING_SYNC_LOOKBACK_DAYS") {
        t.sync_lookback_days = parse_env("TRACKING_SYNC_LOOKBACK_DAYS", v)?;
    }
    if let Some(v) = lookup("TRACKING_SYNC_CONCURRENCY") {
        t.sync_concurrency = parse_env("TRACKING_SYNC_CONCURRENCY", v)?;
    }
    if let Some(v) = lookup("TRACKING_SYNC_MAX_RETRIES") {
        t.sync_max_retries = parse_env("TRACKING_SYNC_MAX_RETRIES", v)?;
    }
    if let Some(v) = lookup("NOTIFICATION_DEDUP_WINDOW_MINUTES") {
        cfg.notifications.dedup_window_minutes =
            parse_env("NOTIFICATION_DEDUP_WINDOW_MINUTES", v)?;
    }
    if let Some(v) = lookup("CARRIER_API_KEY") {
        cfg.carrier.api_key = v;
    }
    Ok(())
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.sync_interval_seconds == 0 {
        return Err(ConfigError::Invalid("app.sync_interval_seconds must be > 0"));
    }

    if cfg.carrier.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("carrier.base_url must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.carrier.base_url).is_err() {
        return Err(ConfigError::Invalid("carrier.base_url must be a valid URL"));
    }
    if cfg.carrier.timeout_seconds == 0 {
        return Err(ConfigError::Invalid("carrier.timeout_seconds must be > 0"));
    }

    let t = &cfg.tracking;
    if t.cache_ttl_minutes < 0 {
        return Err(ConfigError::Invalid("tracking.cache_ttl_minutes must be >= 0"));
    }
    if t.sync_max_age_minutes < 0 {
        return Err(ConfigError::Invalid("tracking.sync_max_age_minutes must be >= 0"));
    }
    if t.sync_lookback_days <= 0 {
        return Err(ConfigError::Invalid("tracking.sync_lookback_days must be > 0"));
    }
    if t.sync_concurrency == 0 {
        return Err(ConfigError::Invalid("tracking.sync_concurrency must be > 0"));
    }

    if cfg.notifications.dedup_window_minutes <= 0 {
        return Err(ConfigError::Invalid(
            "notifications.dedup_window_minutes must be > 0",
        ));
    }

    if let Some(url) = cfg.email.relay_url.as_deref() {
        if reqwest::Url::parse(url).is_err() {
            return Err(ConfigError::Invalid("email.relay_url must be a valid URL"));
        }
    }

    Ok(())
}

/// Example configuration used by docs and tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  sync_interval_seconds: 900

carrier:
  base_url: "https://demo1.spedisci.online/api/v2/"
  api_key: "YOUR_SPEDISCI_ONLINE_API_KEY"
  timeout_seconds: 15

tracking:
  cache_ttl_minutes: 30
  sync_max_age_minutes: 60
  sync_batch_limit: 100
  sync_delay_ms: 500
  sync_lookback_days: 14
  sync_concurrency: 1
  sync_max_retries: 2

notifications:
  dedup_window_minutes: 60

email:
  relay_url: "https://mail-relay.internal/send"
  api_key: "YOUR_RELAY_KEY"
  from: "tracking@example.com"
"#
}
