use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    #[default]
    File,
    Dummy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_subscriptions_path")]
    pub subscriptions_path: String,

    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default = "default_cache_expire_days")]
    pub cache_expire_days: u32,

    /// Zero or negative means the run is not time-bounded.
    #[serde(default)]
    pub max_run_seconds: i64,

    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    pub item_pool_size: Option<usize>,

    #[serde(default)]
    pub enable_enrichment: bool,

    #[serde(default)]
    pub handler: HandlerKind,

    #[serde(default = "default_feed_connect_timeout_ms")]
    pub feed_connect_timeout_ms: u64,

    #[serde(default = "default_feed_read_timeout_ms")]
    pub feed_read_timeout_ms: u64,

    #[serde(default = "default_page_timeout_secs")]
    pub page_timeout_secs: u64,

    pub text_template: Option<String>,
    pub html_template: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn data_dir() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("feed-courier");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir
}

fn default_subscriptions_path() -> String {
    Config::config_dir()
        .join("subscriptions.opml")
        .to_string_lossy()
        .to_string()
}

fn default_snapshot_path() -> String {
    data_dir().join("feeds.json").to_string_lossy().to_string()
}

fn default_output_dir() -> String {
    data_dir().join("items").to_string_lossy().to_string()
}

fn default_cache_expire_days() -> u32 {
    3
}

fn default_worker_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_feed_connect_timeout_ms() -> u64 {
    30_000
}

fn default_feed_read_timeout_ms() -> u64 {
    15_000
}

fn default_page_timeout_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            subscriptions_path: default_subscriptions_path(),
            snapshot_path: default_snapshot_path(),
            output_dir: default_output_dir(),
            cache_expire_days: default_cache_expire_days(),
            max_run_seconds: 0,
            worker_pool_size: default_worker_pool_size(),
            item_pool_size: None,
            enable_enrichment: false,
            handler: HandlerKind::File,
            feed_connect_timeout_ms: default_feed_connect_timeout_ms(),
            feed_read_timeout_ms: default_feed_read_timeout_ms(),
            page_timeout_secs: default_page_timeout_secs(),
            text_template: None,
            html_template: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Loads the config from `path`, or from the default location when `None`.
    /// A missing default config is written out with default values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else if path.is_some() {
            return Err(AppError::Config(format!(
                "config file {} does not exist",
                config_path.display()
            )));
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_pool_size == 0 {
            return Err(AppError::Config(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.item_pool_size == Some(0) {
            return Err(AppError::Config(
                "item_pool_size must be at least 1".to_string(),
            ));
        }
        if chrono::Utc::now().checked_sub_signed(self.cache_expiry()).is_none() {
            return Err(AppError::Config(format!(
                "cache_expire_days = {} reaches past the earliest representable date",
                self.cache_expire_days
            )));
        }
        for (key, value) in [
            ("subscriptions_path", &self.subscriptions_path),
            ("snapshot_path", &self.snapshot_path),
            ("output_dir", &self.output_dir),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Config(format!("{} must not be empty", key)));
            }
        }
        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("feed-courier")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Items absent from a fetch are dropped once last seen before `now - cache_expiry()`.
    pub fn cache_expiry(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.cache_expire_days))
    }

    pub fn max_run_duration(&self) -> Option<Duration> {
        (self.max_run_seconds > 0).then(|| Duration::from_secs(self.max_run_seconds as u64))
    }

    pub fn item_pool_size(&self) -> usize {
        self.item_pool_size.unwrap_or(self.worker_pool_size)
    }
}
