use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for both ergopulse roles.
///
/// Every field has a default, so a missing config file yields a usable
/// local setup.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// Aggregation service configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Outbox processor configuration.
    #[serde(default)]
    pub outbox: OutboxConfig,
}

/// Aggregation service listener configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Listen address; ":port" shorthand binds all interfaces. Default: ":8080".
    #[serde(default = "default_listen")]
    pub listen: String,
}

/// Counter store configuration.
#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. The default honors the `DB_PATH` environment
    /// variable and falls back to `counts.db`; an explicit config value
    /// wins over both.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

/// Outbox processor configuration.
#[derive(Debug, Deserialize)]
pub struct OutboxConfig {
    /// Directory holding the `incoming/`, `sent/`, and `failed/` siblings.
    /// The processor expects all three to exist. Default: current directory.
    #[serde(default = "default_outbox_dir")]
    pub dir: PathBuf,

    /// Upload endpoint of the aggregation service.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Per-upload timeout. Default: 5s.
    #[serde(default = "default_upload_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

impl OutboxConfig {
    pub fn incoming(&self) -> PathBuf {
        self.dir.join("incoming")
    }

    pub fn sent(&self) -> PathBuf {
        self.dir.join("sent")
    }

    pub fn failed(&self) -> PathBuf {
        self.dir.join("failed")
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_listen() -> String {
    ":8080".to_string()
}

fn default_store_path() -> PathBuf {
    std::env::var_os("DB_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("counts.db"))
}

fn default_outbox_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8080/upload".to_string()
}

fn default_upload_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            dir: default_outbox_dir(),
            endpoint: default_endpoint(),
            timeout: default_upload_timeout(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            outbox: OutboxConfig::default(),
        }
    }
}

impl Config {
    /// Loads and validates a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Loads the given file, or falls back to defaults when none is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.server.listen.is_empty() {
            bail!("server.listen must not be empty");
        }

        if self.store.path.as_os_str().is_empty() {
            bail!("store.path must not be empty");
        }

        if self.outbox.endpoint.is_empty() {
            bail!("outbox.endpoint must not be empty");
        }

        if self.outbox.timeout.is_zero() {
            bail!("outbox.timeout must be positive");
        }

        Ok(())
    }
}
