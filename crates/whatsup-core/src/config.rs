//! Whatsup configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, WhatsupError};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WhatsupConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub search: SearchConfig,
}

impl WhatsupConfig {
    /// Load config from the default path (~/.whatsup/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WhatsupError::Config(format!("Failed to read config: {e}")))?;
        tracing::debug!("Loading config from {}", path.display());
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| WhatsupError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.general.nthreads == 0 {
            return Err(WhatsupError::Config("general.nthreads must be at least 1".into()));
        }
        if self.general.due_limit == 0 {
            return Err(WhatsupError::Config("general.due_limit must be at least 1".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Whatsup home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".whatsup")
    }
}

/// Engine tuning: worker count, timers, thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// SQLite database path (`~` is expanded).
    #[serde(default = "default_db")]
    pub db: String,
    /// Fetch worker count.
    #[serde(default = "default_nthreads")]
    pub nthreads: usize,
    /// Minutes before a checked watch becomes due again.
    #[serde(default = "default_watch_freq")]
    pub watch_freq: u64,
    #[serde(default = "default_loop_sleep_ms")]
    pub loop_sleep_ms: u64,
    #[serde(default = "default_interval_secs")]
    pub scheduler_interval_secs: u64,
    #[serde(default = "default_interval_secs")]
    pub presence_interval_secs: u64,
    #[serde(default = "default_fault_backoff_secs")]
    pub fault_backoff_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Hard cap on watches selected per scheduler cycle.
    #[serde(default = "default_due_limit")]
    pub due_limit: usize,
}

fn default_db() -> String { "~/.whatsup/whatsup.db".into() }
fn default_nthreads() -> usize { 1 }
fn default_watch_freq() -> u64 { 10 }
fn default_loop_sleep_ms() -> u64 { 1000 }
fn default_interval_secs() -> u64 { 60 }
fn default_fault_backoff_secs() -> u64 { 5 }
fn default_probe_timeout_secs() -> u64 { 10 }
fn default_due_limit() -> usize { 50 }

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            db: default_db(),
            nthreads: default_nthreads(),
            watch_freq: default_watch_freq(),
            loop_sleep_ms: default_loop_sleep_ms(),
            scheduler_interval_secs: default_interval_secs(),
            presence_interval_secs: default_interval_secs(),
            fault_backoff_secs: default_fault_backoff_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            due_limit: default_due_limit(),
        }
    }
}

impl GeneralConfig {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db).to_string())
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.watch_freq as i64)
    }

    pub fn loop_sleep(&self) -> Duration {
        Duration::from_millis(self.loop_sleep_ms)
    }

    pub fn scheduler_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler_interval_secs)
    }

    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_secs)
    }

    pub fn fault_backoff(&self) -> Duration {
        Duration::from_secs(self.fault_backoff_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Chat transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// "console" or "memory".
    #[serde(default = "default_transport_kind")]
    pub kind: String,
    /// The bot's own address.
    #[serde(default = "default_jid")]
    pub jid: String,
    #[serde(default)]
    pub password: String,
    /// Priority attached to presence updates.
    #[serde(default = "default_priority")]
    pub priority: i8,
    /// Addresses told about every new subscriber.
    #[serde(default)]
    pub admins: Vec<String>,
}

fn default_transport_kind() -> String { "console".into() }
fn default_jid() -> String { "whatsup@localhost".into() }
fn default_priority() -> i8 { 1 }

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: default_transport_kind(),
            jid: default_jid(),
            password: String::new(),
            priority: default_priority(),
            admins: Vec::new(),
        }
    }
}

/// Web search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize { 5 }

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_results: default_max_results(),
        }
    }
}
