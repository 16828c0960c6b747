//! Configuration module for Faultline.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation and defaults. The config is constructed
//! once at host startup and handed to each component explicitly; nothing in
//! the pipeline reaches for ambient global state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the telemetry agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Master switch; when false the interceptor persists nothing and the
    /// delivery worker never runs.
    pub enabled: bool,
    /// Root directory for the durable record queue.
    pub data_dir: PathBuf,
    pub collector: CollectorConfig,
    pub worker: WorkerConfig,
}

/// Remote collector endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Base URL of the collector; submissions are declined while empty.
    pub base_url: String,
    /// Client identifier sent as a request header; submissions are declined
    /// while empty.
    pub client_id: String,
    /// Connect timeout for collector calls, in seconds.
    pub timeout_secs: u64,
}

/// Delivery worker and crash-handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Cool-down window for SDK-internal crash loops, in seconds.
    pub crash_loop_cooldown_secs: u64,
    /// Interval the host scheduler is asked to trigger delivery at, in
    /// seconds.
    pub periodic_interval_secs: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            client_id: String::new(),
            timeout_secs: 30,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            crash_loop_cooldown_secs: 5,
            periodic_interval_secs: 20 * 60,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// A config enabled out of the box, rooted at the platform data dir.
    pub fn enabled_with_defaults() -> Self {
        Self {
            enabled: true,
            data_dir: Self::default_data_dir(),
            ..Self::default()
        }
    }

    /// Returns the default queue root (`~/.local/share/faultline`).
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("faultline")
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.enabled && self.data_dir.as_os_str().is_empty() {
            anyhow::bail!("data_dir must be set when the agent is enabled");
        }
        if !self.collector.base_url.is_empty()
            && !self.collector.base_url.starts_with("http://")
            && !self.collector.base_url.starts_with("https://")
        {
            anyhow::bail!(
                "collector.base_url must be an http(s) URL, got '{}'",
                self.collector.base_url
            );
        }
        if self.collector.timeout_secs == 0 {
            anyhow::bail!("collector.timeout_secs must be greater than zero");
        }
        if self.worker.periodic_interval_secs == 0 {
            anyhow::bail!("worker.periodic_interval_secs must be greater than zero");
        }
        Ok(())
    }
}

impl CollectorConfig {
    /// Connect timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl WorkerConfig {
    /// Crash-loop cool-down as a [`Duration`].
    pub fn crash_loop_cooldown(&self) -> Duration {
        Duration::from_secs(self.crash_loop_cooldown_secs)
    }

    /// Periodic trigger interval as a [`Duration`].
    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }
}
