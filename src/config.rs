//! Worker configuration
//!
//! [`WorkerConfig`] is the validated, immutable configuration a [`crate::Worker`]
//! is built from. [`Settings`] is the layered configuration used by the CLI:
//! an optional TOML file, `MPWORKER_*` environment variables, then explicit
//! overrides.
//!
//! # Example
//!
//! ```toml
//! [worker]
//! name = "ticker"
//! interval = "500ms"
//! first_run_immediate = false
//! ```

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, WorkerError};

/// Default config file searched in the working directory (any supported extension)
const DEFAULT_CONFIG_NAME: &str = "mpworker";

/// Prefix for environment overrides, e.g. `MPWORKER_WORKER__INTERVAL=2s`
const ENV_PREFIX: &str = "MPWORKER";

const DEFAULT_WORKER_NAME: &str = "mpworker";
const DEFAULT_INTERVAL: &str = "1s";

/// Validated configuration of a single worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    name: String,
    interval: Duration,
    first_run_immediate: bool,
}

impl WorkerConfig {
    /// Create a configuration that runs the first iteration immediately.
    pub fn new(name: impl Into<String>, interval: Duration) -> Result<Self> {
        let config = Self {
            name: name.into().trim().to_string(),
            interval,
            first_run_immediate: true,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_first_run_immediate(mut self, first_run_immediate: bool) -> Self {
        self.first_run_immediate = first_run_immediate;
        self
    }

    /// Name of the worker, also used for the execution context and log scope.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time between the end of one run and the start of the next.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn first_run_immediate(&self) -> bool {
        self.first_run_immediate
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(WorkerError::InvalidConfig(
                "worker name must not be empty".to_string(),
            ));
        }
        if self.interval.is_zero() {
            return Err(WorkerError::InvalidConfig(format!(
                "interval of worker {} must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

/// Parse a duration such as "250ms", "1s", "5m" or "1h".
pub fn parse_duration(duration_str: &str) -> anyhow::Result<Duration> {
    let duration_str = duration_str.trim();

    let parsed = if let Some(ms) = duration_str.strip_suffix("ms") {
        Duration::from_millis(ms.trim().parse()?)
    } else if let Some(secs) = duration_str.strip_suffix('s') {
        Duration::from_secs(secs.trim().parse()?)
    } else if let Some(mins) = duration_str.strip_suffix('m') {
        let mins: u64 = mins.trim().parse()?;
        Duration::from_secs(mins.saturating_mul(60))
    } else if let Some(hours) = duration_str.strip_suffix('h') {
        let hours: u64 = hours.trim().parse()?;
        Duration::from_secs(hours.saturating_mul(3600))
    } else {
        return Err(anyhow!(
            "Invalid duration '{}'. Use '500ms', '60s', '5m', etc.",
            duration_str
        ));
    };

    Ok(parsed)
}

/// Layered application settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub worker: WorkerSettings,
}

/// Worker section of [`Settings`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub name: String,

    /// Interval as a duration string ("500ms", "1s", "5m")
    pub interval: String,

    pub first_run_immediate: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_WORKER_NAME.to_string(),
            interval: DEFAULT_INTERVAL.to_string(),
            first_run_immediate: true,
        }
    }
}

impl WorkerSettings {
    /// Validate the section and turn it into a [`WorkerConfig`].
    pub fn worker_config(&self) -> anyhow::Result<WorkerConfig> {
        let interval = parse_duration(&self.interval)
            .with_context(|| format!("Invalid worker.interval '{}'", self.interval))?;
        let config = WorkerConfig::new(self.name.clone(), interval)?
            .with_first_run_immediate(self.first_run_immediate);
        Ok(config)
    }
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Load settings from the default file and the environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::builder().build()
    }
}

/// Builder applying explicit overrides on top of file and environment layers
#[derive(Debug, Default)]
pub struct SettingsBuilder {
    config_path: Option<PathBuf>,
    name: Option<String>,
    interval: Option<String>,
    first_run_immediate: Option<bool>,
}

impl SettingsBuilder {
    /// Use this file instead of searching for `mpworker.toml`. The file must exist.
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn interval(mut self, interval: Option<String>) -> Self {
        self.interval = interval;
        self
    }

    pub fn first_run_immediate(mut self, first_run_immediate: Option<bool>) -> Self {
        self.first_run_immediate = first_run_immediate;
        self
    }

    pub fn build(self) -> anyhow::Result<Settings> {
        let file = match &self.config_path {
            Some(path) => config::File::from(path.as_path()).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("worker.name", self.name)?
            .set_override_option("worker.interval", self.interval)?
            .set_override_option("worker.first_run_immediate", self.first_run_immediate)?
            .build()
            .context("Failed to load configuration")?
            .try_deserialize::<Settings>()
            .context("Failed to parse configuration")?;

        settings.worker.worker_config()?;

        Ok(settings)
    }
}
