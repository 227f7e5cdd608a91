//! Gateway settings and environment policy.
//!
//! Settings are loaded from a YAML file at startup and carry the knobs
//! the update pipeline honors: the deployment environment, strict
//! startup, retry tuning, and the optional resync sweep interval.

use crate::retry::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Deployment environment, governing update strictness.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Local development: permissive overwrites and deletes.
    #[default]
    Development,
    /// Pre-production: governed versioning, deletes allowed.
    Staging,
    /// Production: governed versioning, deletes disallowed.
    Production,
}

impl Environment {
    /// Whether re-publishing a version without a patch increment is
    /// accepted.
    pub fn allows_version_overwrite(&self) -> bool {
        matches!(self, Environment::Development)
    }

    /// Whether delete changes are applied at all.
    pub fn allows_delete(&self) -> bool {
        !matches!(self, Environment::Production)
    }

    /// Upper bound for the stream-resubscription backoff.
    pub fn max_stream_backoff(&self) -> Duration {
        match self {
            Environment::Development => Duration::from_secs(30),
            Environment::Staging => Duration::from_secs(60),
            Environment::Production => Duration::from_secs(300),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Staging => write!(f, "staging"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Retry tuning for the delta-stream subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Backoff multiplier per attempt.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Jitter fraction added on top of the computed delay.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.4
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// Top-level gateway settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewaySettings {
    /// Deployment environment.
    #[serde(default)]
    pub environment: Environment,

    /// Fail startup outright if any entity cannot be loaded.
    #[serde(default)]
    pub strict_startup: bool,

    /// Stream retry tuning.
    #[serde(default)]
    pub retry: RetrySettings,

    /// Interval in seconds between resync sweeps; `None` disables them.
    #[serde(default)]
    pub resync_interval_secs: Option<u64>,
}

impl GatewaySettings {
    /// Loads settings from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let settings: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;

        Ok(settings)
    }

    /// Saves settings to a YAML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_yaml::to_string(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Builds the stream retry policy, capped by the environment's
    /// maximum backoff.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(self.retry.initial_delay_ms))
            .with_max_delay(self.environment.max_stream_backoff())
            .with_multiplier(self.retry.multiplier)
            .with_jitter(self.retry.jitter)
    }

    /// Resync sweep interval, if enabled.
    pub fn resync_interval(&self) -> Option<Duration> {
        self.resync_interval_secs.map(Duration::from_secs)
    }
}
