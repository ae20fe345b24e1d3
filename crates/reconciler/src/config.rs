//! Configuration for the reconciler and the controller loop.
//!
//! Every field is optional in a config file; durations are given in
//! (possibly fractional) seconds.
//!
//! ```toml
//! [reconciler]
//! requeue_after = 10
//! store_timeout = 5
//! max_concurrent_reads = 8
//!
//! [controller]
//! resync_interval = 30
//! backoff_base = 1
//! backoff_max = 300
//! ```

use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Per-pass settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Fixed delay before the next pass after any completed pass.
    #[serde(with = "duration_secs", default = "default_requeue_after")]
    pub requeue_after: Duration,

    /// Bound applied to every individual store call.
    #[serde(with = "duration_secs", default = "default_store_timeout")]
    pub store_timeout: Duration,

    /// Maximum workload reads in flight while evaluating readiness.
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            requeue_after: default_requeue_after(),
            store_timeout: default_store_timeout(),
            max_concurrent_reads: default_max_concurrent_reads(),
        }
    }
}

impl ReconcilerConfig {
    /// Set the requeue delay.
    #[must_use]
    pub const fn requeue_after(mut self, delay: Duration) -> Self {
        self.requeue_after = delay;
        self
    }

    /// Set the store call timeout.
    #[must_use]
    pub const fn store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set the read concurrency.
    #[must_use]
    pub const fn max_concurrent_reads(mut self, max: usize) -> Self {
        self.max_concurrent_reads = max;
        self
    }

    /// Reject values the engine cannot run with.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.requeue_after.is_zero() {
            return Err(Error::invalid_config("requeue_after must be positive"));
        }
        if self.store_timeout.is_zero() {
            return Err(Error::invalid_config("store_timeout must be positive"));
        }
        if self.max_concurrent_reads == 0 {
            return Err(Error::invalid_config("max_concurrent_reads must be at least 1"));
        }
        Ok(())
    }
}

/// Settings for the controller loop that schedules passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// How often the group store is listed for new groups.
    #[serde(with = "duration_secs", default = "default_resync_interval")]
    pub resync_interval: Duration,

    /// First retry delay after a failed pass.
    #[serde(with = "duration_secs", default = "default_backoff_base")]
    pub backoff_base: Duration,

    /// Upper bound for the retry delay.
    #[serde(with = "duration_secs", default = "default_backoff_max")]
    pub backoff_max: Duration,

    /// Spread retry delays by up to 25% either way.
    #[serde(default = "default_backoff_jitter")]
    pub backoff_jitter: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            resync_interval: default_resync_interval(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
            backoff_jitter: default_backoff_jitter(),
        }
    }
}

impl ControllerConfig {
    /// Disable jitter (deterministic delays).
    #[must_use]
    pub const fn without_jitter(mut self) -> Self {
        self.backoff_jitter = false;
        self
    }

    /// Reject values the loop cannot run with.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.resync_interval.is_zero() {
            return Err(Error::invalid_config("resync_interval must be positive"));
        }
        if self.backoff_base.is_zero() {
            return Err(Error::invalid_config("backoff_base must be positive"));
        }
        if self.backoff_base > self.backoff_max {
            return Err(Error::invalid_config("backoff_base must not exceed backoff_max"));
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (1-based) of a failed pass.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base_ms = u64::try_from(self.backoff_base.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.backoff_max.as_millis()).unwrap_or(u64::MAX);
        let factor = 2_u64.saturating_pow(attempt.saturating_sub(1));
        let capped = base_ms.saturating_mul(factor).min(max_ms);

        if self.backoff_jitter {
            let jitter_range = (capped / 4).max(1);
            let jitter = rand::thread_rng().gen_range(0..jitter_range.saturating_mul(2));
            Duration::from_millis(capped.saturating_sub(jitter_range).saturating_add(jitter))
        } else {
            Duration::from_millis(capped)
        }
    }
}

/// Top-level configuration file layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
}

impl Config {
    /// Load configuration from a file. `.json` files are parsed as JSON,
    /// everything else as TOML.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` when the file cannot be read, parsed or
    /// fails validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::invalid_config(format!("failed to read '{}': {e}", path.display()))
        })?;

        let config: Self = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))?
        } else {
            toml::from_str(&content)
                .map_err(|e| Error::invalid_config(format!("failed to parse config: {e}")))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Apply `DEPGROUP_*` environment overrides on top of this config.
    ///
    /// # Errors
    /// Returns `Error::InvalidConfig` when a variable is set to an unusable value.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("DEPGROUP_REQUEUE_SECS") {
            self.reconciler.requeue_after = parse_secs("DEPGROUP_REQUEUE_SECS", &value)?;
        }
        if let Some(value) = lookup("DEPGROUP_STORE_TIMEOUT_SECS") {
            self.reconciler.store_timeout = parse_secs("DEPGROUP_STORE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("DEPGROUP_MAX_CONCURRENT_READS") {
            self.reconciler.max_concurrent_reads = value.trim().parse().map_err(|e| {
                Error::invalid_config(format!("DEPGROUP_MAX_CONCURRENT_READS='{value}': {e}"))
            })?;
        }
        if let Some(value) = lookup("DEPGROUP_RESYNC_SECS") {
            self.controller.resync_interval = parse_secs("DEPGROUP_RESYNC_SECS", &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate both sections.
    ///
    /// # Errors
    /// Returns the first `Error::InvalidConfig` found.
    pub fn validate(&self) -> Result<()> {
        self.reconciler.validate()?;
        self.controller.validate()
    }
}

fn parse_secs(key: &str, value: &str) -> Result<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| {
            Error::invalid_config(format!("{key}='{value}' is not a duration in seconds"))
        })
}

const fn default_requeue_after() -> Duration {
    Duration::from_secs(10)
}

const fn default_store_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_max_concurrent_reads() -> usize {
    8
}

const fn default_resync_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_backoff_base() -> Duration {
    Duration::from_secs(1)
}

const fn default_backoff_max() -> Duration {
    Duration::from_secs(300)
}

const fn default_backoff_jitter() -> bool {
    true
}

/// Serialization helper for Duration as (fractional) seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(de::Error::custom)
    }
}
