//! Threshold configuration
//!
//! Configuration is assembled once at startup from three layers: built-in
//! defaults, an optional TOML file, and command-line/environment overrides.
//! The resolved [`ThresholdConfig`] is validated and then shared read-only.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_CPU_IDLE_THRESHOLD: f64 = 30.0;
pub const DEFAULT_BATTERY_THRESHOLD: f64 = 70.0;
pub const DEFAULT_CONTAINER_RATIO_THRESHOLD: f64 = 0.5;
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MEASUREMENT_WINDOW: Duration = Duration::from_secs(1);

/// Thresholds driving the sampler and the classifier
#[derive(Clone, Debug, PartialEq)]
pub struct ThresholdConfig {
    /// Host CPU percent strictly below which the machine counts as idle
    pub cpu_idle_threshold: f64,
    /// Battery percent at or above which unplugged power is sufficient
    pub battery_threshold: f64,
    /// Share of CPU (0-1) attributed to container runtimes at or below which
    /// load above the CPU threshold counts as foreground work
    pub container_ratio_threshold: f64,
    /// Time between two samples
    pub sample_interval: Duration,
    /// Window over which CPU usage is measured within one sample
    pub measurement_window: Duration,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_idle_threshold: DEFAULT_CPU_IDLE_THRESHOLD,
            battery_threshold: DEFAULT_BATTERY_THRESHOLD,
            container_ratio_threshold: DEFAULT_CONTAINER_RATIO_THRESHOLD,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            measurement_window: DEFAULT_MEASUREMENT_WINDOW,
        }
    }
}

impl ThresholdConfig {
    /// Check that every threshold is inside its domain
    pub fn validate(&self) -> Result<()> {
        check_percent("cpu_idle_threshold", self.cpu_idle_threshold)?;
        check_percent("battery_threshold", self.battery_threshold)?;

        if !(0.0..=1.0).contains(&self.container_ratio_threshold) {
            return Err(Error::ConfigError(format!(
                "container_ratio_threshold must be within [0, 1], got {}",
                self.container_ratio_threshold
            )));
        }
        if self.sample_interval.is_zero() {
            return Err(Error::ConfigError(
                "sample_interval must be greater than zero".to_string(),
            ));
        }
        if self.measurement_window.is_zero() {
            return Err(Error::ConfigError(
                "measurement_window must be greater than zero".to_string(),
            ));
        }
        if self.measurement_window >= self.sample_interval {
            return Err(Error::ConfigError(format!(
                "measurement_window ({:?}) must be shorter than sample_interval ({:?})",
                self.measurement_window, self.sample_interval
            )));
        }
        Ok(())
    }
}

fn check_percent(name: &str, value: f64) -> Result<()> {
    if !(0.0..=100.0).contains(&value) {
        return Err(Error::ConfigError(format!(
            "{name} must be a percentage within [0, 100], got {value}"
        )));
    }
    Ok(())
}

/// One layer of optional settings, as read from a TOML file or the CLI
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub cpu_idle_threshold: Option<f64>,
    pub battery_threshold: Option<f64>,
    pub container_ratio_threshold: Option<f64>,
    pub sample_interval_secs: Option<u64>,
    pub measurement_window_ms: Option<u64>,
    /// Overrides the hostname-derived node identity
    pub node_name: Option<String>,
}

impl ConfigLayer {
    /// Read a layer from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::ConfigError(format!("invalid config file: {e}")))
    }

    /// Overlay `other` on top of `self`; values set in `other` win
    pub fn merge(self, other: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            cpu_idle_threshold: other.cpu_idle_threshold.or(self.cpu_idle_threshold),
            battery_threshold: other.battery_threshold.or(self.battery_threshold),
            container_ratio_threshold: other
                .container_ratio_threshold
                .or(self.container_ratio_threshold),
            sample_interval_secs: other.sample_interval_secs.or(self.sample_interval_secs),
            measurement_window_ms: other.measurement_window_ms.or(self.measurement_window_ms),
            node_name: other.node_name.or(self.node_name),
        }
    }

    /// Fill unset values from the defaults and validate the result
    pub fn resolve(&self) -> Result<ThresholdConfig> {
        let defaults = ThresholdConfig::default();
        let config = ThresholdConfig {
            cpu_idle_threshold: self
                .cpu_idle_threshold
                .unwrap_or(defaults.cpu_idle_threshold),
            battery_threshold: self.battery_threshold.unwrap_or(defaults.battery_threshold),
            container_ratio_threshold: self
                .container_ratio_threshold
                .unwrap_or(defaults.container_ratio_threshold),
            sample_interval: self
                .sample_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.sample_interval),
            measurement_window: self
                .measurement_window_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.measurement_window),
        };
        config.validate()?;
        Ok(config)
    }
}
