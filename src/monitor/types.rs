//! Types produced by the telemetry sampler

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ThresholdConfig;

/// Smallest CPU total used as a divisor when computing the container ratio
pub const RATIO_EPSILON: f64 = 1e-9;

/// One sample of the machine's state, produced once per tick
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct StatusRecord {
    /// Host CPU usage was below the idle threshold
    pub idle: bool,
    /// Machine is plugged in or has enough battery left
    pub power_ok: bool,
    /// Share of measured CPU (0-1) spent in container runtime processes
    pub container_cpu_ratio: f64,
    /// Host CPU percent over the measurement window, when known
    pub cpu_percent: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// Battery sensor reading
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatteryReading {
    /// Charge level (0-100)
    pub percent: f64,
    /// On mains power, charging or full
    pub plugged_in: bool,
}

/// Raw counters read from the OS for one tick
#[derive(Clone, Debug, PartialEq)]
pub struct RawSample {
    /// Host-wide CPU percent (0-100)
    pub cpu_percent: f64,
    /// Summed CPU of container runtime processes
    pub container_cpu: f64,
    /// Summed CPU of all measured processes, in the same unit as `container_cpu`
    pub total_process_cpu: f64,
    /// `None` when the machine has no battery sensor
    pub battery: Option<BatteryReading>,
}

/// CPU strictly below the threshold is idle
pub fn is_cpu_idle(cpu_percent: f64, cpu_idle_threshold: f64) -> bool {
    cpu_percent < cpu_idle_threshold
}

/// Plugged in, or battery at or above the threshold. No sensor means ok.
pub fn is_power_ok(battery: Option<&BatteryReading>, battery_threshold: f64) -> bool {
    match battery {
        None => true,
        Some(b) => b.plugged_in || b.percent >= battery_threshold,
    }
}

/// Container share of the measured CPU, 0 when nothing was measured
pub fn container_cpu_ratio(container_cpu: f64, total_cpu: f64) -> f64 {
    if total_cpu <= 0.0 || container_cpu <= 0.0 {
        return 0.0;
    }
    (container_cpu / total_cpu.max(RATIO_EPSILON)).clamp(0.0, 1.0)
}

impl StatusRecord {
    /// Derive a status record from raw counters
    pub fn from_sample(
        sample: &RawSample,
        config: &ThresholdConfig,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            idle: is_cpu_idle(sample.cpu_percent, config.cpu_idle_threshold),
            power_ok: is_power_ok(sample.battery.as_ref(), config.battery_threshold),
            container_cpu_ratio: container_cpu_ratio(
                sample.container_cpu,
                sample.total_process_cpu,
            ),
            cpu_percent: Some(sample.cpu_percent),
            timestamp,
        }
    }
}
