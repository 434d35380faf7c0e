//! Periodic telemetry sampler
//!
//! [`Sampler::into_stream`] turns a [`TelemetrySource`] into an infinite stream
//! of status records, one per sample interval. Read failures are yielded as
//! errors rather than papered over with a guessed value.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::Stream;
use sysinfo::System;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use super::power::PowerSupply;
use super::types::{RawSample, StatusRecord};
use crate::config::ThresholdConfig;
use crate::error::{Error, Result};

/// Process names whose CPU counts as container workload
pub const CONTAINER_RUNTIME_PROCESSES: &[&str] = &[
    "containerd",
    "containerd-shim",
    "containerd-shim-runc-v2",
    "dockerd",
    "docker",
    "crio",
    "runc",
    "crun",
    "conmon",
    "podman",
    "k3s",
    "kubelet",
    "vmmem",
    "vmmemwsl",
];

/// Shortest window over which CPU deltas are meaningful
const MIN_MEASUREMENT_WINDOW: Duration = Duration::from_millis(200);

/// Whether a process name belongs to the container runtime allow-list
pub fn is_container_runtime(process_name: &str) -> bool {
    let name = process_name.to_ascii_lowercase();
    let name = name.strip_suffix(".exe").unwrap_or(&name);
    CONTAINER_RUNTIME_PROCESSES.iter().any(|known| *known == name)
}

/// Source of raw OS counters
#[async_trait]
pub trait TelemetrySource: Send {
    /// Measure CPU over `window` and read the battery
    async fn read(&mut self, window: Duration) -> Result<RawSample>;
}

/// Telemetry from the local machine
pub struct SystemTelemetry {
    system: System,
    power: PowerSupply,
}

impl SystemTelemetry {
    /// Initialize the OS telemetry backend.
    ///
    /// Fails when the platform is not supported; callers treat this as fatal.
    pub fn new(power: PowerSupply) -> Result<Self> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            return Err(Error::TelemetryError(format!(
                "CPU telemetry is not supported on {}",
                std::env::consts::OS
            )));
        }

        let mut system = System::new();
        system.refresh_cpu();
        if system.cpus().is_empty() {
            return Err(Error::TelemetryError("no CPUs reported by the OS".to_string()));
        }

        Ok(Self { system, power })
    }

    fn refresh(&mut self) {
        self.system.refresh_cpu();
        self.system.refresh_processes();
    }
}

#[async_trait]
impl TelemetrySource for SystemTelemetry {
    async fn read(&mut self, window: Duration) -> Result<RawSample> {
        // CPU usage is a delta between two refreshes
        self.refresh();
        tokio::time::sleep(window.max(MIN_MEASUREMENT_WINDOW)).await;
        self.refresh();

        if self.system.cpus().is_empty() {
            return Err(Error::TelemetryError("no CPUs reported by the OS".to_string()));
        }
        let cpu_percent = f64::from(self.system.global_cpu_info().cpu_usage());
        if !cpu_percent.is_finite() {
            return Err(Error::TelemetryError(format!(
                "host CPU usage is not a number: {cpu_percent}"
            )));
        }

        let mut container_cpu = 0.0;
        let mut total_process_cpu = 0.0;
        for process in self.system.processes().values() {
            let usage = f64::from(process.cpu_usage());
            if !usage.is_finite() {
                continue;
            }
            total_process_cpu += usage;
            if is_container_runtime(process.name()) {
                container_cpu += usage;
            }
        }

        let battery = self.power.read()?;

        Ok(RawSample {
            cpu_percent,
            container_cpu,
            total_process_cpu,
            battery,
        })
    }
}

/// Turns raw telemetry into status records on a fixed cadence
pub struct Sampler<S> {
    source: S,
    config: Arc<ThresholdConfig>,
}

impl<S: TelemetrySource> Sampler<S> {
    pub fn new(source: S, config: Arc<ThresholdConfig>) -> Self {
        Self { source, config }
    }

    /// Take one sample now
    pub async fn sample_once(&mut self) -> Result<StatusRecord> {
        let raw = self.source.read(self.config.measurement_window).await?;
        let record = StatusRecord::from_sample(&raw, &self.config, Utc::now());

        debug!(
            cpu_percent = raw.cpu_percent,
            container_cpu = raw.container_cpu,
            battery = ?raw.battery,
            idle = record.idle,
            power_ok = record.power_ok,
            "Sampled telemetry"
        );
        Ok(record)
    }

    /// Consume the sampler into an infinite stream of records.
    ///
    /// The first sample is taken immediately, later ones every
    /// `sample_interval`. A slow read delays the schedule instead of
    /// bursting to catch up.
    pub fn into_stream(self) -> impl Stream<Item = Result<StatusRecord>> + Send
    where
        S: 'static,
    {
        futures::stream::unfold((self, None::<Interval>), |(mut sampler, ticker)| async move {
            let mut ticker = ticker.unwrap_or_else(|| {
                let mut ticker = interval(sampler.config.sample_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });
            ticker.tick().await;

            let item = sampler.sample_once().await;
            if let Err(e) = &item {
                warn!("Telemetry read failed: {}", e);
            }
            Some((item, (sampler, Some(ticker))))
        })
    }
}
