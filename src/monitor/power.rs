//! Battery and mains state from the Linux power-supply class
//!
//! Each directory under `/sys/class/power_supply` describes one supply. Its
//! `type` file says whether it is a `Battery` or an external source (`Mains`,
//! `USB`, ...). Batteries report `capacity` (percent) and `status`; external
//! sources report `online`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::types::BatteryReading;
use crate::error::{Error, Result};

pub const DEFAULT_POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

/// Reader over a power-supply class directory
#[derive(Clone, Debug)]
pub struct PowerSupply {
    root: PathBuf,
}

impl Default for PowerSupply {
    fn default() -> Self {
        Self::new(DEFAULT_POWER_SUPPLY_ROOT)
    }
}

impl PowerSupply {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Read the current battery state.
    ///
    /// Returns `Ok(None)` when no battery is present, including machines
    /// without a power-supply class at all.
    pub fn read(&self) -> Result<Option<BatteryReading>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No power supply class at {}", self.root.display());
                return Ok(None);
            }
            Err(e) => return Err(telemetry_error(&self.root, e)),
        };

        let mut capacities = Vec::new();
        let mut plugged_in = false;

        for entry in entries {
            let supply = entry.map_err(|e| telemetry_error(&self.root, e))?.path();
            let Some(kind) = read_attr(&supply, "type")? else {
                continue;
            };

            match kind.as_str() {
                "Battery" => {
                    // Some firmware exposes placeholder batteries without a
                    // capacity; those are skipped.
                    let Some(capacity) = read_attr(&supply, "capacity")? else {
                        continue;
                    };
                    let percent = capacity.parse::<f64>().map_err(|e| {
                        Error::TelemetryError(format!(
                            "invalid battery capacity '{capacity}' in {}: {e}",
                            supply.display()
                        ))
                    })?;
                    capacities.push(percent);

                    if let Some(status) = read_attr(&supply, "status")? {
                        if status == "Charging" || status == "Full" {
                            plugged_in = true;
                        }
                    }
                }
                _ => {
                    if read_attr(&supply, "online")?.as_deref() == Some("1") {
                        plugged_in = true;
                    }
                }
            }
        }

        if capacities.is_empty() {
            return Ok(None);
        }

        let percent = capacities.iter().sum::<f64>() / capacities.len() as f64;
        Ok(Some(BatteryReading {
            percent,
            plugged_in,
        }))
    }
}

/// Read a trimmed attribute file, `None` when the attribute doesn't exist
fn read_attr(supply: &Path, name: &str) -> Result<Option<String>> {
    let path = supply.join(name);
    match fs::read_to_string(&path) {
        Ok(raw) => Ok(Some(raw.trim().to_string())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(telemetry_error(&path, e)),
    }
}

fn telemetry_error(path: &Path, e: io::Error) -> Error {
    Error::TelemetryError(format!("cannot read {}: {e}", path.display()))
}
