//! Status-record line protocol
//!
//! When the sampler and the reconciler run as separate processes, records
//! travel as one text line each: whitespace-separated `key=value` tokens.
//!
//! ```text
//! idle=true power_ok=true cpu=4.2 container_ratio=0.1250
//! ```
//!
//! `idle` and `power_ok` are required. `cpu`, `container_cpu` (or the older
//! `vmem_cpu`) and `container_ratio` are optional decimals. Unknown keys are
//! ignored so that newer producers can talk to older consumers.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;

use super::types::{container_cpu_ratio, StatusRecord};
use crate::error::{Error, Result};

const KEY_IDLE: &str = "idle";
const KEY_POWER_OK: &str = "power_ok";
const KEY_CPU: &str = "cpu";
const KEY_CONTAINER_CPU: &str = "container_cpu";
const KEY_VMEM_CPU: &str = "vmem_cpu";
const KEY_CONTAINER_RATIO: &str = "container_ratio";

impl fmt::Display for StatusRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{KEY_IDLE}={} {KEY_POWER_OK}={}",
            self.idle, self.power_ok
        )?;
        if let Some(cpu) = self.cpu_percent {
            write!(f, " {KEY_CPU}={cpu:.1}")?;
        }
        write!(f, " {KEY_CONTAINER_RATIO}={:.4}", self.container_cpu_ratio)
    }
}

impl FromStr for StatusRecord {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut idle = None;
        let mut power_ok = None;
        let mut cpu = None;
        let mut container_cpu = None;
        let mut ratio = None;

        for token in line.split_whitespace() {
            let (key, value) = token
                .split_once('=')
                .ok_or_else(|| Error::ParseError(format!("token '{token}' is not key=value")))?;

            match key {
                KEY_IDLE => idle = Some(parse_bool(key, value)?),
                KEY_POWER_OK => power_ok = Some(parse_bool(key, value)?),
                KEY_CPU => cpu = Some(parse_decimal(key, value)?),
                KEY_CONTAINER_CPU | KEY_VMEM_CPU => {
                    container_cpu = Some(parse_decimal(key, value)?)
                }
                KEY_CONTAINER_RATIO => ratio = Some(parse_decimal(key, value)?.clamp(0.0, 1.0)),
                _ => {}
            }
        }

        let idle = idle.ok_or_else(|| missing(KEY_IDLE))?;
        let power_ok = power_ok.ok_or_else(|| missing(KEY_POWER_OK))?;
        let container_cpu_ratio = match (ratio, container_cpu, cpu) {
            (Some(ratio), _, _) => ratio,
            (None, Some(container), Some(total)) => container_cpu_ratio(container, total),
            _ => 0.0,
        };

        Ok(StatusRecord {
            idle,
            power_ok,
            container_cpu_ratio,
            cpu_percent: cpu,
            timestamp: Utc::now(),
        })
    }
}

/// Parse one line of the protocol. Blank lines yield `Ok(None)`.
pub fn parse_status_line(line: &str) -> Result<Option<StatusRecord>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    line.parse().map(Some)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(Error::ParseError(format!(
            "{key} must be true or false, got '{other}'"
        ))),
    }
}

fn parse_decimal(key: &str, value: &str) -> Result<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| Error::ParseError(format!("{key} must be a decimal, got '{value}'")))
}

fn missing(key: &str) -> Error {
    Error::ParseError(format!("missing required key '{key}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_required_keys() {
        let record: StatusRecord = "idle=true power_ok=false".parse().unwrap();
        assert!(record.idle);
        assert!(!record.power_ok);
        assert_eq!(record.cpu_percent, None);
        assert_eq!(record.container_cpu_ratio, 0.0);
    }

    #[test]
    fn test_parse_wsl_monitor_line() {
        let record: StatusRecord = "idle=true power_ok=true vmem_cpu=3.5".parse().unwrap();
        assert!(record.idle);
        // no total cpu to divide by
        assert_eq!(record.container_cpu_ratio, 0.0);

        let record: StatusRecord = "idle=true power_ok=true cpu=10.0 container_cpu=2.5"
            .parse()
            .unwrap();
        assert_eq!(record.cpu_percent, Some(10.0));
        assert!((record.container_cpu_ratio - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_ratio_wins() {
        let record: StatusRecord = "idle=true power_ok=true cpu=10 container_cpu=5 container_ratio=0.9"
            .parse()
            .unwrap();
        assert!((record.container_cpu_ratio - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_zero_cpu_gives_zero_ratio() {
        let record: StatusRecord = "idle=true power_ok=true cpu=0 container_cpu=0"
            .parse()
            .unwrap();
        assert_eq!(record.container_cpu_ratio, 0.0);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let record: StatusRecord = "power_ok=true host=laptop idle=false".parse().unwrap();
        assert!(!record.idle);
    }

    #[test]
    fn test_malformed_lines_are_parse_errors() {
        for line in [
            "idle=true power_ok",
            "idle=yes power_ok=true",
            "idle=true power_ok=true cpu=abc",
            "idle=true power_ok=true cpu=NaN",
            "idle=true",
            "power_ok=true",
        ] {
            let err = line.parse::<StatusRecord>().unwrap_err();
            assert!(matches!(err, Error::ParseError(_)), "line: {line}");
        }
    }

    #[test]
    fn test_blank_line_is_skipped() {
        assert!(parse_status_line("   ").unwrap().is_none());
        assert!(parse_status_line("idle=false power_ok=true\n")
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_display_is_parseable() {
        let record = StatusRecord {
            idle: true,
            power_ok: true,
            container_cpu_ratio: 0.125,
            cpu_percent: Some(4.5),
            timestamp: Utc::now(),
        };
        let line = record.to_string();
        assert_eq!(line, "idle=true power_ok=true cpu=4.5 container_ratio=0.1250");

        let parsed: StatusRecord = line.parse().unwrap();
        assert_eq!(parsed.idle, record.idle);
        assert_eq!(parsed.power_ok, record.power_ok);
        assert!((parsed.container_cpu_ratio - 0.125).abs() < 1e-9);
    }
}
