//! Idle/busy classification
//!
//! A pure function of one status record and the thresholds; nothing carries
//! over between ticks.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ThresholdConfig;
use crate::monitor::StatusRecord;

/// What the node should look like after this tick
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum Decision {
    /// Label `idle=true`, no busy taint
    MarkIdle,
    /// Label `idle=false` plus the `idle=false:NoExecute` taint
    MarkBusy,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::MarkIdle => write!(f, "MarkIdle"),
            Decision::MarkBusy => write!(f, "MarkBusy"),
        }
    }
}

/// Decide whether the node is idle or busy.
///
/// Busy when CPU is not idle or power is insufficient. Also busy when CPU is
/// above the idle threshold and most of it is not container work, i.e. a
/// person is using the machine. Idle otherwise.
pub fn classify(record: &StatusRecord, config: &ThresholdConfig) -> Decision {
    if !record.idle || !record.power_ok {
        return Decision::MarkBusy;
    }

    let foreground_load = record.container_cpu_ratio <= config.container_ratio_threshold
        && record
            .cpu_percent
            .is_some_and(|cpu| cpu > config.cpu_idle_threshold);
    if foreground_load {
        return Decision::MarkBusy;
    }

    Decision::MarkIdle
}
