//! node-idle-labeler: marks a Kubernetes node idle or busy from local telemetry
//!
//! Each running instance samples CPU, process and battery counters on its own
//! machine, classifies the machine as idle or busy, and converges the node's
//! `idle` label and `idle=false:NoExecute` taint to match.

pub mod classifier;
pub mod config;
pub mod controller;
pub mod error;
pub mod monitor;
pub mod node;

pub use crate::classifier::{classify, Decision};
pub use crate::config::ThresholdConfig;
pub use crate::error::{Error, Result};
pub use crate::monitor::StatusRecord;
