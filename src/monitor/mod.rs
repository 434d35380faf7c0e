//! Local telemetry sampling
//!
//! This module reads CPU, process and battery counters on the local machine
//! and turns them into [`StatusRecord`]s, either in process or as lines of
//! text for a separate labeler process.

pub mod power;
pub mod sampler;
pub mod status;
pub mod types;

pub use power::PowerSupply;
pub use sampler::{is_container_runtime, Sampler, SystemTelemetry, TelemetrySource};
pub use status::parse_status_line;
pub use types::{BatteryReading, RawSample, StatusRecord};
