//! Controller module for node idle reconciliation
//! This module contains the reconciler that converges node metadata and the
//! loops that feed it status records.

pub mod pipeline;
mod reconciler;

pub use pipeline::{consume_lines, produce_lines, run_in_process, run_tick, LoopStats};
pub use reconciler::{
    condition_of, NodeCondition, Reconciler, Step, StepOutcome, TickReport,
};
