//! Node state reconciler
//!
//! Converges the node's `idle` label and busy taint to the latest decision.
//! Every call is attempted on its own: a failing call is logged and the rest
//! of the tick still runs. There is no retry inside a tick; the next sample
//! re-evaluates the node from scratch.

use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::classifier::Decision;
use crate::error::Result;
use crate::node::taints::find_taint;
use crate::node::{busy_taint, NodeClient, NodeState, TaintEffect, IDLE_KEY};

/// What the reconciler believes about the node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeCondition {
    /// Not reconciled yet, or the last tick failed
    Unknown,
    /// Label `idle=true`, no busy taint
    IdleLabeled,
    /// Busy taint present, label `idle=false`
    BusyTainted,
}

impl fmt::Display for NodeCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeCondition::Unknown => write!(f, "Unknown"),
            NodeCondition::IdleLabeled => write!(f, "IdleLabeled"),
            NodeCondition::BusyTainted => write!(f, "BusyTainted"),
        }
    }
}

impl From<Decision> for NodeCondition {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::MarkIdle => NodeCondition::IdleLabeled,
            Decision::MarkBusy => NodeCondition::BusyTainted,
        }
    }
}

/// Derive the condition from observed metadata.
///
/// Anything other than exactly one of the label `idle=true` or the busy taint
/// is `Unknown`.
pub fn condition_of(state: &NodeState) -> NodeCondition {
    let labeled_idle = state.label(IDLE_KEY) == Some("true");
    let tainted = find_taint(&state.taints, IDLE_KEY, TaintEffect::NoExecute).is_some();

    match (labeled_idle, tainted) {
        (true, false) => NodeCondition::IdleLabeled,
        (false, true) => NodeCondition::BusyTainted,
        _ => NodeCondition::Unknown,
    }
}

/// One client call within a tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    SetLabel,
    ReadTaints,
    RemoveTaint,
    AddTaint,
}

#[derive(Debug)]
pub struct StepOutcome {
    pub step: Step,
    pub result: Result<()>,
}

/// Outcome of a reconciliation tick
#[derive(Debug)]
pub struct TickReport {
    pub decision: Decision,
    pub steps: Vec<StepOutcome>,
}

impl TickReport {
    fn new(decision: Decision) -> Self {
        Self {
            decision,
            steps: Vec::new(),
        }
    }

    fn record(&mut self, step: Step, result: Result<()>) {
        match &result {
            Ok(()) => debug!("{:?} succeeded", step),
            Err(e) => warn!("{:?} failed: {}", step, e),
        }
        self.steps.push(StepOutcome { step, result });
    }

    /// True when every attempted call succeeded
    pub fn is_success(&self) -> bool {
        self.steps.iter().all(|s| s.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepOutcome> {
        self.steps.iter().filter(|s| s.result.is_err())
    }

    /// Steps attempted, in order
    pub fn attempted(&self) -> Vec<Step> {
        self.steps.iter().map(|s| s.step).collect()
    }
}

/// Drives a [`NodeClient`] for one node
pub struct Reconciler<C> {
    client: C,
    node_name: String,
    condition: NodeCondition,
}

impl<C: NodeClient> Reconciler<C> {
    pub fn new(client: C, node_name: impl Into<String>) -> Self {
        Self {
            client,
            node_name: node_name.into(),
            condition: NodeCondition::Unknown,
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn condition(&self) -> NodeCondition {
        self.condition
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Read the node and derive its current condition
    pub async fn observe(&self) -> Result<(NodeState, NodeCondition)> {
        let state = self.client.get_node(&self.node_name).await?;
        let condition = condition_of(&state);
        Ok((state, condition))
    }

    /// Apply `decision` to the node
    #[instrument(skip(self), fields(node = %self.node_name))]
    pub async fn reconcile(&mut self, decision: Decision) -> TickReport {
        let mut report = TickReport::new(decision);

        match decision {
            Decision::MarkIdle => self.mark_idle(&mut report).await,
            Decision::MarkBusy => self.mark_busy(&mut report).await,
        }

        let previous = self.condition;
        self.condition = if report.is_success() {
            NodeCondition::from(decision)
        } else {
            NodeCondition::Unknown
        };

        if report.is_success() && previous != self.condition {
            info!(
                "Node {} transitioned {} -> {}",
                self.node_name, previous, self.condition
            );
        } else if report.is_success() {
            debug!("Node {} unchanged: {}", self.node_name, self.condition);
        } else {
            warn!(
                "Reconciling node {} to {} left {} failed call(s); retrying next tick",
                self.node_name,
                decision,
                report.failures().count()
            );
        }

        report
    }

    async fn mark_idle(&self, report: &mut TickReport) {
        let result = self.client.set_label(&self.node_name, IDLE_KEY, "true").await;
        report.record(Step::SetLabel, result);

        let taint = busy_taint();
        let must_remove = match self.client.get_node(&self.node_name).await {
            Ok(state) => {
                report.record(Step::ReadTaints, Ok(()));
                find_taint(&state.taints, &taint.key, taint.effect).is_some()
            }
            Err(e) => {
                // removal is idempotent, so try it blind
                report.record(Step::ReadTaints, Err(e));
                true
            }
        };

        if must_remove {
            let result = self.client.remove_taint(&self.node_name, &taint).await;
            report.record(Step::RemoveTaint, result);
        }
    }

    async fn mark_busy(&self, report: &mut TickReport) {
        // Label first: a failed taint call must not leave a taint without a
        // matching label.
        let result = self.client.set_label(&self.node_name, IDLE_KEY, "false").await;
        report.record(Step::SetLabel, result);

        let result = self.client.add_taint(&self.node_name, &busy_taint()).await;
        report.record(Step::AddTaint, result);
    }
}
