//! In-memory node client
//!
//! Holds node metadata in memory, records every call in order and can be told
//! to fail specific operations. Used to exercise reconciliation without a
//! cluster.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::client::{NodeClient, NodeState};
use super::taints::{self, Taint};
use crate::error::{Error, Result};

/// Client operations, for failure injection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    GetNode,
    SetLabel,
    RemoveLabel,
    AddTaint,
    RemoveTaint,
}

/// A recorded client call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeCall {
    GetNode,
    SetLabel { key: String, value: String },
    RemoveLabel { key: String },
    AddTaint(Taint),
    RemoveTaint(Taint),
}

#[derive(Default)]
struct FakeCluster {
    nodes: BTreeMap<String, NodeState>,
    calls: Vec<NodeCall>,
    failing: HashSet<Operation>,
}

/// Cloning shares the same in-memory cluster
#[derive(Clone, Default)]
pub struct FakeNodeClient {
    inner: Arc<Mutex<FakeCluster>>,
}

impl FakeNodeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with one node carrying `state`
    pub fn with_node(name: &str, state: NodeState) -> Self {
        let client = Self::new();
        client.insert_node(name, state);
        client
    }

    pub fn insert_node(&self, name: &str, state: NodeState) {
        self.lock().nodes.insert(name.to_string(), state);
    }

    /// Current state of a node
    pub fn node(&self, name: &str) -> Option<NodeState> {
        self.lock().nodes.get(name).cloned()
    }

    /// Make every later call of `operation` fail
    pub fn fail(&self, operation: Operation) {
        self.lock().failing.insert(operation);
    }

    pub fn recover(&self, operation: Operation) {
        self.lock().failing.remove(&operation);
    }

    /// Calls made so far, oldest first
    pub fn calls(&self) -> Vec<NodeCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, FakeCluster> {
        // a panicking test thread must not hide the state from the others
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and apply injected failures
    fn begin(
        &self,
        name: &str,
        operation: Operation,
        call: NodeCall,
    ) -> Result<MutexGuard<'_, FakeCluster>> {
        let mut cluster = self.lock();
        cluster.calls.push(call);
        if cluster.failing.contains(&operation) {
            return Err(Error::MutationError {
                node: name.to_string(),
                operation: format!("{operation:?}"),
                message: "injected failure".to_string(),
            });
        }
        Ok(cluster)
    }
}

fn missing(name: &str, operation: &str) -> Error {
    Error::MutationError {
        node: name.to_string(),
        operation: operation.to_string(),
        message: format!("nodes \"{name}\" not found"),
    }
}

#[async_trait]
impl NodeClient for FakeNodeClient {
    async fn get_node(&self, name: &str) -> Result<NodeState> {
        let cluster = self.begin(name, Operation::GetNode, NodeCall::GetNode)?;
        cluster
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))
    }

    async fn set_label(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let call = NodeCall::SetLabel {
            key: key.to_string(),
            value: value.to_string(),
        };
        let mut cluster = self.begin(name, Operation::SetLabel, call)?;
        let node = cluster
            .nodes
            .get_mut(name)
            .ok_or_else(|| missing(name, "set_label"))?;
        node.labels.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_label(&self, name: &str, key: &str) -> Result<()> {
        let call = NodeCall::RemoveLabel {
            key: key.to_string(),
        };
        let mut cluster = self.begin(name, Operation::RemoveLabel, call)?;
        if let Some(node) = cluster.nodes.get_mut(name) {
            node.labels.remove(key);
        }
        Ok(())
    }

    async fn add_taint(&self, name: &str, taint: &Taint) -> Result<()> {
        let mut cluster =
            self.begin(name, Operation::AddTaint, NodeCall::AddTaint(taint.clone()))?;
        let node = cluster
            .nodes
            .get_mut(name)
            .ok_or_else(|| missing(name, "add_taint"))?;
        taints::upsert_taint(&mut node.taints, taint.clone());
        Ok(())
    }

    async fn remove_taint(&self, name: &str, taint: &Taint) -> Result<()> {
        let mut cluster = self.begin(
            name,
            Operation::RemoveTaint,
            NodeCall::RemoveTaint(taint.clone()),
        )?;
        if let Some(node) = cluster.nodes.get_mut(name) {
            taints::remove_taint(&mut node.taints, taint);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TaintEffect;

    #[tokio::test]
    async fn test_fake_applies_mutations() {
        let client = FakeNodeClient::with_node("n1", NodeState::default());
        let taint = Taint::new("idle", "false", TaintEffect::NoExecute);

        client.set_label("n1", "idle", "false").await.unwrap();
        client.add_taint("n1", &taint).await.unwrap();
        client.add_taint("n1", &taint).await.unwrap();

        let state = client.get_node("n1").await.unwrap();
        assert_eq!(state.label("idle"), Some("false"));
        assert_eq!(state.taints, vec![taint.clone()]);

        client.remove_taint("n1", &taint).await.unwrap();
        client.remove_taint("n1", &taint).await.unwrap();
        client.remove_label("n1", "idle").await.unwrap();
        client.remove_label("n1", "idle").await.unwrap();
        assert_eq!(client.node("n1"), Some(NodeState::default()));
    }

    #[tokio::test]
    async fn test_fake_missing_node() {
        let client = FakeNodeClient::new();
        assert!(matches!(
            client.get_node("ghost").await,
            Err(Error::NodeNotFound(_))
        ));
        assert!(client.set_label("ghost", "idle", "true").await.is_err());
        assert!(client
            .remove_taint("ghost", &Taint::new("idle", "false", TaintEffect::NoExecute))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_injected_failure_is_recorded() {
        let client = FakeNodeClient::with_node("n1", NodeState::default());
        client.fail(Operation::SetLabel);

        let err = client.set_label("n1", "idle", "true").await.unwrap_err();
        assert!(err.is_mutation_failure());
        assert_eq!(client.calls().len(), 1);
        assert!(client.node("n1").unwrap().labels.is_empty());

        client.recover(Operation::SetLabel);
        client.set_label("n1", "idle", "true").await.unwrap();
        assert_eq!(client.node("n1").unwrap().label("idle"), Some("true"));
    }
}
