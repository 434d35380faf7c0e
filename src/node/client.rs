//! Node mutation client interface

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::taints::{self, Taint};
use crate::error::Result;

/// Observed node metadata
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct NodeState {
    pub labels: BTreeMap<String, String>,
    pub taints: Vec<Taint>,
}

impl NodeState {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn has_taint(&self, taint: &Taint) -> bool {
        taints::has_taint(&self.taints, taint)
    }
}

impl From<&Node> for NodeState {
    fn from(node: &Node) -> Self {
        let labels = node.metadata.labels.clone().unwrap_or_default();
        let taints = node
            .spec
            .as_ref()
            .and_then(|spec| spec.taints.as_ref())
            .map(|raw| {
                raw.iter()
                    .filter_map(|t| match Taint::try_from(t) {
                        Ok(taint) => Some(taint),
                        Err(e) => {
                            warn!("Ignoring taint {} on node: {}", t.key, e);
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        NodeState { labels, taints }
    }
}

/// Calls against the control plane for a single node.
///
/// Every call is one synchronous round trip with no retry. Removals of
/// absent labels or taints succeed; additions overwrite.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Read labels and taints; `Error::NodeNotFound` when the node is missing
    async fn get_node(&self, name: &str) -> Result<NodeState>;

    async fn set_label(&self, name: &str, key: &str, value: &str) -> Result<()>;

    async fn remove_label(&self, name: &str, key: &str) -> Result<()>;

    async fn add_taint(&self, name: &str, taint: &Taint) -> Result<()>;

    async fn remove_taint(&self, name: &str, taint: &Taint) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::TaintEffect;
    use k8s_openapi::api::core::v1::{NodeSpec, Taint as K8sTaint};
    use kube::api::ObjectMeta;

    #[test]
    fn test_node_state_from_k8s_node() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("worker-1".to_string()),
                labels: Some(BTreeMap::from([("idle".to_string(), "false".to_string())])),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                taints: Some(vec![
                    K8sTaint {
                        key: "idle".to_string(),
                        value: Some("false".to_string()),
                        effect: "NoExecute".to_string(),
                        time_added: None,
                    },
                    K8sTaint {
                        key: "weird".to_string(),
                        value: None,
                        effect: "Unknown".to_string(),
                        time_added: None,
                    },
                ]),
                ..Default::default()
            }),
            status: None,
        };

        let state = NodeState::from(&node);
        assert_eq!(state.label("idle"), Some("false"));
        assert_eq!(state.taints.len(), 1);
        assert!(state.has_taint(&Taint::new("idle", "false", TaintEffect::NoExecute)));
    }

    #[test]
    fn test_node_without_spec_has_no_taints() {
        let state = NodeState::from(&Node::default());
        assert!(state.labels.is_empty());
        assert!(state.taints.is_empty());
    }
}
