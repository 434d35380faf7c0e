//! Kubernetes-backed node client
//!
//! Labels are written with JSON merge patches on `metadata.labels`. Taints
//! live in a list, so they are read, edited and written back as a whole
//! `spec.taints` merge patch. Concurrent edits by others race: last writer
//! wins.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Taint as K8sTaint};
use kube::{
    api::{Api, Patch, PatchParams},
    Client,
};
use serde_json::json;
use tracing::{debug, info};

use super::client::{NodeClient, NodeState};
use super::taints::Taint;
use crate::error::{Error, Result};

/// Field manager recorded on every patch
pub const FIELD_MANAGER: &str = "node-idle-labeler";

pub struct KubeNodeClient {
    api: Api<Node>,
}

impl KubeNodeClient {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }

    async fn fetch(&self, name: &str) -> Result<Option<Node>> {
        self.api.get_opt(name).await.map_err(Error::KubeError)
    }

    async fn patch(&self, name: &str, operation: &str, patch: serde_json::Value) -> Result<()> {
        self.api
            .patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::MutationError {
                node: name.to_string(),
                operation: operation.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn write_taints(&self, name: &str, operation: &str, taints: &[K8sTaint]) -> Result<()> {
        self.patch(name, operation, json!({ "spec": { "taints": taints } }))
            .await
    }
}

fn current_taints(node: &Node) -> Vec<K8sTaint> {
    node.spec
        .as_ref()
        .and_then(|spec| spec.taints.clone())
        .unwrap_or_default()
}

#[async_trait]
impl NodeClient for KubeNodeClient {
    async fn get_node(&self, name: &str) -> Result<NodeState> {
        let node = self
            .fetch(name)
            .await?
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))?;
        Ok(NodeState::from(&node))
    }

    async fn set_label(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.patch(
            name,
            "set_label",
            json!({ "metadata": { "labels": { key: value } } }),
        )
        .await?;
        info!("Labeled node {} with {}={}", name, key, value);
        Ok(())
    }

    async fn remove_label(&self, name: &str, key: &str) -> Result<()> {
        let Some(node) = self.fetch(name).await? else {
            debug!("Node {} is gone, nothing to unlabel", name);
            return Ok(());
        };
        let present = node
            .metadata
            .labels
            .as_ref()
            .is_some_and(|labels| labels.contains_key(key));
        if !present {
            debug!("Node {} has no label {}", name, key);
            return Ok(());
        }

        // a null value deletes the key
        self.patch(
            name,
            "remove_label",
            json!({ "metadata": { "labels": { key: null } } }),
        )
        .await?;
        info!("Removed label {} from node {}", key, name);
        Ok(())
    }

    async fn add_taint(&self, name: &str, taint: &Taint) -> Result<()> {
        let node = self
            .fetch(name)
            .await?
            .ok_or_else(|| Error::NodeNotFound(name.to_string()))?;
        let mut taints = current_taints(&node);
        let desired = K8sTaint::from(taint);

        match taints.iter_mut().find(|t| taint.matches_k8s(t)) {
            Some(existing) if existing.value == desired.value => {
                debug!("Node {} already has taint {}", name, taint);
                return Ok(());
            }
            Some(existing) => *existing = desired,
            None => taints.push(desired),
        }

        self.write_taints(name, "add_taint", &taints).await?;
        info!("Tainted node {} with {}", name, taint);
        Ok(())
    }

    async fn remove_taint(&self, name: &str, taint: &Taint) -> Result<()> {
        let Some(node) = self.fetch(name).await? else {
            debug!("Node {} is gone, nothing to untaint", name);
            return Ok(());
        };
        let mut taints = current_taints(&node);
        let before = taints.len();
        taints.retain(|t| !taint.matches_k8s(t));

        if taints.len() == before {
            debug!("Node {} has no taint {}", name, taint);
            return Ok(());
        }

        self.write_taints(name, "remove_taint", &taints).await?;
        info!("Removed taint {} from node {}", taint, name);
        Ok(())
    }
}
