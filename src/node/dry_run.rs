//! Dry-run wrapper: reads go through, writes are only logged

use async_trait::async_trait;
use tracing::info;

use super::client::{NodeClient, NodeState};
use super::taints::Taint;
use crate::error::Result;

pub struct DryRunNodeClient<C> {
    inner: C,
}

impl<C: NodeClient> DryRunNodeClient<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<C: NodeClient> NodeClient for DryRunNodeClient<C> {
    async fn get_node(&self, name: &str) -> Result<NodeState> {
        self.inner.get_node(name).await
    }

    async fn set_label(&self, name: &str, key: &str, value: &str) -> Result<()> {
        info!("[dry-run] would label node {} with {}={}", name, key, value);
        Ok(())
    }

    async fn remove_label(&self, name: &str, key: &str) -> Result<()> {
        info!("[dry-run] would remove label {} from node {}", key, name);
        Ok(())
    }

    async fn add_taint(&self, name: &str, taint: &Taint) -> Result<()> {
        info!("[dry-run] would taint node {} with {}", name, taint);
        Ok(())
    }

    async fn remove_taint(&self, name: &str, taint: &Taint) -> Result<()> {
        info!("[dry-run] would remove taint {} from node {}", taint, name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::fake::{FakeNodeClient, NodeCall};
    use crate::node::TaintEffect;

    #[tokio::test]
    async fn test_dry_run_never_writes() {
        let fake = FakeNodeClient::with_node("n1", NodeState::default());
        let client = DryRunNodeClient::new(fake.clone());

        client.set_label("n1", "idle", "false").await.unwrap();
        client
            .add_taint("n1", &Taint::new("idle", "false", TaintEffect::NoExecute))
            .await
            .unwrap();
        let state = client.get_node("n1").await.unwrap();

        assert_eq!(state, NodeState::default());
        assert_eq!(fake.calls(), vec![NodeCall::GetNode]);
    }
}
