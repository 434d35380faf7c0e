//! Node metadata access
//!
//! The [`NodeClient`] trait is the only way the reconciler touches the
//! control plane. [`KubeNodeClient`] talks to the Kubernetes API,
//! [`FakeNodeClient`] keeps everything in memory and [`DryRunNodeClient`]
//! logs writes instead of making them.

pub mod client;
pub mod dry_run;
pub mod fake;
pub mod kube_client;
pub mod taints;

pub use client::{NodeClient, NodeState};
pub use dry_run::DryRunNodeClient;
pub use fake::FakeNodeClient;
pub use kube_client::KubeNodeClient;
pub use taints::{Taint, TaintEffect};

use tracing::info;

use crate::error::{Error, Result};

/// Label and taint key managed by the labeler
pub const IDLE_KEY: &str = "idle";

/// Taint that evicts opportunistic workloads from a busy node
pub fn busy_taint() -> Taint {
    Taint::new(IDLE_KEY, "false", TaintEffect::NoExecute)
}

/// Resolve the name of the node this process manages.
///
/// An explicit override wins; otherwise the lowercased hostname is used,
/// matching how kubelet registers nodes by default.
pub fn resolve_node_name(override_name: Option<&str>) -> Result<String> {
    if let Some(name) = override_name.map(str::trim).filter(|n| !n.is_empty()) {
        info!("Using configured node name: {}", name);
        return Ok(name.to_string());
    }

    let host = hostname::get()
        .map_err(|e| Error::ConfigError(format!("cannot read hostname: {e}")))?
        .into_string()
        .map_err(|raw| Error::ConfigError(format!("hostname is not valid UTF-8: {raw:?}")))?;
    let name = host.trim().to_lowercase();
    if name.is_empty() {
        return Err(Error::ConfigError("hostname is empty".to_string()));
    }

    info!("Using hostname as node name: {}", name);
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_taint() {
        assert_eq!(busy_taint().to_string(), "idle=false:NoExecute");
    }

    #[test]
    fn test_override_wins() {
        assert_eq!(resolve_node_name(Some(" Worker-7 ")).unwrap(), "Worker-7");
    }

    #[test]
    fn test_hostname_fallback_is_lowercase() {
        let name = resolve_node_name(Some("  ")).unwrap();
        assert!(!name.is_empty());
        assert_eq!(name, name.to_lowercase());
    }
}
