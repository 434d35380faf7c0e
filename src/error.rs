//! Error types for the idle labeler

use thiserror::Error;

/// Errors raised by the sampler, the line protocol and the node client
#[derive(Error, Debug)]
pub enum Error {
    /// Local CPU/battery counters could not be read
    #[error("Telemetry read error: {0}")]
    TelemetryError(String),

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// A control-plane mutation was rejected or never reached the API server
    #[error("{operation} on node {node} failed: {message}")]
    MutationError {
        node: String,
        operation: String,
        message: String,
    },

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// Malformed status line
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Whether this error came from a control-plane call
    pub fn is_mutation_failure(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_) | Error::MutationError { .. } | Error::NodeNotFound(_)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
