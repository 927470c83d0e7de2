//! Error types for the configuration context.

use crate::types::{Capability, NodeAddr};
use thiserror::Error;

/// Result type alias for configuration context operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the configuration context.
#[derive(Error, Debug)]
pub enum Error {
    /// A snapshot could not be accepted.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// A collaborator failed while building a node handle or key router.
    #[error("node error: {0}")]
    Node(#[from] NodeError),

    /// The registry held no nodes when a node was requested.
    #[error("no servers configured for bucket {bucket}")]
    NoServersConfigured { bucket: String },

    /// Every sampled node was dead for the whole retry budget.
    #[error("no servers available after {attempts} attempts")]
    NoServersAvailable { attempts: u32 },

    /// No node in the topology serves the requested capability.
    #[error("no {0} capable node available")]
    ServiceUnavailable(Capability),

    /// The key router could not map a key to a registered node.
    #[error("key could not be routed to a registered node (router returned {addr:?})")]
    Unroutable { addr: Option<NodeAddr> },

    /// The context has been torn down.
    #[error("configuration context for bucket {0} has been disposed")]
    Disposed(String),
}

impl Error {
    /// Check if this error came from snapshot validation or resolution.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config(_))
    }

    /// Check if this error reports a disposed context.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed(_))
    }

    /// Check if this error means no usable node could be handed out.
    pub fn is_node_unavailable(&self) -> bool {
        matches!(
            self,
            Error::NoServersAvailable { .. } | Error::ServiceUnavailable(_)
        )
    }
}

/// Snapshot validation and metadata resolution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A string field did not match the recognized vocabulary.
    #[error("unrecognized {field} value: {value:?}")]
    Unrecognized { field: &'static str, value: String },

    /// A required field was absent or empty.
    #[error("missing {0}")]
    Missing(&'static str),

    /// The snapshot describes a different bucket than this context serves.
    #[error("bucket mismatch: context serves {expected}, snapshot is for {actual}")]
    BucketMismatch { expected: String, actual: String },

    /// The same node address appears more than once.
    #[error("duplicate node address in snapshot: {0}")]
    DuplicateNode(NodeAddr),

    /// The payload could not be parsed.
    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

/// Failures reported by the external collaborators.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Connection pool could not be opened.
    #[error("connection failed to {addr}: {reason}")]
    ConnectionFailed { addr: NodeAddr, reason: String },

    /// Authentication mechanism could not be created.
    #[error("authentication setup failed for {addr}: {reason}")]
    AuthFailed { addr: NodeAddr, reason: String },

    /// Key router could not be built for the snapshot.
    #[error("key router construction failed: {0}")]
    Router(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(ConfigError::Malformed(e.to_string()))
    }
}
