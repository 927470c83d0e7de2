//! Immutable topology snapshot as reported by the configuration service.

use super::metadata::{BucketKind, ResolvedMetadata, RoutingKind};
use crate::error::{ConfigError, Result};
use crate::types::{Capabilities, Capability, NodeAddr, Revision};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;

/// One node as described by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    /// Plain key/value address; the node's identity in the registry.
    pub address: NodeAddr,

    /// TLS key/value port, if advertised.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_port: Option<u16>,

    /// Traffic this node serves.
    #[serde(default, rename = "services")]
    pub capabilities: Capabilities,
}

impl NodeDescriptor {
    /// Create a descriptor.
    pub fn new(address: NodeAddr, capabilities: Capabilities) -> Self {
        Self {
            address,
            tls_port: None,
            capabilities,
        }
    }

    /// Create a descriptor for a data-only node.
    pub fn data(address: NodeAddr) -> Self {
        Self::new(address, Capabilities::empty().with(Capability::Data))
    }

    /// Set the advertised TLS port.
    pub fn with_tls_port(mut self, port: u16) -> Self {
        self.tls_port = Some(port);
        self
    }

    /// Add a capability.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities = self.capabilities.with(capability);
        self
    }

    /// Endpoint to open connections against.
    pub fn endpoint(&self, tls: bool, default_tls_port: u16) -> SocketAddr {
        if tls {
            SocketAddr::new(
                self.address.ip(),
                self.tls_port.unwrap_or(default_tls_port),
            )
        } else {
            self.address
        }
    }
}

/// Point-in-time description of a bucket's cluster topology.
///
/// A snapshot is never modified once handed to a context; reconfiguration
/// always swaps in a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopologySnapshot {
    revision: Revision,
    bucket_name: String,
    bucket_kind: String,
    routing_kind: String,
    #[serde(default)]
    use_encrypted_transport: bool,
    #[serde(default)]
    nodes: Vec<NodeDescriptor>,
}

impl TopologySnapshot {
    /// Create a snapshot with no nodes.
    pub fn new(
        revision: Revision,
        bucket_name: impl Into<String>,
        bucket_kind: impl Into<String>,
        routing_kind: impl Into<String>,
    ) -> Self {
        Self {
            revision,
            bucket_name: bucket_name.into(),
            bucket_kind: bucket_kind.into(),
            routing_kind: routing_kind.into(),
            use_encrypted_transport: false,
            nodes: Vec::new(),
        }
    }

    /// Request encrypted transport for this bucket.
    pub fn with_encrypted_transport(mut self, enabled: bool) -> Self {
        self.use_encrypted_transport = enabled;
        self
    }

    /// Append a node descriptor.
    pub fn with_node(mut self, node: NodeDescriptor) -> Self {
        self.nodes.push(node);
        self
    }

    /// Append several node descriptors.
    pub fn with_nodes(mut self, nodes: impl IntoIterator<Item = NodeDescriptor>) -> Self {
        self.nodes.extend(nodes);
        self
    }

    /// Parse the configuration service payload.
    pub fn from_json(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    /// Render as JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    /// Raw, unresolved bucket kind.
    pub fn raw_bucket_kind(&self) -> &str {
        &self.bucket_kind
    }

    /// Raw, unresolved routing kind.
    pub fn raw_routing_kind(&self) -> &str {
        &self.routing_kind
    }

    pub fn use_encrypted_transport(&self) -> bool {
        self.use_encrypted_transport
    }

    /// Node descriptors in snapshot order.
    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    /// Look up the descriptor for an address.
    pub fn node(&self, address: NodeAddr) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.address == address)
    }

    /// Set of node addresses.
    pub fn addresses(&self) -> HashSet<NodeAddr> {
        self.nodes.iter().map(|n| n.address).collect()
    }

    /// Validate the snapshot and resolve its enumerated metadata.
    pub fn resolve(&self) -> std::result::Result<ResolvedMetadata, ConfigError> {
        if self.bucket_name.trim().is_empty() {
            return Err(ConfigError::Missing("bucketName"));
        }

        let bucket_kind = BucketKind::resolve(&self.bucket_kind)?;
        let routing_kind = RoutingKind::resolve(&self.routing_kind)?;

        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !seen.insert(node.address) {
                return Err(ConfigError::DuplicateNode(node.address));
            }
        }

        Ok(ResolvedMetadata {
            bucket_kind,
            routing_kind,
        })
    }
}
