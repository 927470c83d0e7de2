//! Live node handles owned by the configuration context.

use super::factory::{Endpoint, IoStrategy};
use crate::types::{Capabilities, Capability, NodeAddr};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Shared reference to a live node.
pub type NodeHandle = Arc<Node>;

/// A connected cluster node.
///
/// The registry owns every node; handles given out to callers are shared
/// references and must not outlive the node's usefulness. The liveness flag
/// is driven by health checking outside this crate.
pub struct Node {
    address: NodeAddr,
    endpoint: Endpoint,
    capabilities: AtomicU8,
    dead: AtomicBool,
    closed: AtomicBool,
    io: Arc<dyn IoStrategy>,
}

impl Node {
    pub(crate) fn new(
        address: NodeAddr,
        endpoint: Endpoint,
        capabilities: Capabilities,
        io: Arc<dyn IoStrategy>,
    ) -> Self {
        Self {
            address,
            endpoint,
            capabilities: AtomicU8::new(capabilities.bits()),
            dead: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            io,
        }
    }

    /// Registry key.
    pub fn address(&self) -> NodeAddr {
        self.address
    }

    /// Endpoint the node's pool connects to.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Whether the node's transport is encrypted.
    pub fn is_secure(&self) -> bool {
        self.endpoint.secure
    }

    /// Capabilities from the latest accepted snapshot.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::from_bits(self.capabilities.load(Ordering::Acquire))
    }

    /// Check a single capability.
    pub fn has(&self, capability: Capability) -> bool {
        self.capabilities().contains(capability)
    }

    /// Only called by the context while it holds the write lock.
    pub(crate) fn set_capabilities(&self, capabilities: Capabilities) {
        self.capabilities
            .store(capabilities.bits(), Ordering::Release);
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Mark the node as failing health checks.
    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    /// Mark the node as healthy again.
    pub fn mark_alive(&self) {
        self.dead.store(false, Ordering::Release);
    }

    /// Dispatch strategy for sending requests to this node.
    pub fn io_strategy(&self) -> &Arc<dyn IoStrategy> {
        &self.io
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Release the node's connections.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.io.close();
        true
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("address", &self.address)
            .field("endpoint", &self.endpoint)
            .field("capabilities", &self.capabilities())
            .field("dead", &self.is_dead())
            .field("closed", &self.is_closed())
            .finish()
    }
}
