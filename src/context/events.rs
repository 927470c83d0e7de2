//! Topology change events.

use crate::types::{NodeAddr, Revision};

/// Events emitted by a configuration context after a change is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyEvent {
    /// A node handle was created for a new address.
    NodeAdded {
        /// The node's address.
        addr: NodeAddr,
    },

    /// A node handle was released because its address left the topology
    /// or its transport had to be rebuilt.
    NodeRemoved {
        /// The node's address.
        addr: NodeAddr,
    },

    /// A new snapshot was published.
    Reconfigured {
        /// Revision that was active before, if any was loaded.
        previous: Option<Revision>,
        /// Revision now active.
        current: Revision,
    },

    /// The context was torn down.
    Disposed {
        /// Number of node handles released by the teardown.
        released: usize,
    },
}

impl TopologyEvent {
    /// Address affected by this event, if it concerns a single node.
    pub fn addr(&self) -> Option<NodeAddr> {
        match self {
            TopologyEvent::NodeAdded { addr } | TopologyEvent::NodeRemoved { addr } => Some(*addr),
            TopologyEvent::Reconfigured { .. } | TopologyEvent::Disposed { .. } => None,
        }
    }
}

/// Listener for topology events.
///
/// Called after the context has released its lock, so listeners may call
/// back into the context.
pub trait TopologyListener: Send + Sync + 'static {
    fn on_event(&self, event: &TopologyEvent);
}

/// No-op event listener.
pub struct NoopListener;

impl TopologyListener for NoopListener {
    fn on_event(&self, _event: &TopologyEvent) {}
}

/// Event listener that logs events.
pub struct LoggingListener;

impl TopologyListener for LoggingListener {
    fn on_event(&self, event: &TopologyEvent) {
        match event {
            TopologyEvent::NodeAdded { addr } => {
                tracing::info!(%addr, "Node added to topology");
            }
            TopologyEvent::NodeRemoved { addr } => {
                tracing::info!(%addr, "Node removed from topology");
            }
            TopologyEvent::Reconfigured { previous, current } => {
                tracing::info!(?previous, current, "Topology reconfigured");
            }
            TopologyEvent::Disposed { released } => {
                tracing::info!(released, "Topology context disposed");
            }
        }
    }
}
