//! The immutable topology bundle a context publishes.
//!
//! Snapshot, registry, capability views and key router are built together
//! and swapped in with a single assignment, so anything read from one
//! `Topology` belongs to the same generation.

use crate::node::NodeHandle;
use crate::routing::KeyRouter;
use crate::topology::{ResolvedMetadata, TopologySnapshot};
use crate::types::{Capability, NodeAddr, Revision};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Registry handles partitioned by capability.
#[derive(Clone, Default)]
pub struct CapabilityViews {
    data: Vec<NodeHandle>,
    query: Vec<NodeHandle>,
    index: Vec<NodeHandle>,
    view: Vec<NodeHandle>,
}

impl CapabilityViews {
    /// Partition handles by the capabilities the snapshot advertises for them.
    fn build(snapshot: &TopologySnapshot, nodes: &HashMap<NodeAddr, NodeHandle>) -> Self {
        let mut views = Self::default();
        for descriptor in snapshot.nodes() {
            let Some(node) = nodes.get(&descriptor.address) else {
                continue;
            };
            for capability in descriptor.capabilities.iter() {
                views.get_mut(capability).push(node.clone());
            }
        }
        views
    }

    /// Handles serving a capability.
    pub fn get(&self, capability: Capability) -> &[NodeHandle] {
        match capability {
            Capability::Data => &self.data,
            Capability::Query => &self.query,
            Capability::Index => &self.index,
            Capability::View => &self.view,
        }
    }

    fn get_mut(&mut self, capability: Capability) -> &mut Vec<NodeHandle> {
        match capability {
            Capability::Data => &mut self.data,
            Capability::Query => &mut self.query,
            Capability::Index => &mut self.index,
            Capability::View => &mut self.view,
        }
    }
}

impl fmt::Debug for CapabilityViews {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityViews")
            .field("data", &self.data.len())
            .field("query", &self.query.len())
            .field("index", &self.index.len())
            .field("view", &self.view.len())
            .finish()
    }
}

/// One published generation of a bucket's topology.
pub struct Topology {
    snapshot: Arc<TopologySnapshot>,
    metadata: ResolvedMetadata,
    secure: bool,
    ordered: Vec<NodeHandle>,
    nodes: HashMap<NodeAddr, NodeHandle>,
    views: CapabilityViews,
    router: Arc<dyn KeyRouter>,
}

impl Topology {
    /// `ordered` must follow the snapshot's node order.
    pub(crate) fn new(
        snapshot: Arc<TopologySnapshot>,
        metadata: ResolvedMetadata,
        secure: bool,
        ordered: Vec<NodeHandle>,
        router: Arc<dyn KeyRouter>,
    ) -> Self {
        let nodes: HashMap<NodeAddr, NodeHandle> = ordered
            .iter()
            .map(|node| (node.address(), node.clone()))
            .collect();
        let views = CapabilityViews::build(&snapshot, &nodes);

        Self {
            snapshot,
            metadata,
            secure,
            ordered,
            nodes,
            views,
            router,
        }
    }

    /// Same snapshot and router with an empty registry.
    pub(crate) fn cleared(&self) -> Self {
        Self {
            snapshot: self.snapshot.clone(),
            metadata: self.metadata,
            secure: self.secure,
            ordered: Vec::new(),
            nodes: HashMap::new(),
            views: CapabilityViews::default(),
            router: self.router.clone(),
        }
    }

    pub fn snapshot(&self) -> &Arc<TopologySnapshot> {
        &self.snapshot
    }

    pub fn revision(&self) -> Revision {
        self.snapshot.revision()
    }

    pub fn metadata(&self) -> ResolvedMetadata {
        self.metadata
    }

    /// Transport security the registry's handles were built with.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Registry handles in snapshot order.
    pub fn nodes(&self) -> &[NodeHandle] {
        &self.ordered
    }

    pub fn node(&self, addr: NodeAddr) -> Option<&NodeHandle> {
        self.nodes.get(&addr)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn views(&self) -> &CapabilityViews {
        &self.views
    }

    /// Handles serving a capability.
    pub fn view(&self, capability: Capability) -> &[NodeHandle] {
        self.views.get(capability)
    }

    pub fn router(&self) -> &Arc<dyn KeyRouter> {
        &self.router
    }

    /// Check that registry and views agree with the snapshot.
    ///
    /// Every snapshot address has a handle, every handle belongs to the
    /// snapshot, every view member is in the registry, and each handle's
    /// capabilities match its descriptor.
    ///
    /// Handles are shared between generations, so a reused handle carries the
    /// newest capabilities once a later generation is published. Run this
    /// through [`ConfigContext::inspect`](super::ConfigContext::inspect) to
    /// check it against the generation that is currently published.
    pub fn is_consistent(&self) -> bool {
        if self.nodes.len() != self.snapshot.nodes().len() {
            return false;
        }

        let registry_matches = self.snapshot.nodes().iter().all(|descriptor| {
            self.nodes
                .get(&descriptor.address)
                .is_some_and(|node| node.capabilities() == descriptor.capabilities)
        });

        let views_match = Capability::ALL.into_iter().all(|capability| {
            self.view(capability).iter().all(|node| {
                node.has(capability)
                    && self
                        .nodes
                        .get(&node.address())
                        .is_some_and(|held| Arc::ptr_eq(held, node))
            })
        });

        registry_matches && views_match
    }
}

impl fmt::Debug for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topology")
            .field("revision", &self.revision())
            .field("bucket", &self.snapshot.bucket_name())
            .field("metadata", &self.metadata)
            .field("secure", &self.secure)
            .field("nodes", &self.ordered.len())
            .field("views", &self.views)
            .finish()
    }
}
