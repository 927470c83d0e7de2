//! The configuration context for one bucket.
//!
//! A [`ConfigContext`] owns the bucket's current [`TopologySnapshot`], the
//! registry of live node handles, the four capability views and the key
//! router, and hands them out to request dispatch from many threads at once.
//!
//! # Architecture
//!
//! ```text
//!   config poll / push                         request dispatch threads
//!          │                                      │      │      │
//!          ▼                                      ▼      ▼      ▼
//!   reload(snapshot, force)                 acquire_*_node / key_router
//!          │  upgradable read                     │  shared read
//!          ▼                                      ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                RwLock<ContextState>                               │
//! │   phase ─ Uninitialized │ Loaded │ Disposed                       │
//! │   topology: Arc<Topology>                                         │
//! │     snapshot · registry · data/query/index/view views · router    │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Locking
//!
//! - Readers take the shared lock. `acquire_any_node` drops it for every
//!   backoff sleep and takes it again before the next sample.
//! - A reload builds the next [`Topology`] under an upgradable read (readers
//!   keep running, other writers wait), then upgrades to the exclusive lock
//!   only to swap the `Arc` and apply capability updates to reused handles.
//! - Handles dropped from the topology are closed after the lock is released.
//! - Disposal takes the exclusive lock, closes every handle and marks the
//!   context disposed. A second disposal is a no-op.
//!
//! # Example
//!
//! ```rust,ignore
//! use bucket_topology::{ClientConfig, ConfigContext, TopologySnapshot};
//! use std::sync::Arc;
//!
//! let context = ConfigContext::open(snapshot, Arc::new(ClientConfig::default()), factories, router_factory)?;
//! let node = context.acquire_data_node()?;
//!
//! // later, from the config poller
//! context.reload(newer_snapshot, false)?;
//!
//! context.dispose();
//! ```

mod acquire;
mod events;
mod published;
mod reload;

pub use events::{LoggingListener, NoopListener, TopologyEvent, TopologyListener};
pub use published::{CapabilityViews, Topology};
pub use reload::ReloadOutcome;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::metrics::{ContextCounter, ContextGauge, ContextMetrics};
use crate::node::{NodeFactories, NodeHandle};
use crate::routing::{KeyRouter, KeyRouterFactory};
use crate::topology::{BucketKind, RoutingKind, TopologySnapshot};
use crate::types::{Capability, NodeAddr, Revision};
use parking_lot::{RwLock, RwLockReadGuard};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info};

/// Externally visible lifecycle of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created, no node handles built yet.
    Uninitialized,
    /// A topology is published.
    Loaded,
    /// A reconfiguration is in progress; the previous topology is still published.
    Reloading,
    /// Torn down; every operation fails.
    Disposed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "uninitialized"),
            LifecycleState::Loaded => write!(f, "loaded"),
            LifecycleState::Reloading => write!(f, "reloading"),
            LifecycleState::Disposed => write!(f, "disposed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Loaded,
    Disposed,
}

struct ContextState {
    phase: Phase,
    topology: Arc<Topology>,
}

/// Authoritative, continuously refreshed topology view for one bucket.
pub struct ConfigContext {
    bucket_name: String,
    created_at: SystemTime,
    client_config: Arc<ClientConfig>,
    factories: NodeFactories,
    router_factory: Arc<dyn KeyRouterFactory>,
    state: RwLock<ContextState>,
    /// Reconfigurations currently in flight.
    reloading: AtomicUsize,
    listeners: RwLock<Vec<Arc<dyn TopologyListener>>>,
    metrics: Arc<ContextMetrics>,
}

impl ConfigContext {
    /// Create a context for the bucket described by `snapshot`.
    ///
    /// The snapshot is validated and its key router built, but no node
    /// handles exist until [`load`](Self::load) runs.
    pub fn new(
        snapshot: TopologySnapshot,
        client_config: Arc<ClientConfig>,
        factories: NodeFactories,
        router_factory: Arc<dyn KeyRouterFactory>,
    ) -> Result<Self> {
        let metadata = snapshot.resolve()?;
        let router = router_factory.build(metadata.routing_kind, &snapshot)?;
        let secure = snapshot.use_encrypted_transport() || client_config.use_tls;
        let bucket_name = snapshot.bucket_name().to_string();

        debug!(
            bucket = %bucket_name,
            revision = snapshot.revision(),
            bucket_kind = %metadata.bucket_kind,
            routing_kind = %metadata.routing_kind,
            "Created configuration context"
        );

        let topology = Topology::new(Arc::new(snapshot), metadata, secure, Vec::new(), router);

        Ok(Self {
            bucket_name,
            created_at: SystemTime::now(),
            client_config,
            factories,
            router_factory,
            state: RwLock::new(ContextState {
                phase: Phase::Uninitialized,
                topology: Arc::new(topology),
            }),
            reloading: AtomicUsize::new(0),
            listeners: RwLock::new(Vec::new()),
            metrics: Arc::new(ContextMetrics::new()),
        })
    }

    /// Create a context and perform the initial load.
    ///
    /// If the load fails the context is disposed before the error is returned.
    pub fn open(
        snapshot: TopologySnapshot,
        client_config: Arc<ClientConfig>,
        factories: NodeFactories,
        router_factory: Arc<dyn KeyRouterFactory>,
    ) -> Result<Self> {
        let context = Self::new(snapshot, client_config, factories, router_factory)?;
        if let Err(e) = context.load() {
            context.dispose();
            return Err(e);
        }
        Ok(context)
    }

    /// Register a listener for topology events.
    pub fn add_listener(&self, listener: Arc<dyn TopologyListener>) {
        self.listeners.write().push(listener);
    }

    fn notify(&self, events: &[TopologyEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            for event in events {
                listener.on_event(event);
            }
        }
    }

    fn disposed_error(&self) -> Error {
        Error::Disposed(self.bucket_name.clone())
    }

    fn no_servers_error(&self) -> Error {
        Error::NoServersConfigured {
            bucket: self.bucket_name.clone(),
        }
    }

    fn ensure_live(&self) -> Result<()> {
        self.read_state().map(drop)
    }

    /// Shared lock on a context that has not been disposed.
    fn read_state(&self) -> Result<RwLockReadGuard<'_, ContextState>> {
        let state = self.state.read();
        if state.phase == Phase::Disposed {
            return Err(self.disposed_error());
        }
        Ok(state)
    }

    // ==================== Read accessors ====================

    /// The published topology generation.
    ///
    /// Reused handles are shared with later generations; see
    /// [`Topology::is_consistent`].
    pub fn topology(&self) -> Result<Arc<Topology>> {
        Ok(self.read_state()?.topology.clone())
    }

    /// Run `f` against the published topology while holding the shared lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&Topology) -> R) -> Result<R> {
        let state = self.read_state()?;
        Ok(f(&state.topology))
    }

    /// The active snapshot.
    pub fn current_bucket_config(&self) -> Result<Arc<TopologySnapshot>> {
        Ok(self.read_state()?.topology.snapshot().clone())
    }

    /// Name of the bucket this context serves.
    pub fn bucket_name(&self) -> Result<&str> {
        self.ensure_live()?;
        Ok(&self.bucket_name)
    }

    /// Bucket kind resolved from the active snapshot.
    pub fn bucket_kind(&self) -> Result<BucketKind> {
        Ok(self.read_state()?.topology.metadata().bucket_kind)
    }

    /// Key routing scheme resolved from the active snapshot.
    pub fn routing_kind(&self) -> Result<RoutingKind> {
        Ok(self.read_state()?.topology.metadata().routing_kind)
    }

    /// Revision of the active snapshot.
    pub fn revision(&self) -> Result<Revision> {
        Ok(self.read_state()?.topology.revision())
    }

    /// When this context was created.
    pub fn creation_timestamp(&self) -> Result<SystemTime> {
        self.ensure_live()?;
        Ok(self.created_at)
    }

    /// The key router for the active snapshot.
    pub fn key_router(&self) -> Result<Arc<dyn KeyRouter>> {
        Ok(self.read_state()?.topology.router().clone())
    }

    /// Whether connections must be encrypted: the snapshot's flag OR the
    /// client-wide setting.
    pub fn effective_tls_required(&self) -> Result<bool> {
        let state = self.read_state()?;
        Ok(state.topology.snapshot().use_encrypted_transport() || self.client_config.use_tls)
    }

    /// Copy of every registered handle, in snapshot order.
    pub fn all_nodes(&self) -> Result<Vec<NodeHandle>> {
        Ok(self.read_state()?.topology.nodes().to_vec())
    }

    /// Copy of the handles serving a capability.
    pub fn nodes_with(&self, capability: Capability) -> Result<Vec<NodeHandle>> {
        Ok(self.read_state()?.topology.view(capability).to_vec())
    }

    /// Handle registered for an address.
    pub fn node(&self, addr: NodeAddr) -> Result<Option<NodeHandle>> {
        Ok(self.read_state()?.topology.node(addr).cloned())
    }

    /// Whether any node serves a capability.
    pub fn has_capability(&self, capability: Capability) -> Result<bool> {
        Ok(!self.read_state()?.topology.view(capability).is_empty())
    }

    /// Whether any node serves key-value traffic.
    pub fn is_data_capable(&self) -> Result<bool> {
        self.has_capability(Capability::Data)
    }

    /// Whether any node serves N1QL queries.
    pub fn is_query_capable(&self) -> Result<bool> {
        self.has_capability(Capability::Query)
    }

    /// Whether any node runs the index service.
    pub fn is_index_capable(&self) -> Result<bool> {
        self.has_capability(Capability::Index)
    }

    /// Whether any node serves view queries.
    pub fn is_view_capable(&self) -> Result<bool> {
        self.has_capability(Capability::View)
    }

    // ==================== Status ====================

    /// Current lifecycle state. Never fails, including after disposal.
    pub fn lifecycle(&self) -> LifecycleState {
        match self.state.read().phase {
            Phase::Disposed => LifecycleState::Disposed,
            _ if self.reloading.load(Ordering::Acquire) > 0 => LifecycleState::Reloading,
            Phase::Uninitialized => LifecycleState::Uninitialized,
            Phase::Loaded => LifecycleState::Loaded,
        }
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.state.read().phase == Phase::Disposed
    }

    /// Counters and gauges recorded by this context.
    pub fn metrics(&self) -> &Arc<ContextMetrics> {
        &self.metrics
    }

    /// Client settings the context was created with.
    pub fn client_config(&self) -> &Arc<ClientConfig> {
        &self.client_config
    }

    // ==================== Teardown ====================

    /// Release every node handle and make the context unusable.
    ///
    /// Safe to call any number of times from any number of threads; only
    /// the first call does anything.
    pub fn dispose(&self) {
        let released = {
            let mut state = self.state.write();
            if state.phase == Phase::Disposed {
                debug!(bucket = %self.bucket_name, "Configuration context already disposed");
                return;
            }

            let released = self.release(state.topology.nodes());
            state.topology = Arc::new(state.topology.cleared());
            state.phase = Phase::Disposed;
            released
        };

        self.metrics.set_gauge(ContextGauge::RegistryNodes, 0);
        info!(bucket = %self.bucket_name, released, "Disposed configuration context");
        self.notify(&[TopologyEvent::Disposed { released }]);
    }

    /// Close handles, returning how many were closed by this call.
    fn release<'a>(&self, nodes: impl IntoIterator<Item = &'a NodeHandle>) -> usize {
        let released = nodes.into_iter().filter(|node| node.close()).count();
        self.metrics.add(ContextCounter::NodesReleased, released as u64);
        released
    }
}

impl Drop for ConfigContext {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.phase == Phase::Disposed {
            return;
        }

        #[cfg(debug_assertions)]
        tracing::warn!(
            bucket = %self.bucket_name,
            nodes = state.topology.len(),
            "Configuration context dropped without dispose; releasing node handles"
        );

        let released = state.topology.nodes().iter().filter(|node| node.close()).count();
        self.metrics.add(ContextCounter::NodesReleased, released as u64);
        state.phase = Phase::Disposed;
    }
}

impl fmt::Debug for ConfigContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("ConfigContext")
            .field("bucket", &self.bucket_name)
            .field("created_at", &self.created_at)
            .field("phase", &state.phase)
            .field("topology", &state.topology)
            .finish()
    }
}
