//! Testing utilities for the configuration context.
//!
//! In-memory doubles for every collaborator seam, so a context can be
//! exercised without a cluster:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          FakeCluster                             │
//! │                                                                  │
//! │   pool factory ──▶ RecordingPool   (fails for chosen endpoints)  │
//! │   io factory   ──▶ RecordingIo     (counts closes, keeps auth)   │
//! │   auth factory ──▶ PlainAuth       (can be made to reject)       │
//! │   router factory ─▶ ModuloRouter   (counts builds)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use bucket_topology::testing::{data_nodes, snapshot, FakeCluster};
//! use bucket_topology::ClientConfig;
//!
//! let cluster = FakeCluster::new();
//! let context = cluster.open(snapshot(1, data_nodes(3)), ClientConfig::default())?;
//!
//! assert_eq!(cluster.built_count(), 3);
//! context.dispose();
//! assert_eq!(cluster.close_count(), 3);
//! ```

#[cfg(test)]
mod context_tests;

use crate::config::{ClientConfig, PoolConfig};
use crate::context::ConfigContext;
use crate::error::{NodeError, Result};
use crate::node::{
    AuthFactory, AuthMechanism, ConnectionPool, Endpoint, IoStrategy, IoStrategyFactory,
    NodeFactories, PoolFactory, Transcoder,
};
use crate::routing::{KeyRouter, KeyRouterFactory};
use crate::topology::{NodeDescriptor, RoutingKind, TopologySnapshot};
use crate::types::{NodeAddr, Revision};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Bucket name used by the snapshot helpers.
pub const TEST_BUCKET: &str = "default";

/// Address of the `n`th fake node.
pub fn node_addr(n: u8) -> NodeAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, n)), 11210)
}

/// Data-only descriptors for nodes `1..=count`.
pub fn data_nodes(count: u8) -> Vec<NodeDescriptor> {
    (1..=count)
        .map(|n| NodeDescriptor::data(node_addr(n)))
        .collect()
}

/// Couchbase bucket snapshot routed by hash ring.
pub fn snapshot(
    revision: Revision,
    nodes: impl IntoIterator<Item = NodeDescriptor>,
) -> TopologySnapshot {
    TopologySnapshot::new(revision, TEST_BUCKET, "couchbase", "HASH_RING").with_nodes(nodes)
}

/// Pool that only remembers its endpoint and whether it was closed.
#[derive(Debug)]
pub struct RecordingPool {
    endpoint: Endpoint,
    closes: AtomicUsize,
}

impl RecordingPool {
    pub fn new(endpoint: Endpoint) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            closes: AtomicUsize::new(0),
        })
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl ConnectionPool for RecordingPool {
    fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Dispatch strategy that records its lifecycle.
pub struct RecordingIo {
    pool: Arc<dyn ConnectionPool>,
    auth: Mutex<Option<Arc<dyn AuthMechanism>>>,
    closes: AtomicUsize,
}

impl RecordingIo {
    pub fn new(pool: Arc<dyn ConnectionPool>) -> Arc<Self> {
        Arc::new(Self {
            pool,
            auth: Mutex::new(None),
            closes: AtomicUsize::new(0),
        })
    }

    /// Strategy over a plaintext pool not tied to any cluster.
    pub fn detached() -> Arc<Self> {
        Self::new(RecordingPool::new(Endpoint {
            addr: node_addr(0),
            secure: false,
        }))
    }

    pub fn endpoint(&self) -> Endpoint {
        self.pool.endpoint()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Mechanism name of the attached authenticator.
    pub fn auth_mechanism(&self) -> Option<String> {
        self.auth
            .lock()
            .as_ref()
            .map(|auth| auth.mechanism().to_string())
    }
}

impl IoStrategy for RecordingIo {
    fn pool(&self) -> Arc<dyn ConnectionPool> {
        self.pool.clone()
    }

    fn set_auth(&self, auth: Arc<dyn AuthMechanism>) {
        *self.auth.lock() = Some(auth);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.pool.close();
    }
}

/// `PLAIN` authenticator for one bucket.
#[derive(Debug)]
pub struct PlainAuth {
    bucket: String,
}

impl AuthMechanism for PlainAuth {
    fn mechanism(&self) -> &str {
        "PLAIN"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// Pass-through transcoder.
#[derive(Debug)]
pub struct RawTranscoder;

impl Transcoder for RawTranscoder {
    fn name(&self) -> &str {
        "raw"
    }
}

/// Router that picks a node by summing the key's bytes.
#[derive(Debug)]
pub struct ModuloRouter {
    kind: RoutingKind,
    nodes: Vec<NodeAddr>,
}

impl ModuloRouter {
    pub fn new(kind: RoutingKind, snapshot: &TopologySnapshot) -> Self {
        Self {
            kind,
            nodes: snapshot.nodes().iter().map(|node| node.address).collect(),
        }
    }
}

impl KeyRouter for ModuloRouter {
    fn kind(&self) -> RoutingKind {
        self.kind
    }

    fn route(&self, key: &[u8]) -> Option<NodeAddr> {
        if self.nodes.is_empty() {
            return None;
        }
        let sum: usize = key.iter().map(|&b| b as usize).sum();
        Some(self.nodes[sum % self.nodes.len()])
    }
}

/// In-memory cluster backing every collaborator factory.
#[derive(Default)]
pub struct FakeCluster {
    built: Mutex<Vec<Arc<RecordingIo>>>,
    unreachable: Mutex<HashSet<SocketAddr>>,
    reject_auth: AtomicBool,
    reject_router: AtomicBool,
    router_builds: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pool construction fails for this endpoint address.
    pub fn make_unreachable(&self, addr: SocketAddr) {
        self.unreachable.lock().insert(addr);
    }

    pub fn make_reachable(&self, addr: SocketAddr) {
        self.unreachable.lock().remove(&addr);
    }

    pub fn reject_auth(&self, reject: bool) {
        self.reject_auth.store(reject, Ordering::SeqCst);
    }

    pub fn reject_router(&self, reject: bool) {
        self.reject_router.store(reject, Ordering::SeqCst);
    }

    /// Every strategy built so far, in build order.
    pub fn built(&self) -> Vec<Arc<RecordingIo>> {
        self.built.lock().clone()
    }

    pub fn built_count(&self) -> usize {
        self.built.lock().len()
    }

    /// Total closes across every strategy built.
    pub fn close_count(&self) -> usize {
        self.built.lock().iter().map(|io| io.close_count()).sum()
    }

    /// Strategies closed more than once.
    pub fn double_closed(&self) -> usize {
        self.built
            .lock()
            .iter()
            .filter(|io| io.close_count() > 1)
            .count()
    }

    /// Strategies built but not yet closed.
    pub fn open_count(&self) -> usize {
        self.built
            .lock()
            .iter()
            .filter(|io| io.close_count() == 0)
            .count()
    }

    pub fn router_builds(&self) -> usize {
        self.router_builds.load(Ordering::SeqCst)
    }

    /// Collaborator factories backed by this cluster.
    pub fn factories(self: &Arc<Self>) -> NodeFactories {
        let cluster = self.clone();
        let pool: PoolFactory = Arc::new(
            move |_config: &PoolConfig, endpoint: Endpoint| -> std::result::Result<Arc<dyn ConnectionPool>, NodeError> {
                if cluster.unreachable.lock().contains(&endpoint.addr) {
                    return Err(NodeError::ConnectionFailed {
                        addr: endpoint.addr,
                        reason: "connection refused".to_string(),
                    });
                }
                Ok(RecordingPool::new(endpoint))
            },
        );

        let cluster = self.clone();
        let io_strategy: IoStrategyFactory = Arc::new(move |pool: Arc<dyn ConnectionPool>| {
            let io = RecordingIo::new(pool);
            cluster.built.lock().push(io.clone());
            io as Arc<dyn IoStrategy>
        });

        let cluster = self.clone();
        let auth: AuthFactory = Arc::new(
            move |bucket: &str,
                  _password: &str,
                  io: Arc<dyn IoStrategy>,
                  _transcoder: Arc<dyn Transcoder>|
                  -> std::result::Result<Arc<dyn AuthMechanism>, NodeError> {
                if cluster.reject_auth.load(Ordering::SeqCst) {
                    return Err(NodeError::AuthFailed {
                        addr: io.pool().endpoint().addr,
                        reason: "invalid credentials".to_string(),
                    });
                }
                Ok(Arc::new(PlainAuth {
                    bucket: bucket.to_string(),
                }))
            },
        );

        NodeFactories::new(pool, io_strategy, auth, Arc::new(RawTranscoder))
    }

    /// Router factory backed by this cluster.
    pub fn router_factory(self: &Arc<Self>) -> Arc<dyn KeyRouterFactory> {
        self.clone()
    }

    /// Create a context without loading it.
    pub fn context(
        self: &Arc<Self>,
        snapshot: TopologySnapshot,
        config: ClientConfig,
    ) -> Result<ConfigContext> {
        ConfigContext::new(
            snapshot,
            Arc::new(config),
            self.factories(),
            self.router_factory(),
        )
    }

    /// Create and load a context.
    pub fn open(
        self: &Arc<Self>,
        snapshot: TopologySnapshot,
        config: ClientConfig,
    ) -> Result<ConfigContext> {
        ConfigContext::open(
            snapshot,
            Arc::new(config),
            self.factories(),
            self.router_factory(),
        )
    }
}

impl KeyRouterFactory for FakeCluster {
    fn build(
        &self,
        kind: RoutingKind,
        snapshot: &TopologySnapshot,
    ) -> std::result::Result<Arc<dyn KeyRouter>, NodeError> {
        if self.reject_router.load(Ordering::SeqCst) {
            return Err(NodeError::Router(format!(
                "no {kind} router for revision {}",
                snapshot.revision()
            )));
        }
        self.router_builds.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ModuloRouter::new(kind, snapshot)))
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout` passes.
pub fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let start = Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
