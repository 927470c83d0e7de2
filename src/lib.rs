//! Per-bucket cluster configuration context for a database client driver.
//!
//! This crate keeps a client's view of one bucket's cluster current while
//! request dispatch reads it from many threads:
//! - **Topology snapshots** as reported by the configuration service
//! - **Node handles** built through pluggable pool, dispatch and auth factories
//! - **Capability views** for data, query, index and view traffic
//! - **Key routing** through a pluggable router rebuilt with the topology
//!
//! # Features
//!
//! - Revision-ordered reconfiguration with atomic publication
//! - Handle reuse across reconfigurations, release of departed nodes
//! - Bounded exponential backoff when every node is marked dead
//! - Effective TLS from the snapshot flag and the client setting
//! - Idempotent teardown that closes every handle exactly once
//!
//! # Example
//!
//! ```rust,ignore
//! use bucket_topology::{ClientConfig, ConfigContext, TopologySnapshot};
//! use std::sync::Arc;
//!
//! fn run(factories: NodeFactories, router: Arc<dyn KeyRouterFactory>) -> bucket_topology::Result<()> {
//!     let snapshot = TopologySnapshot::from_json(&payload)?;
//!     let context = ConfigContext::open(snapshot, Arc::new(ClientConfig::default()), factories, router)?;
//!
//!     // Any live node, retried with backoff if all are dead
//!     let node = context.acquire_any_node()?;
//!
//!     // A node serving N1QL queries
//!     let query = context.acquire_query_node()?;
//!
//!     // Newer configuration from the cluster
//!     context.reload(TopologySnapshot::from_json(&newer)?, false)?;
//!
//!     context.dispose();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          Request dispatch / poller          │
//! └─────────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────────┐
//! │             ConfigContext API               │
//! │  • acquire_*_node() -> NodeHandle           │
//! │  • key_router() / route_key()               │
//! │  • reload(snapshot, force)                  │
//! │  • dispose()                                │
//! └─────────────────────────────────────────────┘
//!                     │
//!     ┌───────────────┼───────────────┐
//!     ▼               ▼               ▼
//! ┌─────────┐   ┌──────────┐   ┌───────────┐
//! │Topology │   │  Node    │   │ KeyRouter │
//! │Snapshot │   │ Registry │   │  (seam)   │
//! └─────────┘   └──────────┘   └───────────┘
//! ```
//!
//! # Consistency Model
//!
//! - **Reads**: every accessor sees one published generation
//! - **Reloads**: serialized; readers keep running until the final swap
//! - **Revisions**: never go backwards unless a reload is forced

pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod node;
pub mod routing;
pub mod testing;
pub mod topology;
pub mod types;

// Re-export main types for convenience
pub use config::{ClientConfig, PoolConfig, RetryConfig, DEFAULT_TLS_PORT};
pub use context::{
    CapabilityViews, ConfigContext, LifecycleState, LoggingListener, NoopListener, ReloadOutcome,
    Topology, TopologyEvent, TopologyListener,
};
pub use error::{ConfigError, Error, NodeError, Result};
pub use types::{Capabilities, Capability, NodeAddr, Revision};

// Re-export node and routing seams
pub use node::{
    AuthFactory, AuthMechanism, ConnectionPool, Endpoint, IoStrategy, IoStrategyFactory, Node,
    NodeFactories, NodeHandle, PoolFactory, Transcoder,
};
pub use routing::{KeyRouter, KeyRouterFactory};

// Re-export topology types
pub use topology::{BucketKind, NodeDescriptor, ResolvedMetadata, RoutingKind, TopologySnapshot};

// Re-export metrics types
pub use metrics::{ContextCounter, ContextGauge, ContextMetrics, ContextMetricsSnapshot};

// Re-export testing types
pub use testing::{FakeCluster, ModuloRouter, RecordingIo, RecordingPool};
