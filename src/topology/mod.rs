//! Topology snapshots and their metadata.
//!
//! A [`TopologySnapshot`] is the data-only description of a bucket's cluster
//! as last reported by the configuration service: revision, bucket identity,
//! bucket/routing kinds (as raw strings), transport security flag, and the
//! ordered node list with per-node capabilities.
//!
//! # Example
//!
//! ```rust
//! use bucket_topology::topology::{NodeDescriptor, TopologySnapshot};
//! use bucket_topology::types::Capability;
//!
//! let snapshot = TopologySnapshot::new(1, "default", "couchbase", "vbucket")
//!     .with_node(NodeDescriptor::data("10.0.0.1:11210".parse().unwrap())
//!         .with_capability(Capability::Query));
//!
//! let meta = snapshot.resolve().unwrap();
//! println!("{} bucket routed by {}", meta.bucket_kind, meta.routing_kind);
//! ```

mod metadata;
mod snapshot;

pub use metadata::{BucketKind, ResolvedMetadata, RoutingKind};
pub use snapshot::{NodeDescriptor, TopologySnapshot};
