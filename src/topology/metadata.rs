//! Resolution of the free-form bucket and routing kind strings.
//!
//! Both fields arrive as strings from the configuration service and are
//! matched case-insensitively against fixed lookup tables. Anything outside
//! the tables is a [`ConfigError::Unrecognized`].

use crate::error::ConfigError;
use std::fmt;

/// Storage model of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    /// Persistent, replicated bucket.
    Couchbase,
    /// Memory-only bucket without replication.
    Memcached,
    /// Memory-only bucket with replication.
    Ephemeral,
}

/// Key routing strategy advertised for a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutingKind {
    /// Consistent hash ring over the node list.
    HashRing,
    /// Fixed partition table mapping partitions to nodes.
    PartitionTable,
}

const BUCKET_KINDS: &[(&str, BucketKind)] = &[
    ("couchbase", BucketKind::Couchbase),
    ("membase", BucketKind::Couchbase),
    ("memcached", BucketKind::Memcached),
    ("ephemeral", BucketKind::Ephemeral),
];

const ROUTING_KINDS: &[(&str, RoutingKind)] = &[
    ("hash_ring", RoutingKind::HashRing),
    ("ketama", RoutingKind::HashRing),
    ("partition_table", RoutingKind::PartitionTable),
    ("vbucket", RoutingKind::PartitionTable),
];

fn lookup<T: Copy>(table: &[(&str, T)], field: &'static str, raw: &str) -> Result<T, ConfigError> {
    let needle = raw.trim();
    table
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(needle))
        .map(|(_, kind)| *kind)
        .ok_or_else(|| ConfigError::Unrecognized {
            field,
            value: raw.to_string(),
        })
}

impl BucketKind {
    /// Resolve a raw `bucketKind` value.
    pub fn resolve(raw: &str) -> Result<Self, ConfigError> {
        lookup(BUCKET_KINDS, "bucketKind", raw)
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketKind::Couchbase => "couchbase",
            BucketKind::Memcached => "memcached",
            BucketKind::Ephemeral => "ephemeral",
        }
    }
}

impl RoutingKind {
    /// Resolve a raw `routingKind` value.
    pub fn resolve(raw: &str) -> Result<Self, ConfigError> {
        lookup(ROUTING_KINDS, "routingKind", raw)
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingKind::HashRing => "hash_ring",
            RoutingKind::PartitionTable => "partition_table",
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for RoutingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enumerated metadata resolved from a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedMetadata {
    pub bucket_kind: BucketKind,
    pub routing_kind: RoutingKind,
}
