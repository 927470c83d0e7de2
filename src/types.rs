//! Core types shared across the configuration context.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Configuration generation reported by the cluster.
pub type Revision = u64;

/// Network identity of a cluster node.
pub type NodeAddr = SocketAddr;

/// Kind of traffic a node may serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Key/value data operations.
    Data,
    /// Query service.
    Query,
    /// Index service.
    Index,
    /// View service.
    View,
}

impl Capability {
    /// All capabilities, in view order.
    pub const ALL: [Capability; 4] = [
        Capability::Data,
        Capability::Query,
        Capability::Index,
        Capability::View,
    ];

    fn bit(self) -> u8 {
        match self {
            Capability::Data => 0b0001,
            Capability::Query => 0b0010,
            Capability::Index => 0b0100,
            Capability::View => 0b1000,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Data => write!(f, "data"),
            Capability::Query => write!(f, "query"),
            Capability::Index => write!(f, "index"),
            Capability::View => write!(f, "view"),
        }
    }
}

/// Set of capabilities advertised for a node.
///
/// Serialized as a list of service names, e.g. `["data", "query"]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Capability>", into = "Vec<Capability>")]
pub struct Capabilities(u8);

impl Capabilities {
    /// No capabilities.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Every capability.
    pub fn all() -> Self {
        Capability::ALL.into_iter().collect()
    }

    /// Rebuild from raw bits, ignoring unknown ones.
    pub(crate) fn from_bits(bits: u8) -> Self {
        Self(bits & 0b1111)
    }

    /// Raw bit representation.
    pub(crate) fn bits(self) -> u8 {
        self.0
    }

    /// Add a capability.
    pub fn with(mut self, capability: Capability) -> Self {
        self.0 |= capability.bit();
        self
    }

    /// Check whether a capability is present.
    pub fn contains(self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    /// Check whether no capability is present.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the present capabilities in view order.
    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl From<Vec<Capability>> for Capabilities {
    fn from(list: Vec<Capability>) -> Self {
        list.into_iter().collect()
    }
}

impl From<Capabilities> for Vec<Capability> {
    fn from(caps: Capabilities) -> Self {
        caps.iter().collect()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
