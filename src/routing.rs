//! Key routing seams.
//!
//! The routing algorithm itself (hash ring, partition table) lives outside
//! this crate. The context holds whatever [`KeyRouter`] the configured
//! [`KeyRouterFactory`] builds for the current snapshot and hands it to
//! request dispatch.

use crate::error::NodeError;
use crate::topology::{RoutingKind, TopologySnapshot};
use crate::types::NodeAddr;
use std::sync::Arc;

/// Maps a request's routing key to the node that should serve it.
pub trait KeyRouter: Send + Sync + 'static {
    /// Strategy this router implements.
    fn kind(&self) -> RoutingKind;

    /// Address of the node owning `key`, if any.
    fn route(&self, key: &[u8]) -> Option<NodeAddr>;
}

/// Builds a router for a snapshot.
pub trait KeyRouterFactory: Send + Sync + 'static {
    fn build(
        &self,
        kind: RoutingKind,
        snapshot: &TopologySnapshot,
    ) -> Result<Arc<dyn KeyRouter>, NodeError>;
}

impl<F> KeyRouterFactory for F
where
    F: Fn(RoutingKind, &TopologySnapshot) -> Result<Arc<dyn KeyRouter>, NodeError>
        + Send
        + Sync
        + 'static,
{
    fn build(
        &self,
        kind: RoutingKind,
        snapshot: &TopologySnapshot,
    ) -> Result<Arc<dyn KeyRouter>, NodeError> {
        self(kind, snapshot)
    }
}
