//! Node acquisition for request dispatch.

use super::{ConfigContext, Phase};
use crate::error::{Error, Result};
use crate::metrics::ContextCounter;
use crate::node::NodeHandle;
use crate::types::Capability;
use parking_lot::RwLockReadGuard;
use rand::seq::IndexedRandom;
use std::thread;
use tracing::{debug, trace, warn};

impl ConfigContext {
    /// Pick a random live node from the whole registry.
    ///
    /// Each round samples the handles not marked dead. When none is live the
    /// caller sleeps `backoff_unit * 2^round` with the lock released, so
    /// reloads and other readers proceed, then retries against whatever
    /// topology is published by then. Gives up after
    /// [`RetryConfig::max_attempts`](crate::config::RetryConfig::max_attempts)
    /// rounds.
    ///
    /// An empty registry fails immediately with
    /// [`Error::NoServersConfigured`] and never sleeps.
    pub fn acquire_any_node(&self) -> Result<NodeHandle> {
        let retry = &self.client_config.retry;
        let mut state = self.read_state()?;
        if state.topology.is_empty() {
            self.metrics.incr(ContextCounter::AcquireFailures);
            return Err(self.no_servers_error());
        }

        let mut rng = rand::rng();
        for attempt in 0..retry.max_attempts {
            self.metrics.incr(ContextCounter::AcquireRounds);

            let picked = {
                let live: Vec<&NodeHandle> = state
                    .topology
                    .nodes()
                    .iter()
                    .filter(|node| !node.is_dead())
                    .collect();
                live.choose(&mut rng).map(|node| (*node).clone())
            };
            if let Some(node) = picked {
                trace!(bucket = %self.bucket_name, addr = %node.address(), attempt, "Acquired node");
                return Ok(node);
            }

            let delay = retry.backoff(attempt);
            debug!(
                bucket = %self.bucket_name,
                attempt,
                ?delay,
                nodes = state.topology.len(),
                "No live node, backing off"
            );
            self.metrics.record_backoff(delay);
            RwLockReadGuard::unlocked(&mut state, || thread::sleep(delay));

            if state.phase == Phase::Disposed {
                return Err(self.disposed_error());
            }
            if state.topology.is_empty() {
                self.metrics.incr(ContextCounter::AcquireFailures);
                return Err(self.no_servers_error());
            }
        }

        self.metrics.incr(ContextCounter::AcquireFailures);
        warn!(
            bucket = %self.bucket_name,
            attempts = retry.max_attempts,
            nodes = state.topology.len(),
            "No live node within retry budget"
        );
        Err(Error::NoServersAvailable {
            attempts: retry.max_attempts,
        })
    }

    pub fn acquire_data_node(&self) -> Result<NodeHandle> {
        self.acquire_capable(Capability::Data)
    }

    pub fn acquire_query_node(&self) -> Result<NodeHandle> {
        self.acquire_capable(Capability::Query)
    }

    pub fn acquire_index_node(&self) -> Result<NodeHandle> {
        self.acquire_capable(Capability::Index)
    }

    pub fn acquire_view_node(&self) -> Result<NodeHandle> {
        self.acquire_capable(Capability::View)
    }

    /// Pick a random node from a capability view.
    ///
    /// Liveness is not checked and there is no retry; an empty view fails
    /// with [`Error::ServiceUnavailable`].
    pub fn acquire_capable(&self, capability: Capability) -> Result<NodeHandle> {
        let state = self.read_state()?;
        let picked = state
            .topology
            .view(capability)
            .choose(&mut rand::rng())
            .cloned();

        picked.ok_or_else(|| {
            self.metrics.incr(ContextCounter::AcquireFailures);
            debug!(bucket = %self.bucket_name, %capability, "No node serves capability");
            Error::ServiceUnavailable(capability)
        })
    }

    /// Route a key to its node through the active key router.
    pub fn route_key(&self, key: &[u8]) -> Result<NodeHandle> {
        let state = self.read_state()?;
        if state.topology.is_empty() {
            return Err(self.no_servers_error());
        }

        let addr = state.topology.router().route(key);
        addr.and_then(|addr| state.topology.node(addr).cloned())
            .ok_or(Error::Unroutable { addr })
    }
}
