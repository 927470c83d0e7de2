//! Reconfiguration: turning a new snapshot into a published topology.
//!
//! A reload runs in three steps:
//!
//! 1. Plan, under an upgradable read. Validate the snapshot, reuse handles
//!    for addresses that stay, build handles for new addresses and rebuild
//!    the router if needed. Readers keep running against the old topology.
//! 2. Publish, under the write lock. Swap in the new `Topology` and update
//!    capabilities on reused handles.
//! 3. Release, with no lock held. Close handles the new topology dropped
//!    and notify listeners.
//!
//! Any failure in step 1 closes what was built so far and leaves the
//! published topology untouched.

use super::{ConfigContext, Phase, Topology, TopologyEvent};
use crate::error::{ConfigError, Result};
use crate::metrics::ContextCounter;
use crate::node::{BuildParams, NodeHandle};
use crate::topology::TopologySnapshot;
use crate::types::{Capabilities, NodeAddr, Revision};
use parking_lot::RwLockUpgradableReadGuard;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a reconfiguration request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// A new topology was published.
    Applied {
        /// Revision that was replaced, `None` on the initial load.
        previous: Option<Revision>,
        current: Revision,
    },
    /// The snapshot was not newer than the active one.
    Skipped { current: Revision },
}

impl ReloadOutcome {
    /// Whether a new topology was published.
    pub fn is_applied(&self) -> bool {
        matches!(self, ReloadOutcome::Applied { .. })
    }

    /// Revision active after the request.
    pub fn revision(&self) -> Revision {
        match self {
            ReloadOutcome::Applied { current, .. } | ReloadOutcome::Skipped { current } => *current,
        }
    }
}

/// Counts one in-flight reconfiguration for the lifetime of the guard.
struct InFlightReload<'a>(&'a AtomicUsize);

impl<'a> InFlightReload<'a> {
    fn enter(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for InFlightReload<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Everything a reload needs to publish.
struct ReloadPlan {
    next: Arc<Topology>,
    added: Vec<NodeAddr>,
    removed: Vec<NodeHandle>,
    capability_updates: Vec<(NodeHandle, Capabilities)>,
    router_rebuilt: bool,
}

impl ConfigContext {
    /// Initial load: build a handle for every node of the snapshot the
    /// context was created with.
    ///
    /// On an already loaded context this rebuilds from the active snapshot,
    /// like [`reload_current`](Self::reload_current).
    pub fn load(&self) -> Result<ReloadOutcome> {
        self.apply(None, true)
    }

    /// Initial load with an explicit snapshot.
    pub fn load_with(&self, snapshot: TopologySnapshot) -> Result<ReloadOutcome> {
        self.apply(Some(Arc::new(snapshot)), true)
    }

    /// Reconfigure to `snapshot`.
    ///
    /// Unless `force` is set, a snapshot whose revision is not newer than the
    /// active one is skipped. Before the initial load the active one is the
    /// snapshot the context was created with. A forced reload applies any
    /// revision, including an older one.
    pub fn reload(&self, snapshot: TopologySnapshot, force: bool) -> Result<ReloadOutcome> {
        self.apply(Some(Arc::new(snapshot)), force)
    }

    /// Reconfigure from a JSON-encoded snapshot.
    pub fn reload_json(&self, json: &str, force: bool) -> Result<ReloadOutcome> {
        self.ensure_live()?;
        match TopologySnapshot::from_json(json) {
            Ok(snapshot) => self.reload(snapshot, force),
            Err(e) => {
                self.metrics.incr(ContextCounter::ReloadsFailed);
                warn!(bucket = %self.bucket_name, error = %e, "Rejected malformed topology snapshot");
                Err(e)
            }
        }
    }

    /// Rebuild from the active snapshot. Always applies.
    pub fn reload_current(&self) -> Result<ReloadOutcome> {
        self.apply(None, true)
    }

    fn apply(&self, incoming: Option<Arc<TopologySnapshot>>, force: bool) -> Result<ReloadOutcome> {
        let guard = self.state.upgradable_read();
        if guard.phase == Phase::Disposed {
            return Err(self.disposed_error());
        }
        let in_flight = InFlightReload::enter(&self.reloading);

        let current = guard.topology.clone();
        let loaded = guard.phase == Phase::Loaded;
        let snapshot = incoming.unwrap_or_else(|| current.snapshot().clone());

        if !force && snapshot.revision() <= current.revision() {
            self.metrics.incr(ContextCounter::ReloadsSkipped);
            debug!(
                bucket = %self.bucket_name,
                incoming = snapshot.revision(),
                active = current.revision(),
                "Skipping topology snapshot that is not newer"
            );
            return Ok(ReloadOutcome::Skipped {
                current: current.revision(),
            });
        }

        let plan = match self.plan(&current, snapshot) {
            Ok(plan) => plan,
            Err(e) => {
                self.metrics.incr(ContextCounter::ReloadsFailed);
                warn!(
                    bucket = %self.bucket_name,
                    active = current.revision(),
                    error = %e,
                    "Rejected topology snapshot"
                );
                return Err(e);
            }
        };

        let mut state = RwLockUpgradableReadGuard::upgrade(guard);
        for (node, capabilities) in &plan.capability_updates {
            node.set_capabilities(*capabilities);
        }
        state.topology = plan.next.clone();
        state.phase = Phase::Loaded;
        drop(state);
        drop(in_flight);

        let released = self.release(plan.removed.iter());
        let revision = plan.next.revision();
        self.metrics.record_publish(revision, plan.next.len());

        let previous = loaded.then(|| current.revision());
        info!(
            bucket = %self.bucket_name,
            ?previous,
            revision,
            nodes = plan.next.len(),
            added = plan.added.len(),
            released,
            updated = plan.capability_updates.len(),
            router_rebuilt = plan.router_rebuilt,
            secure = plan.next.is_secure(),
            "Published topology"
        );

        let mut events = Vec::with_capacity(plan.added.len() + plan.removed.len() + 1);
        events.extend(plan.added.iter().map(|&addr| TopologyEvent::NodeAdded { addr }));
        events.extend(
            plan.removed
                .iter()
                .map(|node| TopologyEvent::NodeRemoved { addr: node.address() }),
        );
        events.push(TopologyEvent::Reconfigured {
            previous,
            current: revision,
        });
        self.notify(&events);

        Ok(ReloadOutcome::Applied {
            previous,
            current: revision,
        })
    }

    /// Build the next topology without touching the published one.
    fn plan(&self, current: &Topology, snapshot: Arc<TopologySnapshot>) -> Result<ReloadPlan> {
        if snapshot.bucket_name() != self.bucket_name {
            return Err(ConfigError::BucketMismatch {
                expected: self.bucket_name.clone(),
                actual: snapshot.bucket_name().to_string(),
            }
            .into());
        }
        let metadata = snapshot.resolve()?;

        let secure = snapshot.use_encrypted_transport() || self.client_config.use_tls;
        let rebuild_all = secure != current.is_secure();
        if rebuild_all && !current.is_empty() {
            info!(
                bucket = %self.bucket_name,
                secure,
                "Transport security changed, rebuilding every node handle"
            );
        }

        let params = BuildParams {
            bucket: &self.bucket_name,
            password: self.client_config.password_for(&self.bucket_name),
            pool: &self.client_config.pool,
            tls: secure,
            default_tls_port: self.client_config.default_tls_port,
        };

        let mut ordered = Vec::with_capacity(snapshot.nodes().len());
        let mut built: Vec<NodeHandle> = Vec::new();
        let mut capability_updates = Vec::new();

        for descriptor in snapshot.nodes() {
            let reusable = current.node(descriptor.address).filter(|_| !rebuild_all);
            if let Some(existing) = reusable {
                if existing.capabilities() != descriptor.capabilities {
                    capability_updates.push((existing.clone(), descriptor.capabilities));
                }
                ordered.push(existing.clone());
                continue;
            }

            match self.factories.build_node(descriptor, params) {
                Ok(node) => {
                    self.metrics.incr(ContextCounter::NodesCreated);
                    debug!(
                        bucket = %self.bucket_name,
                        addr = %descriptor.address,
                        endpoint = %node.endpoint().addr,
                        secure = node.is_secure(),
                        capabilities = ?node.capabilities(),
                        "Built node handle"
                    );
                    built.push(node.clone());
                    ordered.push(node);
                }
                Err(e) => {
                    let discarded = self.release(built.iter());
                    debug!(
                        bucket = %self.bucket_name,
                        addr = %descriptor.address,
                        discarded,
                        "Node construction failed, discarding partial build"
                    );
                    return Err(e.into());
                }
            }
        }

        let router_rebuilt = metadata.routing_kind != current.metadata().routing_kind
            || snapshot.addresses() != current.snapshot().addresses();
        let router = if router_rebuilt {
            match self.router_factory.build(metadata.routing_kind, &snapshot) {
                Ok(router) => router,
                Err(e) => {
                    self.release(built.iter());
                    return Err(e.into());
                }
            }
        } else {
            current.router().clone()
        };

        let next = Topology::new(snapshot, metadata, secure, ordered, router);
        let removed = current
            .nodes()
            .iter()
            .filter(|old| {
                next.node(old.address())
                    .map_or(true, |kept| !Arc::ptr_eq(kept, *old))
            })
            .cloned()
            .collect();

        Ok(ReloadPlan {
            next: Arc::new(next),
            added: built.iter().map(|node| node.address()).collect(),
            removed,
            capability_updates,
            router_rebuilt,
        })
    }
}
