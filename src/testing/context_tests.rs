//! Scenario tests for the configuration context.
//!
//! Every test runs a context against a `FakeCluster`, which records which
//! node handles were built and closed.

use super::*;
use crate::config::{RetryConfig, DEFAULT_TLS_PORT};
use crate::context::{LifecycleState, ReloadOutcome, TopologyEvent, TopologyListener};
use crate::error::{ConfigError, Error, NodeError};
use crate::topology::BucketKind;
use crate::types::Capability;
use std::sync::{OnceLock, Weak};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Listener that keeps every event it sees.
#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<TopologyEvent>>,
}

impl RecordingListener {
    fn take(&self) -> Vec<TopologyEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl TopologyListener for RecordingListener {
    fn on_event(&self, event: &TopologyEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Records the context's lifecycle whenever it is called back, either as a
/// listener or as the router factory.
#[derive(Default)]
struct LifecycleSampler {
    context: OnceLock<Weak<ConfigContext>>,
    seen: Mutex<Vec<LifecycleState>>,
}

impl LifecycleSampler {
    fn attach(&self, context: &Arc<ConfigContext>) {
        let _ = self.context.set(Arc::downgrade(context));
    }

    fn sample(&self) {
        if let Some(context) = self.context.get().and_then(Weak::upgrade) {
            self.seen.lock().push(context.lifecycle());
        }
    }

    fn seen(&self) -> Vec<LifecycleState> {
        self.seen.lock().clone()
    }
}

impl TopologyListener for LifecycleSampler {
    fn on_event(&self, _event: &TopologyEvent) {
        self.sample();
    }
}

impl KeyRouterFactory for LifecycleSampler {
    fn build(
        &self,
        kind: RoutingKind,
        snapshot: &TopologySnapshot,
    ) -> std::result::Result<Arc<dyn KeyRouter>, NodeError> {
        self.sample();
        Ok(Arc::new(ModuloRouter::new(kind, snapshot)))
    }
}

/// Router that sends every key to an address outside the cluster.
struct StrayRouter(RoutingKind);

impl KeyRouter for StrayRouter {
    fn kind(&self) -> RoutingKind {
        self.0
    }

    fn route(&self, _key: &[u8]) -> Option<NodeAddr> {
        Some(node_addr(99))
    }
}

fn three_node_snapshot() -> TopologySnapshot {
    snapshot(
        1,
        vec![
            NodeDescriptor::data(node_addr(1)).with_capability(Capability::Query),
            NodeDescriptor::data(node_addr(2)),
            NodeDescriptor::data(node_addr(3)),
        ],
    )
}

// ==================== Load and capability views ====================

#[test]
fn test_three_node_hash_ring_bucket() {
    init_tracing();
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();

    assert_eq!(context.bucket_name().unwrap(), TEST_BUCKET);
    assert_eq!(context.bucket_kind().unwrap(), BucketKind::Couchbase);
    assert_eq!(context.routing_kind().unwrap(), RoutingKind::HashRing);
    assert_eq!(context.revision().unwrap(), 1);
    assert_eq!(context.lifecycle(), LifecycleState::Loaded);
    assert_eq!(cluster.built_count(), 3);

    assert_eq!(context.nodes_with(Capability::Data).unwrap().len(), 3);
    assert_eq!(context.nodes_with(Capability::Query).unwrap().len(), 1);
    assert!(context.is_data_capable().unwrap());
    assert!(context.is_query_capable().unwrap());
    assert!(!context.is_index_capable().unwrap());
    assert!(!context.is_view_capable().unwrap());

    let addrs: HashSet<NodeAddr> = (1..=3).map(node_addr).collect();
    for _ in 0..50 {
        let node = context.acquire_data_node().unwrap();
        assert!(addrs.contains(&node.address()));
    }
    for _ in 0..20 {
        assert_eq!(context.acquire_query_node().unwrap().address(), node_addr(1));
    }

    let err = context.acquire_index_node().unwrap_err();
    assert!(matches!(err, Error::ServiceUnavailable(Capability::Index)));
    assert!(err.is_node_unavailable());
    assert!(matches!(
        context.acquire_view_node().unwrap_err(),
        Error::ServiceUnavailable(Capability::View)
    ));

    assert!(context.inspect(|topology| topology.is_consistent()).unwrap());
    context.dispose();
}

#[test]
fn test_new_context_is_uninitialized() {
    let cluster = FakeCluster::new();
    let context = cluster
        .context(three_node_snapshot(), ClientConfig::default())
        .unwrap();

    assert_eq!(context.lifecycle(), LifecycleState::Uninitialized);
    assert_eq!(cluster.built_count(), 0);
    assert_eq!(cluster.router_builds(), 1);
    assert!(context.all_nodes().unwrap().is_empty());
    assert!(matches!(
        context.acquire_any_node().unwrap_err(),
        Error::NoServersConfigured { .. }
    ));

    let outcome = context.load().unwrap();
    assert_eq!(
        outcome,
        ReloadOutcome::Applied {
            previous: None,
            current: 1
        }
    );
    assert_eq!(context.lifecycle(), LifecycleState::Loaded);
    assert_eq!(context.all_nodes().unwrap().len(), 3);
    context.dispose();
}

#[test]
fn test_load_with_explicit_snapshot() {
    let cluster = FakeCluster::new();
    let context = cluster
        .context(snapshot(1, data_nodes(1)), ClientConfig::default())
        .unwrap();

    let outcome = context.load_with(snapshot(4, data_nodes(2))).unwrap();
    assert_eq!(outcome.revision(), 4);
    assert_eq!(context.all_nodes().unwrap().len(), 2);
    assert_eq!(cluster.built_count(), 2);
    // address set differs from the constructor's snapshot
    assert_eq!(cluster.router_builds(), 2);
    context.dispose();
}

#[test]
fn test_new_rejects_invalid_snapshot() {
    let cluster = FakeCluster::new();
    let bogus = TopologySnapshot::new(1, TEST_BUCKET, "bogus", "HASH_RING");

    let err = cluster.context(bogus, ClientConfig::default()).unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::Unrecognized {
            field: "bucketKind",
            ..
        })
    ));
    assert_eq!(cluster.router_builds(), 0);
}

#[test]
fn test_all_nodes_returns_copy() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();

    let mut nodes = context.all_nodes().unwrap();
    nodes.clear();
    assert_eq!(context.all_nodes().unwrap().len(), 3);

    let ordered: Vec<NodeAddr> = context
        .all_nodes()
        .unwrap()
        .iter()
        .map(|node| node.address())
        .collect();
    assert_eq!(ordered, vec![node_addr(1), node_addr(2), node_addr(3)]);
    context.dispose();
}

// ==================== Reconfiguration ====================

#[test]
fn test_unrecognized_bucket_kind_keeps_previous_snapshot() {
    init_tracing();
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();
    let before = context.current_bucket_config().unwrap();

    let bogus = TopologySnapshot::new(2, TEST_BUCKET, "bogus", "HASH_RING")
        .with_nodes(data_nodes(4));
    let err = context.reload(bogus, false).unwrap_err();

    assert!(err.is_config());
    assert!(matches!(
        err,
        Error::Config(ConfigError::Unrecognized {
            field: "bucketKind",
            ..
        })
    ));
    assert_eq!(context.current_bucket_config().unwrap(), before);
    assert_eq!(context.revision().unwrap(), 1);
    assert_eq!(cluster.built_count(), 3);
    assert_eq!(context.metrics().snapshot().reloads_failed, 1);
    context.dispose();
}

#[test]
fn test_unrecognized_routing_kind_is_rejected() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();

    let bogus = TopologySnapshot::new(2, TEST_BUCKET, "couchbase", "RANDOM");
    let err = context.reload(bogus, true).unwrap_err();
    assert!(matches!(
        err,
        Error::Config(ConfigError::Unrecognized {
            field: "routingKind",
            ..
        })
    ));
    assert_eq!(context.revision().unwrap(), 1);
    context.dispose();
}

#[test]
fn test_bucket_mismatch_is_rejected() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();

    let other = TopologySnapshot::new(2, "travel-sample", "couchbase", "HASH_RING");
    let err = context.reload(other, true).unwrap_err();
    assert_eq!(
        err.to_string(),
        "config error: bucket mismatch: context serves default, snapshot is for travel-sample"
    );
    assert_eq!(context.revision().unwrap(), 1);
    context.dispose();
}

#[test]
fn test_stale_revision_is_skipped_unless_forced() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(snapshot(5, data_nodes(2)), ClientConfig::default())
        .unwrap();

    let same = context.reload(snapshot(5, data_nodes(3)), false).unwrap();
    assert_eq!(same, ReloadOutcome::Skipped { current: 5 });

    let older = context.reload(snapshot(3, data_nodes(3)), false).unwrap();
    assert_eq!(older, ReloadOutcome::Skipped { current: 5 });
    assert_eq!(context.all_nodes().unwrap().len(), 2);
    assert_eq!(cluster.built_count(), 2);

    let forced = context.reload(snapshot(3, data_nodes(3)), true).unwrap();
    assert_eq!(
        forced,
        ReloadOutcome::Applied {
            previous: Some(5),
            current: 3
        }
    );
    assert_eq!(context.revision().unwrap(), 3);

    let newer = context.reload(snapshot(6, data_nodes(3)), false).unwrap();
    assert!(newer.is_applied());
    assert_eq!(context.revision().unwrap(), 6);

    let metrics = context.metrics().snapshot();
    assert_eq!(metrics.reloads_skipped, 2);
    assert_eq!(metrics.reloads_applied, 3);
    assert_eq!(metrics.topology_revision, 6);
    context.dispose();
}

#[test]
fn test_stale_reload_before_load_is_skipped() {
    let cluster = FakeCluster::new();
    let context = cluster
        .context(snapshot(5, data_nodes(1)), ClientConfig::default())
        .unwrap();

    let older = context.reload(snapshot(3, data_nodes(2)), false).unwrap();
    assert_eq!(older, ReloadOutcome::Skipped { current: 5 });
    assert_eq!(context.revision().unwrap(), 5);
    assert_eq!(context.lifecycle(), LifecycleState::Uninitialized);
    assert_eq!(cluster.built_count(), 0);
    assert_eq!(context.metrics().snapshot().reloads_skipped, 1);

    let newer = context.reload(snapshot(6, data_nodes(2)), false).unwrap();
    assert_eq!(
        newer,
        ReloadOutcome::Applied {
            previous: None,
            current: 6
        }
    );
    assert_eq!(context.lifecycle(), LifecycleState::Loaded);
    assert_eq!(cluster.built_count(), 2);
    context.dispose();
}

#[test]
fn test_reload_reuses_and_releases_handles() {
    init_tracing();
    let cluster = FakeCluster::new();
    let context = cluster
        .open(snapshot(1, data_nodes(2)), ClientConfig::default())
        .unwrap();
    let first = context.node(node_addr(1)).unwrap().unwrap();
    let second = context.node(node_addr(2)).unwrap().unwrap();

    let next = snapshot(
        2,
        vec![
            NodeDescriptor::data(node_addr(2)).with_capability(Capability::Query),
            NodeDescriptor::data(node_addr(3)),
        ],
    );
    context.reload(next, false).unwrap();

    let kept = context.node(node_addr(2)).unwrap().unwrap();
    assert!(Arc::ptr_eq(&kept, &second));
    assert!(!second.is_closed());
    assert!(kept.has(Capability::Query));

    assert!(first.is_closed());
    assert!(context.node(node_addr(1)).unwrap().is_none());
    assert!(context.node(node_addr(3)).unwrap().is_some());

    assert_eq!(cluster.built_count(), 3);
    assert_eq!(cluster.close_count(), 1);
    assert_eq!(context.acquire_query_node().unwrap().address(), node_addr(2));
    assert!(context.inspect(|topology| topology.is_consistent()).unwrap());

    let metrics = context.metrics().snapshot();
    assert_eq!(metrics.nodes_created, 3);
    assert_eq!(metrics.nodes_released, 1);
    assert_eq!(metrics.registry_nodes, 2);
    assert_eq!(metrics.live_handles(), 2);
    context.dispose();
}

#[test]
fn test_capability_removed_from_reused_handle() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();
    let first = context.node(node_addr(1)).unwrap().unwrap();
    assert!(first.has(Capability::Query));

    context.reload(snapshot(2, data_nodes(3)), false).unwrap();

    assert!(!first.has(Capability::Query));
    assert!(!context.is_query_capable().unwrap());
    assert!(matches!(
        context.acquire_query_node().unwrap_err(),
        Error::ServiceUnavailable(Capability::Query)
    ));
    assert_eq!(cluster.built_count(), 3);
    context.dispose();
}

#[test]
fn test_reload_current_rebuilds_nothing_for_same_snapshot() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();

    let outcome = context.reload_current().unwrap();
    assert_eq!(
        outcome,
        ReloadOutcome::Applied {
            previous: Some(1),
            current: 1
        }
    );
    assert_eq!(cluster.built_count(), 3);
    assert_eq!(cluster.close_count(), 0);
    context.dispose();
}

#[test]
fn test_reload_json() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(snapshot(1, data_nodes(1)), ClientConfig::default())
        .unwrap();

    let payload = snapshot(2, data_nodes(2)).to_json().unwrap();
    assert!(context.reload_json(&payload, false).unwrap().is_applied());
    assert_eq!(context.all_nodes().unwrap().len(), 2);

    let err = context.reload_json("{\"revision\": ", false).unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::Malformed(_))));
    assert_eq!(context.revision().unwrap(), 2);
    assert_eq!(context.metrics().snapshot().reloads_failed, 1);
    context.dispose();
}

#[test]
fn test_reload_json_after_dispose_reports_disposed() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(snapshot(1, data_nodes(1)), ClientConfig::default())
        .unwrap();
    context.dispose();

    let err = context.reload_json("{", false).unwrap_err();
    assert!(err.is_disposed());
    assert_eq!(context.metrics().snapshot().reloads_failed, 0);
}

// ==================== Construction failures ====================

#[test]
fn test_failed_node_construction_rolls_back() {
    init_tracing();
    let cluster = FakeCluster::new();
    let context = cluster
        .open(snapshot(1, data_nodes(2)), ClientConfig::default())
        .unwrap();

    cluster.make_unreachable(node_addr(4));
    let err = context.reload(snapshot(2, data_nodes(4)), false).unwrap_err();
    assert!(matches!(
        err,
        Error::Node(NodeError::ConnectionFailed { addr, .. }) if addr == node_addr(4)
    ));

    // node 3 was built for the aborted reload and released again
    assert_eq!(cluster.built_count(), 3);
    assert_eq!(cluster.close_count(), 1);
    assert_eq!(cluster.open_count(), 2);
    assert_eq!(context.revision().unwrap(), 1);
    assert_eq!(context.all_nodes().unwrap().len(), 2);

    cluster.make_reachable(node_addr(4));
    context.reload(snapshot(2, data_nodes(4)), false).unwrap();
    assert_eq!(context.all_nodes().unwrap().len(), 4);
    assert!(context.inspect(|topology| topology.is_consistent()).unwrap());
    context.dispose();
    assert_eq!(cluster.open_count(), 0);
    assert_eq!(cluster.double_closed(), 0);
}

#[test]
fn test_auth_failure_closes_strategy() {
    let cluster = FakeCluster::new();
    cluster.reject_auth(true);

    let err = cluster
        .open(snapshot(1, data_nodes(2)), ClientConfig::default())
        .unwrap_err();
    assert!(matches!(err, Error::Node(NodeError::AuthFailed { .. })));
    assert_eq!(cluster.built_count(), 1);
    assert_eq!(cluster.close_count(), 1);
}

#[test]
fn test_open_failure_releases_partial_build() {
    let cluster = FakeCluster::new();
    cluster.make_unreachable(node_addr(3));

    let err = cluster
        .open(snapshot(1, data_nodes(3)), ClientConfig::default())
        .unwrap_err();
    assert!(matches!(err, Error::Node(NodeError::ConnectionFailed { .. })));
    assert_eq!(cluster.built_count(), 2);
    assert_eq!(cluster.open_count(), 0);
}

#[test]
fn test_router_failure_aborts_reload() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(snapshot(1, data_nodes(2)), ClientConfig::default())
        .unwrap();

    cluster.reject_router(true);
    let err = context.reload(snapshot(2, data_nodes(3)), false).unwrap_err();
    assert!(matches!(err, Error::Node(NodeError::Router(_))));
    assert_eq!(cluster.built_count(), 3);
    assert_eq!(cluster.close_count(), 1);
    assert_eq!(context.revision().unwrap(), 1);

    cluster.reject_router(false);
    context.reload(snapshot(2, data_nodes(3)), false).unwrap();
    assert_eq!(context.revision().unwrap(), 2);
    context.dispose();
}

// ==================== Key routing ====================

#[test]
fn test_router_rebuilt_only_when_routing_inputs_change() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();
    assert_eq!(cluster.router_builds(), 1);

    // capabilities only
    context.reload(snapshot(2, data_nodes(3)), false).unwrap();
    assert_eq!(cluster.router_builds(), 1);

    let partitioned = TopologySnapshot::new(3, TEST_BUCKET, "couchbase", "vbucket")
        .with_nodes(data_nodes(3));
    context.reload(partitioned, false).unwrap();
    assert_eq!(cluster.router_builds(), 2);
    assert_eq!(context.routing_kind().unwrap(), RoutingKind::PartitionTable);
    assert_eq!(context.key_router().unwrap().kind(), RoutingKind::PartitionTable);

    let shrunk = TopologySnapshot::new(4, TEST_BUCKET, "couchbase", "vbucket")
        .with_nodes(data_nodes(2));
    context.reload(shrunk, false).unwrap();
    assert_eq!(cluster.router_builds(), 3);
    context.dispose();
}

#[test]
fn test_route_key() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();

    assert_eq!(context.route_key(&[1]).unwrap().address(), node_addr(2));
    assert_eq!(context.route_key(b"").unwrap().address(), node_addr(1));
    assert_eq!(
        context.key_router().unwrap().route(&[2]),
        Some(node_addr(3))
    );
    context.dispose();
}

#[test]
fn test_route_key_to_unknown_node() {
    let cluster = FakeCluster::new();
    let router_factory: Arc<dyn KeyRouterFactory> = Arc::new(
        |kind: RoutingKind,
         _snapshot: &TopologySnapshot|
         -> std::result::Result<Arc<dyn KeyRouter>, NodeError> {
            Ok(Arc::new(StrayRouter(kind)))
        },
    );
    let context = ConfigContext::open(
        snapshot(1, data_nodes(2)),
        Arc::new(ClientConfig::default()),
        cluster.factories(),
        router_factory,
    )
    .unwrap();

    let err = context.route_key(b"user::1").unwrap_err();
    assert!(matches!(
        err,
        Error::Unroutable { addr: Some(addr) } if addr == node_addr(99)
    ));
    context.dispose();
}

#[test]
fn test_route_key_with_empty_registry() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(snapshot(1, Vec::new()), ClientConfig::default())
        .unwrap();

    assert!(matches!(
        context.route_key(b"key").unwrap_err(),
        Error::NoServersConfigured { .. }
    ));
    context.dispose();
}

// ==================== Acquisition ====================

#[test]
fn test_empty_registry_fails_without_backoff() {
    let cluster = FakeCluster::new();
    let config = ClientConfig::new().with_retry_config(RetryConfig::with_unit(Duration::from_millis(50)));
    let context = cluster.open(snapshot(1, Vec::new()), config).unwrap();

    let started = Instant::now();
    let err = context.acquire_any_node().unwrap_err();
    assert!(started.elapsed() < Duration::from_millis(50));
    assert!(matches!(
        err,
        Error::NoServersConfigured { ref bucket } if bucket == TEST_BUCKET
    ));
    assert!(!err.is_node_unavailable());

    let metrics = context.metrics().snapshot();
    assert_eq!(metrics.acquire_rounds, 0);
    assert_eq!(metrics.acquire_backoffs, 0);
    assert_eq!(metrics.acquire_failures, 1);

    assert!(matches!(
        context.acquire_data_node().unwrap_err(),
        Error::ServiceUnavailable(Capability::Data)
    ));
    context.dispose();
}

#[test]
fn test_acquire_skips_dead_nodes() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();

    context.node(node_addr(1)).unwrap().unwrap().mark_dead();
    context.node(node_addr(2)).unwrap().unwrap().mark_dead();

    for _ in 0..50 {
        assert_eq!(context.acquire_any_node().unwrap().address(), node_addr(3));
    }

    let metrics = context.metrics().snapshot();
    assert_eq!(metrics.acquire_rounds, 50);
    assert_eq!(metrics.acquire_backoffs, 0);
    context.dispose();
}

#[test]
fn test_capability_acquisition_ignores_liveness() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();

    context.node(node_addr(1)).unwrap().unwrap().mark_dead();
    let node = context.acquire_query_node().unwrap();
    assert_eq!(node.address(), node_addr(1));
    assert!(node.is_dead());
    context.dispose();
}

#[test]
fn test_bounded_retry_when_every_node_is_dead() {
    init_tracing();
    let cluster = FakeCluster::new();
    let unit = Duration::from_micros(200);
    let config = ClientConfig::new().with_retry_config(RetryConfig::with_unit(unit));
    let context = cluster.open(snapshot(1, data_nodes(2)), config).unwrap();

    for node in context.all_nodes().unwrap() {
        node.mark_dead();
    }

    let started = Instant::now();
    let err = context.acquire_any_node().unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, Error::NoServersAvailable { attempts: 7 }));
    assert!(err.is_node_unavailable());
    assert!(elapsed >= unit * 127);

    let metrics = context.metrics().snapshot();
    assert_eq!(metrics.acquire_rounds, 7);
    assert_eq!(metrics.acquire_backoffs, 7);
    assert_eq!(metrics.acquire_backoff, unit * 127);
    assert_eq!(metrics.acquire_failures, 1);
    context.dispose();
}

#[test]
fn test_retry_budget_is_configurable() {
    let cluster = FakeCluster::new();
    let retry = RetryConfig::with_unit(Duration::from_micros(100)).with_max_attempts(3);
    let config = ClientConfig::new().with_retry_config(retry);
    let context = cluster.open(snapshot(1, data_nodes(1)), config).unwrap();

    context.node(node_addr(1)).unwrap().unwrap().mark_dead();
    assert!(matches!(
        context.acquire_any_node().unwrap_err(),
        Error::NoServersAvailable { attempts: 3 }
    ));

    let metrics = context.metrics().snapshot();
    assert_eq!(metrics.acquire_rounds, 3);
    assert_eq!(metrics.acquire_backoff, Duration::from_micros(700));

    context.node(node_addr(1)).unwrap().unwrap().mark_alive();
    assert_eq!(context.acquire_any_node().unwrap().address(), node_addr(1));
    context.dispose();
}

// ==================== Transport security ====================

#[test]
fn test_effective_tls_combines_snapshot_and_client() {
    let cluster = FakeCluster::new();

    let plain = cluster
        .open(snapshot(1, data_nodes(1)), ClientConfig::default())
        .unwrap();
    assert!(!plain.effective_tls_required().unwrap());
    assert!(!plain.acquire_any_node().unwrap().is_secure());
    plain.dispose();

    let client_tls = cluster
        .open(snapshot(1, data_nodes(1)), ClientConfig::new().with_tls(true))
        .unwrap();
    assert!(client_tls.effective_tls_required().unwrap());
    let node = client_tls.acquire_any_node().unwrap();
    assert!(node.is_secure());
    assert_eq!(node.endpoint().addr.port(), DEFAULT_TLS_PORT);
    client_tls.dispose();

    let cluster_tls = cluster
        .open(
            snapshot(1, data_nodes(1)).with_encrypted_transport(true),
            ClientConfig::default(),
        )
        .unwrap();
    assert!(cluster_tls.effective_tls_required().unwrap());
    cluster_tls.dispose();
}

#[test]
fn test_tls_flip_rebuilds_every_handle() {
    init_tracing();
    let cluster = FakeCluster::new();
    let nodes = vec![
        NodeDescriptor::data(node_addr(1)),
        NodeDescriptor::data(node_addr(2)).with_tls_port(18091),
    ];
    let context = cluster
        .open(snapshot(1, nodes.clone()), ClientConfig::default())
        .unwrap();
    let before = context.all_nodes().unwrap();

    context
        .reload(snapshot(2, nodes).with_encrypted_transport(true), false)
        .unwrap();

    let after = context.all_nodes().unwrap();
    assert_eq!(cluster.built_count(), 4);
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.address(), new.address());
        assert!(!Arc::ptr_eq(old, new));
        assert!(old.is_closed());
        assert!(new.is_secure());
    }
    assert_eq!(after[0].endpoint().addr.port(), DEFAULT_TLS_PORT);
    assert_eq!(after[1].endpoint().addr.port(), 18091);
    assert!(context.topology().unwrap().is_secure());
    context.dispose();
}

// ==================== Teardown ====================

#[test]
fn test_dispose_is_idempotent() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();
    let handles = context.all_nodes().unwrap();

    context.dispose();
    context.dispose();

    assert!(context.is_disposed());
    assert_eq!(context.lifecycle(), LifecycleState::Disposed);
    assert!(handles.iter().all(|node| node.is_closed()));
    for io in cluster.built() {
        assert_eq!(io.close_count(), 1);
    }
    assert_eq!(context.metrics().snapshot().nodes_released, 3);
    assert_eq!(context.metrics().snapshot().registry_nodes, 0);
}

#[test]
fn test_disposed_context_rejects_operations() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();
    context.dispose();

    assert!(context.bucket_name().unwrap_err().is_disposed());
    assert!(context.bucket_kind().unwrap_err().is_disposed());
    assert!(context.routing_kind().unwrap_err().is_disposed());
    assert!(context.revision().unwrap_err().is_disposed());
    assert!(context.creation_timestamp().unwrap_err().is_disposed());
    assert!(context.current_bucket_config().unwrap_err().is_disposed());
    assert!(context.key_router().err().is_some_and(|e| e.is_disposed()));
    assert!(context.effective_tls_required().unwrap_err().is_disposed());
    assert!(context.all_nodes().unwrap_err().is_disposed());
    assert!(context.nodes_with(Capability::Data).unwrap_err().is_disposed());
    assert!(context.is_data_capable().unwrap_err().is_disposed());
    assert!(context.acquire_any_node().unwrap_err().is_disposed());
    assert!(context.acquire_data_node().unwrap_err().is_disposed());
    assert!(context.route_key(b"key").unwrap_err().is_disposed());
    assert!(context.topology().unwrap_err().is_disposed());
    assert!(context.load().unwrap_err().is_disposed());
    assert!(context
        .reload(snapshot(9, data_nodes(1)), true)
        .unwrap_err()
        .is_disposed());
    assert_eq!(cluster.built_count(), 3);
}

#[test]
fn test_drop_without_dispose_releases_handles() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();
    let metrics = context.metrics().clone();

    drop(context);

    assert_eq!(cluster.close_count(), 3);
    assert_eq!(metrics.snapshot().nodes_released, 3);
}

#[test]
fn test_drop_after_dispose_closes_nothing_twice() {
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();

    context.dispose();
    drop(context);

    assert_eq!(cluster.close_count(), 3);
    assert_eq!(cluster.double_closed(), 0);
}

#[test]
fn test_creation_timestamp() {
    let before = std::time::SystemTime::now();
    let cluster = FakeCluster::new();
    let context = cluster
        .open(three_node_snapshot(), ClientConfig::default())
        .unwrap();
    let after = std::time::SystemTime::now();

    let created = context.creation_timestamp().unwrap();
    assert!(created >= before && created <= after);
    context.dispose();
}

// ==================== Events ====================

#[test]
fn test_listener_sees_topology_changes() {
    let cluster = FakeCluster::new();
    let context = cluster
        .context(snapshot(1, data_nodes(2)), ClientConfig::default())
        .unwrap();
    let listener = Arc::new(RecordingListener::default());
    context.add_listener(listener.clone());

    context.load().unwrap();
    assert_eq!(
        listener.take(),
        vec![
            TopologyEvent::NodeAdded { addr: node_addr(1) },
            TopologyEvent::NodeAdded { addr: node_addr(2) },
            TopologyEvent::Reconfigured {
                previous: None,
                current: 1
            },
        ]
    );

    let next = snapshot(
        2,
        vec![
            NodeDescriptor::data(node_addr(2)),
            NodeDescriptor::data(node_addr(3)),
        ],
    );
    context.reload(next, false).unwrap();
    assert_eq!(
        listener.take(),
        vec![
            TopologyEvent::NodeAdded { addr: node_addr(3) },
            TopologyEvent::NodeRemoved { addr: node_addr(1) },
            TopologyEvent::Reconfigured {
                previous: Some(1),
                current: 2
            },
        ]
    );

    context.reload(snapshot(2, data_nodes(1)), false).unwrap();
    assert!(listener.take().is_empty());

    context.dispose();
    context.dispose();
    assert_eq!(listener.take(), vec![TopologyEvent::Disposed { released: 2 }]);
}

#[test]
fn test_lifecycle_during_reload() {
    let cluster = FakeCluster::new();
    let context = Arc::new(
        cluster
            .context(snapshot(1, data_nodes(1)), ClientConfig::default())
            .unwrap(),
    );
    let listener = Arc::new(LifecycleSampler::default());
    listener.attach(&context);
    context.add_listener(listener.clone());

    context.load().unwrap();
    assert_eq!(context.lifecycle(), LifecycleState::Loaded);
    context.dispose();

    // listeners run after the reload has finished
    assert_eq!(
        listener.seen(),
        vec![
            LifecycleState::Loaded,
            LifecycleState::Loaded,
            LifecycleState::Disposed,
        ]
    );
}

#[test]
fn test_lifecycle_is_reloading_while_planning() {
    let cluster = FakeCluster::new();
    let router = Arc::new(LifecycleSampler::default());
    let context = Arc::new(
        ConfigContext::new(
            snapshot(1, data_nodes(1)),
            Arc::new(ClientConfig::default()),
            cluster.factories(),
            router.clone(),
        )
        .unwrap(),
    );
    router.attach(&context);
    assert_eq!(context.lifecycle(), LifecycleState::Uninitialized);

    // a different address set forces a router rebuild during planning
    context.load_with(snapshot(2, data_nodes(2))).unwrap();
    assert_eq!(router.seen(), vec![LifecycleState::Reloading]);
    assert_eq!(context.lifecycle(), LifecycleState::Loaded);

    context.reload(snapshot(3, data_nodes(3)), false).unwrap();
    assert_eq!(
        router.seen(),
        vec![LifecycleState::Reloading, LifecycleState::Reloading]
    );
    assert_eq!(context.lifecycle(), LifecycleState::Loaded);
    context.dispose();
}
