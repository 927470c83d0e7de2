//! Metrics for the configuration context.
//!
//! Every series a context records is a row in one of two tables, so the
//! atomic storage, the snapshot and the Prometheus output all walk the same
//! list:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     ContextMetrics                        │
//! │  ┌──────────────────────┐  ┌───────────────────────────┐ │
//! │  │  ContextCounter      │  │  ContextGauge             │ │
//! │  │ - reloads            │  │ - topology_revision       │ │
//! │  │ - nodes created/rel. │  │ - registry_nodes          │ │
//! │  │ - acquire rounds     │  │                           │ │
//! │  │ - backoff sleeps     │  │                           │ │
//! │  └──────────────────────┘  └───────────────────────────┘ │
//! └──────────────────────────────────────────────────────────┘
//! ```

use crate::types::Revision;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Monotonic series recorded by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextCounter {
    /// Reconfigurations that published a new topology.
    ReloadsApplied,
    /// Reconfigurations skipped because the revision was not newer.
    ReloadsSkipped,
    /// Reconfigurations rejected with an error.
    ReloadsFailed,
    /// Node handles constructed.
    NodesCreated,
    /// Node handles closed.
    NodesReleased,
    /// Sampling rounds run by `acquire_any_node`.
    AcquireRounds,
    /// Backoff sleeps taken between rounds.
    AcquireBackoffs,
    /// Total time slept in backoff, in microseconds.
    AcquireBackoffMicros,
    /// Acquisitions that ended without a node.
    AcquireFailures,
}

impl ContextCounter {
    /// Every counter, in exposition order.
    pub const ALL: [ContextCounter; 9] = [
        ContextCounter::ReloadsApplied,
        ContextCounter::ReloadsSkipped,
        ContextCounter::ReloadsFailed,
        ContextCounter::NodesCreated,
        ContextCounter::NodesReleased,
        ContextCounter::AcquireRounds,
        ContextCounter::AcquireBackoffs,
        ContextCounter::AcquireBackoffMicros,
        ContextCounter::AcquireFailures,
    ];

    /// Prometheus series name.
    pub fn name(self) -> &'static str {
        match self {
            ContextCounter::ReloadsApplied => "topology_reloads_applied_total",
            ContextCounter::ReloadsSkipped => "topology_reloads_skipped_total",
            ContextCounter::ReloadsFailed => "topology_reloads_failed_total",
            ContextCounter::NodesCreated => "topology_nodes_created_total",
            ContextCounter::NodesReleased => "topology_nodes_released_total",
            ContextCounter::AcquireRounds => "node_acquire_rounds_total",
            ContextCounter::AcquireBackoffs => "node_acquire_backoffs_total",
            ContextCounter::AcquireBackoffMicros => "node_acquire_backoff_micros_total",
            ContextCounter::AcquireFailures => "node_acquire_failures_total",
        }
    }

    /// Prometheus help text.
    pub fn help(self) -> &'static str {
        match self {
            ContextCounter::ReloadsApplied => "Applied reconfigurations",
            ContextCounter::ReloadsSkipped => "Skipped stale reconfigurations",
            ContextCounter::ReloadsFailed => "Rejected reconfigurations",
            ContextCounter::NodesCreated => "Node handles constructed",
            ContextCounter::NodesReleased => "Node handles released",
            ContextCounter::AcquireRounds => "Node sampling rounds",
            ContextCounter::AcquireBackoffs => "Backoff sleeps while acquiring a node",
            ContextCounter::AcquireBackoffMicros => "Time slept in acquisition backoff",
            ContextCounter::AcquireFailures => "Failed node acquisitions",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Point-in-time series recorded by a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextGauge {
    /// Revision of the published snapshot.
    TopologyRevision,
    /// Nodes in the published registry.
    RegistryNodes,
}

impl ContextGauge {
    /// Every gauge, in exposition order.
    pub const ALL: [ContextGauge; 2] = [ContextGauge::TopologyRevision, ContextGauge::RegistryNodes];

    /// Prometheus series name.
    pub fn name(self) -> &'static str {
        match self {
            ContextGauge::TopologyRevision => "topology_revision",
            ContextGauge::RegistryNodes => "topology_registry_nodes",
        }
    }

    /// Prometheus help text.
    pub fn help(self) -> &'static str {
        match self {
            ContextGauge::TopologyRevision => "Revision of the published snapshot",
            ContextGauge::RegistryNodes => "Nodes in the published registry",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Metrics owned by one configuration context.
#[derive(Debug, Default)]
pub struct ContextMetrics {
    counters: [AtomicU64; ContextCounter::ALL.len()],
    gauges: [AtomicI64; ContextGauge::ALL.len()],
}

impl ContextMetrics {
    /// Create a new metrics instance with every series at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one to a counter.
    pub fn incr(&self, counter: ContextCounter) {
        self.add(counter, 1);
    }

    /// Add `n` to a counter.
    pub fn add(&self, counter: ContextCounter, n: u64) {
        self.counters[counter.slot()].fetch_add(n, Ordering::Relaxed);
    }

    /// Current value of a counter.
    pub fn count(&self, counter: ContextCounter) -> u64 {
        self.counters[counter.slot()].load(Ordering::Relaxed)
    }

    pub fn set_gauge(&self, gauge: ContextGauge, value: i64) {
        self.gauges[gauge.slot()].store(value, Ordering::Relaxed);
    }

    /// Current value of a gauge.
    pub fn gauge(&self, gauge: ContextGauge) -> i64 {
        self.gauges[gauge.slot()].load(Ordering::Relaxed)
    }

    /// Record one backoff sleep.
    pub fn record_backoff(&self, delay: Duration) {
        self.incr(ContextCounter::AcquireBackoffs);
        self.add(
            ContextCounter::AcquireBackoffMicros,
            u64::try_from(delay.as_micros()).unwrap_or(u64::MAX),
        );
    }

    /// Record a published topology.
    pub fn record_publish(&self, revision: Revision, nodes: usize) {
        self.incr(ContextCounter::ReloadsApplied);
        self.set_gauge(
            ContextGauge::TopologyRevision,
            i64::try_from(revision).unwrap_or(i64::MAX),
        );
        self.set_gauge(ContextGauge::RegistryNodes, nodes as i64);
    }

    /// Get a snapshot of current metrics.
    pub fn snapshot(&self) -> ContextMetricsSnapshot {
        ContextMetricsSnapshot {
            reloads_applied: self.count(ContextCounter::ReloadsApplied),
            reloads_skipped: self.count(ContextCounter::ReloadsSkipped),
            reloads_failed: self.count(ContextCounter::ReloadsFailed),
            nodes_created: self.count(ContextCounter::NodesCreated),
            nodes_released: self.count(ContextCounter::NodesReleased),
            acquire_rounds: self.count(ContextCounter::AcquireRounds),
            acquire_backoffs: self.count(ContextCounter::AcquireBackoffs),
            acquire_backoff: Duration::from_micros(self.count(ContextCounter::AcquireBackoffMicros)),
            acquire_failures: self.count(ContextCounter::AcquireFailures),
            topology_revision: self.gauge(ContextGauge::TopologyRevision),
            registry_nodes: self.gauge(ContextGauge::RegistryNodes),
        }
    }

    /// Format metrics in Prometheus exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        for counter in ContextCounter::ALL {
            let _ = write!(
                output,
                "# HELP {name} {}\n# TYPE {name} counter\n{name} {}\n",
                counter.help(),
                self.count(counter),
                name = counter.name(),
            );
        }

        for gauge in ContextGauge::ALL {
            let _ = write!(
                output,
                "# HELP {name} {}\n# TYPE {name} gauge\n{name} {}\n",
                gauge.help(),
                self.gauge(gauge),
                name = gauge.name(),
            );
        }

        output
    }
}

/// Point-in-time copy of [`ContextMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextMetricsSnapshot {
    pub reloads_applied: u64,
    pub reloads_skipped: u64,
    pub reloads_failed: u64,
    pub nodes_created: u64,
    pub nodes_released: u64,
    pub acquire_rounds: u64,
    pub acquire_backoffs: u64,
    pub acquire_backoff: Duration,
    pub acquire_failures: u64,
    pub topology_revision: i64,
    pub registry_nodes: i64,
}

impl ContextMetricsSnapshot {
    /// Handles currently owned, as seen by the counters.
    pub fn live_handles(&self) -> u64 {
        self.nodes_created.saturating_sub(self.nodes_released)
    }
}
