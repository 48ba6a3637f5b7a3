//! Metrics collection for assoc-graph
//!
//! Prometheus counters registered in a crate-private registry. Recording is a
//! plain counter increment; if registration ever fails the recorders become
//! no-ops instead of aborting graph operations.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry, IntCounter, IntCounterVec,
    Registry, TextEncoder,
};
use tracing::warn;

/// Registry holding every assoc-graph metric
static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

/// Graph mutation and event counters
pub struct GraphMetrics {
    /// Associations created (including materialized ones)
    pub associations_created: IntCounter,
    /// Associations destroyed
    pub associations_destroyed: IntCounter,
    /// Events delivered through the bus
    pub events_dispatched: IntCounter,
    /// Listener calls that returned an error or panicked
    pub handler_failures: IntCounter,
}

/// Dump/delta and backend counters
pub struct SyncMetrics {
    /// Deltas applied, labelled by outcome
    pub deltas_applied: IntCounterVec,
    /// Incoming links dropped by the last-writer-wins rule
    pub deltas_skipped: IntCounter,
    /// Full dumps applied through a subscription
    pub subscriptions_applied: IntCounter,
    /// Backend handler calls that failed
    pub backend_failures: IntCounter,
}

/// Every metric of the crate
pub struct Metrics {
    /// Graph metrics
    pub graph: GraphMetrics,
    /// Sync metrics
    pub sync: SyncMetrics,
}

impl Metrics {
    fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            graph: GraphMetrics::new(registry)?,
            sync: SyncMetrics::new(registry)?,
        })
    }

    /// Global metrics instance, `None` when registration failed
    pub fn global() -> Option<&'static Metrics> {
        static INSTANCE: Lazy<Option<Metrics>> = Lazy::new(|| match Metrics::new(&REGISTRY) {
            Ok(metrics) => Some(metrics),
            Err(err) => {
                warn!(error = %err, "metrics registration failed, recording disabled");
                None
            }
        });
        INSTANCE.as_ref()
    }
}

impl GraphMetrics {
    fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            associations_created: register_int_counter_with_registry!(
                "ag_associations_created_total",
                "Total number of associations created",
                registry
            )?,
            associations_destroyed: register_int_counter_with_registry!(
                "ag_associations_destroyed_total",
                "Total number of associations destroyed",
                registry
            )?,
            events_dispatched: register_int_counter_with_registry!(
                "ag_events_dispatched_total",
                "Total number of events dispatched to listeners",
                registry
            )?,
            handler_failures: register_int_counter_with_registry!(
                "ag_handler_failures_total",
                "Total number of failed listener calls",
                registry
            )?,
        })
    }
}

impl SyncMetrics {
    fn new(registry: &Registry) -> prometheus::Result<Self> {
        Ok(Self {
            deltas_applied: register_int_counter_vec_with_registry!(
                "ag_deltas_applied_total",
                "Total number of deltas applied by outcome",
                &["outcome"],
                registry
            )?,
            deltas_skipped: register_int_counter_with_registry!(
                "ag_deltas_skipped_total",
                "Total number of incoming links skipped as stale",
                registry
            )?,
            subscriptions_applied: register_int_counter_with_registry!(
                "ag_subscriptions_applied_total",
                "Total number of dumps applied through subscriptions",
                registry
            )?,
            backend_failures: register_int_counter_with_registry!(
                "ag_backend_failures_total",
                "Total number of failed storage backend calls",
                registry
            )?,
        })
    }
}

/// Force registration so the first scrape lists every metric
pub fn init_registry() {
    Metrics::global();
}

/// Count one created association
pub fn record_association_created() {
    if let Some(m) = Metrics::global() {
        m.graph.associations_created.inc();
    }
}

/// Count one destroyed association
pub fn record_association_destroyed() {
    if let Some(m) = Metrics::global() {
        m.graph.associations_destroyed.inc();
    }
}

/// Count one delivered event
pub fn record_event_dispatched() {
    if let Some(m) = Metrics::global() {
        m.graph.events_dispatched.inc();
    }
}

/// Count one failed listener call
pub fn record_handler_failure() {
    if let Some(m) = Metrics::global() {
        m.graph.handler_failures.inc();
    }
}

/// Count one applied delta with its outcome label
pub fn record_delta(outcome: &str) {
    if let Some(m) = Metrics::global() {
        m.sync.deltas_applied.with_label_values(&[outcome]).inc();
    }
}

/// Count one stale incoming link
pub fn record_delta_skipped() {
    if let Some(m) = Metrics::global() {
        m.sync.deltas_skipped.inc();
    }
}

/// Count one applied subscription
pub fn record_subscription() {
    if let Some(m) = Metrics::global() {
        m.sync.subscriptions_applied.inc();
    }
}

/// Count one failed backend call
pub fn record_backend_failure() {
    if let Some(m) = Metrics::global() {
        m.sync.backend_failures.inc();
    }
}

/// Render every metric in the Prometheus text exposition format
pub fn gather_text() -> String {
    init_registry();
    TextEncoder::new().encode_to_string(&REGISTRY.gather()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_counters_show_up_in_the_exposition() {
        record_association_created();
        record_delta("inserted");
        record_backend_failure();

        let text = gather_text();
        assert!(text.contains("ag_associations_created_total"));
        assert!(text.contains("ag_deltas_applied_total{outcome=\"inserted\"}"));
        assert!(text.contains("ag_backend_failures_total"));
    }

    #[test]
    fn counters_only_grow() {
        let before = Metrics::global().map(|m| m.sync.deltas_skipped.get()).unwrap_or(0);
        record_delta_skipped();
        let after = Metrics::global().map(|m| m.sync.deltas_skipped.get()).unwrap_or(0);
        assert!(after > before);
    }
}
