//! Prometheus metrics for the gameserver ingress controller
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports:
//! - `gameserver_ingress_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `gameserver_ingress_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `gameserver_ingress_events_skipped_total` (counter): GameServer events dropped by the state gate, labeled by reason.
//! - `gameserver_ingress_resources_created_total` (counter): Services and Ingresses created, labeled by kind.
//! - `gameserver_ingress_ready_total` (counter): GameServers annotated with the readiness marker.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "gameserver"
    pub controller: String,
}

/// Labels for reconcile error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, e.g. "kube", "validation"
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SkipLabels {
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ResourceLabels {
    /// "Service" or "Ingress"
    pub kind: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static EVENTS_SKIPPED_TOTAL: Lazy<Family<SkipLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static RESOURCES_CREATED_TOTAL: Lazy<Family<ResourceLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static GAMESERVERS_READY_TOTAL: Lazy<Counter<u64, AtomicU64>> = Lazy::new(Counter::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "gameserver_ingress_reconcile_duration_seconds",
        "Duration of GameServer reconciles in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "gameserver_ingress_reconcile_errors",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "gameserver_ingress_events_skipped",
        "GameServer events skipped before reconciling",
        EVENTS_SKIPPED_TOTAL.clone(),
    );
    registry.register(
        "gameserver_ingress_resources_created",
        "Services and Ingresses created for GameServers",
        RESOURCES_CREATED_TOTAL.clone(),
    );
    registry.register(
        "gameserver_ingress_ready",
        "GameServers annotated as ingress ready",
        GAMESERVERS_READY_TOTAL.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_event_skipped(reason: &str) {
    let labels = SkipLabels {
        reason: reason.to_string(),
    };
    EVENTS_SKIPPED_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_resource_created(kind: &str) {
    let labels = ResourceLabels {
        kind: kind.to_string(),
    };
    RESOURCES_CREATED_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_gameserver_ready() {
    GAMESERVERS_READY_TOTAL.inc();
}
