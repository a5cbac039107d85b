//! Prometheus metrics for the SearchCluster operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports:
//! - `searchdb_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `searchdb_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `searchdb_ensure_verbs_total` (counter): node-set create-or-patch outcomes labeled by verb.
//! - `searchdb_admission_decisions_total` (counter): webhook decisions labeled by operation and outcome.

use std::sync::atomic::AtomicU64;

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use super::ensure::Verb;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "searchcluster"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error kind, see `Error::kind`
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct VerbLabels {
    pub verb: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AdmissionLabels {
    pub operation: String,
    pub allowed: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~65s across 17 buckets; a pass may include the settle wait.
        Histogram::new(exponential_buckets(0.001, 2.0, 17))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static ENSURE_VERBS_TOTAL: Lazy<Family<VerbLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static ADMISSION_DECISIONS_TOTAL: Lazy<Family<AdmissionLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "searchdb_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "searchdb_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "searchdb_ensure_verbs_total",
        "Node set create-or-patch outcomes",
        ENSURE_VERBS_TOTAL.clone(),
    );
    registry.register(
        "searchdb_admission_decisions_total",
        "Admission webhook decisions",
        ADMISSION_DECISIONS_TOTAL.clone(),
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

pub fn inc_ensure_verb(verb: Verb) {
    let labels = VerbLabels {
        verb: verb.to_string().to_lowercase(),
    };
    ENSURE_VERBS_TOTAL.get_or_create(&labels).inc();
}

pub fn inc_admission_decision(operation: &str, allowed: bool) {
    let labels = AdmissionLabels {
        operation: operation.to_string(),
        allowed: allowed.to_string(),
    };
    ADMISSION_DECISIONS_TOTAL.get_or_create(&labels).inc();
}

/// Render the registry in the OpenMetrics text format.
pub fn encode_registry() -> Result<String, std::fmt::Error> {
    let mut buffer = String::new();
    prometheus_client::encoding::text::encode(&mut buffer, &REGISTRY)?;
    Ok(buffer)
}
