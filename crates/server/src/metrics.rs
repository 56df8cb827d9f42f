//! Prometheus metrics for the upvault server.
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! Metrics carry no user ids, emails or upload ids, but they do expose
//! aggregate usage; restrict the endpoint at the network level.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Account metrics
pub static USERS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("upvault_users_created_total", "Total number of accounts created")
        .expect("metric creation failed")
});

pub static LOGINS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("upvault_logins_total", "Login attempts by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static AUTH_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "upvault_auth_failures_total",
            "Rejected bearer tokens by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

// Upload metrics
pub static UPLOADS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("upvault_uploads_created_total", "Total number of uploads created")
        .expect("metric creation failed")
});

pub static UPLOADS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("upvault_uploads_deleted_total", "Total number of uploads deleted")
        .expect("metric creation failed")
});

pub static BYTES_RECEIVED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "upvault_bytes_received_total",
        "Total upload bytes persisted by PATCH requests",
    )
    .expect("metric creation failed")
});

pub static OWNERSHIP_DENIALS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "upvault_ownership_denials_total",
        "Requests refused because the caller does not own the upload",
    )
    .expect("metric creation failed")
});

// Lifecycle synchronizer metrics
pub static SYNC_EVENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "upvault_sync_events_total",
            "Lifecycle events processed by kind and outcome",
        ),
        &["kind", "outcome"],
    )
    .expect("metric creation failed")
});

pub static SYNC_CONSUMERS_PANICKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "upvault_sync_consumers_panicked_total",
        "Total number of lifecycle consumers that panicked",
    )
    .expect("metric creation failed")
});

// Reconciliation metrics
pub static RECONCILE_ACTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "upvault_reconcile_actions_total",
            "Ledger repairs made by the reconciliation sweep",
        ),
        &["action"],
    )
    .expect("metric creation failed")
});

pub static RECONCILE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "upvault_reconcile_duration_seconds",
            "Time taken by one reconciliation sweep",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0]),
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests can build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(USERS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LOGINS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(AUTH_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_CREATED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOADS_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_RECEIVED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(OWNERSHIP_DENIALS.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(SYNC_EVENTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SYNC_CONSUMERS_PANICKED.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(RECONCILE_ACTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RECONCILE_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus metrics endpoint.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record the outcome of one lifecycle event.
pub fn record_sync_event(kind: &str, outcome: &str) {
    SYNC_EVENTS.with_label_values(&[kind, outcome]).inc();
}

pub fn record_auth_failure(reason: &str) {
    AUTH_FAILURES.with_label_values(&[reason]).inc();
}
