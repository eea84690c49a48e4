//! Prometheus metrics for pipeline runs.
//!
//! This module provides metrics for:
//! - Stages (runs, items by outcome, duration)
//! - Remote services (requests by status, retry attempts)
//!
//! Runs are short-lived batch jobs, so the registry is exported as a
//! node-exporter textfile at the end of a run instead of being scraped.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::path::Path;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    for metric in all_metrics() {
        // Only fails on duplicate registration, which all_metrics() never produces.
        let _ = registry.register(metric);
    }
    registry
});

// =============================================================================
// Stage Metrics
// =============================================================================

/// Stage runs by result.
pub static STAGE_RUNS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("okar_stage_runs_total", "Total stage runs"),
        &["stage", "result"], // result: "success", "failed"
    )
    .unwrap()
});

/// Items handled by a stage, by outcome.
pub static STAGE_ITEMS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("okar_stage_items_total", "Total items handled by stages"),
        &["stage", "outcome"], // outcome: "processed", "unchanged", "skipped"
    )
    .unwrap()
});

/// Stage duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("okar_stage_duration_seconds", "Duration of a stage run")
            .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Remote Service Metrics
// =============================================================================

/// Requests to remote services by status class.
pub static HTTP_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("okar_http_requests_total", "Total requests to remote services"),
        &["service", "status"],
    )
    .unwrap()
});

/// Retry attempts after transient failures.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("okar_retry_attempts_total", "Total retries of remote calls"),
        &["service"],
    )
    .unwrap()
});

/// Get all metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(STAGE_RUNS.clone()),
        Box::new(STAGE_ITEMS.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(HTTP_REQUESTS.clone()),
        Box::new(RETRY_ATTEMPTS.clone()),
    ]
}

/// Records the status of a remote request.
pub fn record_request(service: &str, status: u16) {
    let status = status.to_string();
    HTTP_REQUESTS
        .with_label_values(&[service, status.as_str()])
        .inc();
}

/// Renders the registry in the Prometheus text format.
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Writes the registry to a textfile, replacing it atomically.
pub async fn export_textfile(path: &Path) -> std::io::Result<()> {
    let body = render().map_err(|e| std::io::Error::other(e.to_string()))?;
    crate::fsutil::write_atomic(path, body.as_bytes()).await
}
