//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (requests, guard decisions, scan latency)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status
//! - `gateway_request_duration_seconds` (histogram): latency distribution
//! - `gateway_rate_limited_total` (counter): admission rejections
//! - `gateway_upload_threats_total` (counter): unsafe scan verdicts
//! - `gateway_security_events_total` (counter): events by kind, severity
//!
//! # Design Decisions
//! - Low-overhead metric updates (atomic operations)
//! - Recording helpers are no-ops until the exporter is installed

use std::net::SocketAddr;
use std::time::Instant;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::security::events::{EventKind, Severity};

/// Install the Prometheus exporter and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, start_time: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
    ];
    metrics::counter!("gateway_requests_total", &labels).increment(1);
    metrics::histogram!("gateway_request_duration_seconds", &labels)
        .record(start_time.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    metrics::counter!("gateway_rate_limited_total").increment(1);
}

pub fn record_upload_threat() {
    metrics::counter!("gateway_upload_threats_total").increment(1);
}

pub fn record_security_event(kind: EventKind, severity: Severity) {
    let labels = [
        ("kind", format!("{kind:?}").to_lowercase()),
        ("severity", format!("{severity:?}").to_lowercase()),
    ];
    metrics::counter!("gateway_security_events_total", &labels).increment(1);
}
