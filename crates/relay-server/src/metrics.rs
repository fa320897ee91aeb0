//! Metrics collection and export for Relay.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tenvis_relay_core::{BroadcastReport, DeliveryError};
use tracing::info;

/// Metric names.
pub mod names {
    pub const SUBSCRIBERS_TOTAL: &str = "relay_subscribers_total";
    pub const SUBSCRIBERS_ACTIVE: &str = "relay_subscribers_active";
    pub const MESSAGES_PUBLISHED: &str = "relay_messages_published_total";
    pub const FRAMES_DELIVERED: &str = "relay_frames_delivered_total";
    pub const DELIVERY_FAILURES: &str = "relay_delivery_failures_total";
    pub const REQUESTS_REJECTED: &str = "relay_requests_rejected_total";
    pub const BROADCAST_SECONDS: &str = "relay_broadcast_seconds";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SUBSCRIBERS_TOTAL,
        "Total number of subscribers since server start"
    );
    metrics::describe_gauge!(
        names::SUBSCRIBERS_ACTIVE,
        "Current number of open event streams"
    );
    metrics::describe_counter!(
        names::MESSAGES_PUBLISHED,
        "Total number of messages accepted for broadcast"
    );
    metrics::describe_counter!(
        names::FRAMES_DELIVERED,
        "Total number of frames queued to subscribers"
    );
    metrics::describe_counter!(
        names::DELIVERY_FAILURES,
        "Total number of frames dropped per subscriber"
    );
    metrics::describe_counter!(
        names::REQUESTS_REJECTED,
        "Total number of rejected requests"
    );
    metrics::describe_histogram!(
        names::BROADCAST_SECONDS,
        "Time to fan out one message in seconds"
    );

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new subscriber.
pub fn record_subscribe() {
    counter!(names::SUBSCRIBERS_TOTAL).increment(1);
    gauge!(names::SUBSCRIBERS_ACTIVE).increment(1.0);
}

/// Record a subscriber going away.
pub fn record_unsubscribe() {
    gauge!(names::SUBSCRIBERS_ACTIVE).decrement(1.0);
}

/// Record the outcome of one broadcast.
pub fn record_broadcast(report: &BroadcastReport, seconds: f64) {
    counter!(names::MESSAGES_PUBLISHED).increment(1);
    counter!(names::FRAMES_DELIVERED).increment(report.delivered as u64);
    if report.closed > 0 {
        counter!(names::DELIVERY_FAILURES, "reason" => DeliveryError::Closed.reason())
            .increment(report.closed as u64);
    }
    if report.lagging > 0 {
        counter!(names::DELIVERY_FAILURES, "reason" => DeliveryError::Full.reason())
            .increment(report.lagging as u64);
    }
    histogram!(names::BROADCAST_SECONDS).record(seconds);
}

/// Record a rejected request.
pub fn record_rejection(code: &'static str) {
    counter!(names::REQUESTS_REJECTED, "code" => code).increment(1);
}

/// Metrics guard that records the unsubscribe on drop.
pub struct SubscriberMetricsGuard;

impl SubscriberMetricsGuard {
    /// Create a new metrics guard, recording a subscribe.
    #[must_use]
    pub fn new() -> Self {
        record_subscribe();
        Self
    }
}

impl Default for SubscriberMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SubscriberMetricsGuard {
    fn drop(&mut self) {
        record_unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_guard() {
        // Just test that it doesn't panic
        let _guard = SubscriberMetricsGuard::new();
    }

    #[test]
    fn test_record_broadcast_without_recorder() {
        let report = BroadcastReport {
            recipients: 3,
            delivered: 1,
            closed: 1,
            lagging: 1,
        };
        record_broadcast(&report, 0.001);
        record_rejection("empty_body");
    }

    #[test]
    fn test_rejection_counter_covers_all_requests() {
        assert_eq!(names::REQUESTS_REJECTED, "relay_requests_rejected_total");
        record_rejection("too_many_subscribers");
    }
}
