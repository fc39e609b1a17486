use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: HTTP requests handled. Labels: method, status.
pub const HTTP_REQUESTS_TOTAL: &str = "roombook_http_requests_total";

/// Histogram: HTTP request latency in seconds. Labels: method.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "roombook_http_request_duration_seconds";

// ── Domain metrics ──────────────────────────────────────────────

/// Counter: booking requests. Labels: outcome (created, conflict, capacity, invalid).
pub const BOOKING_REQUESTS_TOTAL: &str = "roombook_booking_requests_total";

/// Counter: approve/reject transitions. Labels: status.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "roombook_booking_transitions_total";

/// Counter: bookings released through a checkout token.
pub const CHECKOUTS_TOTAL: &str = "roombook_checkouts_total";

/// Counter: bookings deleted by the expiry sweeper.
pub const SWEPT_BOOKINGS_TOTAL: &str = "roombook_swept_bookings_total";

/// Counter: outbound notifications. Labels: kind, status (sent, failed).
pub const NOTIFICATIONS_TOTAL: &str = "roombook_notifications_total";

// ── Access control ──────────────────────────────────────────────

/// Counter: refused credentials.
pub const AUTH_FAILURES_TOTAL: &str = "roombook_auth_failures_total";

/// Counter: requests rejected by the rate limiter.
pub const RATE_LIMITED_TOTAL: &str = "roombook_rate_limited_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Counter: WAL compactions. Labels: status.
pub const WAL_COMPACTIONS_TOTAL: &str = "roombook_wal_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
