use std::net::SocketAddr;

use crate::error::ErrorClass;

// ── RED metrics (update-driven) ─────────────────────────────────

/// Counter: chat updates handled. Labels: kind, status.
pub const UPDATES_TOTAL: &str = "roombook_updates_total";

/// Histogram: update handling latency in seconds. Labels: kind.
pub const UPDATE_DURATION_SECONDS: &str = "roombook_update_duration_seconds";

/// Counter: updates abandoned because they ran past the per-update timeout.
pub const UPDATES_TIMED_OUT_TOTAL: &str = "roombook_updates_timed_out_total";

/// Counter: updates dropped because the sender's lane was full.
pub const UPDATES_SHED_TOTAL: &str = "roombook_updates_shed_total";

/// Counter: policy failures surfaced to users. Labels: class.
pub const BOOKING_ERRORS_TOTAL: &str = "roombook_booking_errors_total";

// ── Domain counters ─────────────────────────────────────────────

pub const BOOKINGS_CREATED_TOTAL: &str = "roombook_bookings_created_total";

/// Counter: creations rejected by the room exclusion check.
pub const BOOKING_CONFLICTS_TOTAL: &str = "roombook_booking_conflicts_total";

pub const BOOKINGS_CANCELLED_TOTAL: &str = "roombook_bookings_cancelled_total";

/// Counter: bookings removed by the retention sweep.
pub const BOOKINGS_SWEPT_TOTAL: &str = "roombook_bookings_swept_total";

pub const LOG_ENTRIES_TOTAL: &str = "roombook_log_entries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: wizards currently held in memory.
pub const SESSIONS_ACTIVE: &str = "roombook_sessions_active";

/// Counter: idle sessions evicted by the sweeper.
pub const SESSIONS_EVICTED_TOTAL: &str = "roombook_sessions_evicted_total";

/// Gauge: per-user dispatch lanes alive.
pub const LANES_ACTIVE: &str = "roombook_lanes_active";

/// Counter: role lookups. Labels: result (hit, miss, degraded).
pub const ROLE_LOOKUPS_TOTAL: &str = "roombook_role_lookups_total";

/// Counter: digest publish/edit failures.
pub const DIGEST_FAILURES_TOTAL: &str = "roombook_digest_failures_total";

/// Counter: alerts sent to the operator chat.
pub const OPERATOR_ALERTS_TOTAL: &str = "roombook_operator_alerts_total";

/// Gauge: gateway connections open.
pub const GATEWAY_CONNECTIONS_ACTIVE: &str = "roombook_gateway_connections_active";

/// Counter: gateway connections refused at the limit.
pub const GATEWAY_CONNECTIONS_REJECTED_TOTAL: &str = "roombook_gateway_connections_rejected_total";

/// Histogram: journal group-commit flush duration in seconds.
pub const JOURNAL_FLUSH_DURATION_SECONDS: &str = "roombook_journal_flush_duration_seconds";

/// Histogram: journal group-commit batch size (events per flush).
pub const JOURNAL_FLUSH_BATCH_SIZE: &str = "roombook_journal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter: {e}"),
    }
}

pub fn class_label(class: ErrorClass) -> &'static str {
    match class {
        ErrorClass::Validation => "validation",
        ErrorClass::Conflict => "conflict",
        ErrorClass::NotFound => "not_found",
        ErrorClass::Infrastructure => "infrastructure",
    }
}
