use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "stayd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "stayd_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "stayd_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "stayd_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "stayd_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "stayd_tenants_active";

/// Counter: sessions refused because the startup user was not a ulid.
pub const AUTH_FAILURES_TOTAL: &str = "stayd_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "stayd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "stayd_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::RegisterUser { .. } => "register_user",
        Command::ListProperty { .. } => "list_property",
        Command::UpdateProperty { .. } => "update_property",
        Command::DelistProperty { .. } => "delist_property",
        Command::RequestBooking { .. } => "request_booking",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::AddFavorite { .. } => "add_favorite",
        Command::RemoveFavorite { .. } => "remove_favorite",
        Command::Search { .. } => "search",
        Command::SelectUser { .. } => "select_user",
        Command::SelectProperties { .. } => "select_properties",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectFavorites => "select_favorites",
        Command::SelectAvailability { .. } => "select_availability",
    }
}
