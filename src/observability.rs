use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "carebook_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "carebook_query_duration_seconds";

// ── Booking outcomes ────────────────────────────────────────────

/// Counter: appointments successfully booked.
pub const APPOINTMENTS_BOOKED_TOTAL: &str = "carebook_appointments_booked_total";

/// Counter: bookings refused because another appointment holds the slot.
pub const BOOKING_CONFLICTS_TOTAL: &str = "carebook_booking_conflicts_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "carebook_connections_active";

pub const CONNECTIONS_TOTAL: &str = "carebook_connections_total";

/// Counter: connections rejected at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "carebook_connections_rejected_total";

/// Counter: logins refused for users with no session.
pub const AUTH_FAILURES_TOTAL: &str = "carebook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "carebook_wal_flush_duration_seconds";

/// Histogram: events per WAL group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "carebook_wal_flush_batch_size";

/// Counter: completed WAL compactions.
pub const WAL_COMPACTIONS_TOTAL: &str = "carebook_wal_compactions_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a statement kind.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertProfile { .. } => "insert_profile",
        Command::InsertWeeklyRule { .. } => "insert_weekly_rule",
        Command::SetWeeklyRuleActive { .. } => "update_weekly_rule",
        Command::DeleteWeeklyRule { .. } => "delete_weekly_rule",
        Command::InsertOverride { hours: None, .. } => "block_date",
        Command::InsertOverride { hours: Some(_), .. } => "insert_special_hours",
        Command::DeleteOverride { .. } => "delete_override",
        Command::InsertAppointment { .. } => "book_appointment",
        Command::SetAppointmentStatus { .. } => "update_appointment_status",
        Command::SelectSlots { .. } => "select_available_slots",
        Command::SelectDateStatus { .. } => "select_date_status",
        Command::SelectWeeklyRules { .. } => "select_weekly_rules",
        Command::SelectOverrides { .. } => "select_date_overrides",
        Command::SelectAppointments { .. } => "select_appointments",
    }
}
