use std::net::SocketAddr;

// ── Engine counters ──────────────────────────────────────────────

/// Counter: reservations successfully created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "reserva_reservations_created_total";

/// Counter: create/extend attempts rejected with an interval conflict.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "reserva_reservation_conflicts_total";

// ── Periodic jobs ────────────────────────────────────────────────

/// Counter: reservations reclaimed by the auto-cancellation sweeper.
pub const SWEEPER_CANCELLED_TOTAL: &str = "reserva_sweeper_cancelled_total";

/// Histogram: sweep cycle duration in seconds (lock held).
pub const SWEEP_CYCLE_DURATION_SECONDS: &str = "reserva_sweep_cycle_duration_seconds";

/// Counter: outbox messages delivered.
pub const OUTBOX_SENT_TOTAL: &str = "reserva_outbox_sent_total";

/// Counter: delivery failures scheduled for retry.
pub const OUTBOX_RETRIED_TOTAL: &str = "reserva_outbox_retried_total";

/// Counter: messages dead-lettered after exhausting their retry budget.
pub const OUTBOX_DEAD_LETTERED_TOTAL: &str = "reserva_outbox_dead_lettered_total";

/// Histogram: dispatch cycle duration in seconds (lock held).
pub const DISPATCH_CYCLE_DURATION_SECONDS: &str = "reserva_dispatch_cycle_duration_seconds";

/// Counter: periodic cycles skipped because the named lock was busy.
pub const LOCK_BUSY_TOTAL: &str = "reserva_lock_busy_total";

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
