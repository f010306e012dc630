use std::net::SocketAddr;

use crate::engine::EngineError;

// ── Request-driven ──────────────────────────────────────────────

/// Counter: activities created.
pub const ACTIVITIES_CREATED_TOTAL: &str = "rostra_activities_created_total";

/// Counter: activities deleted (with their shifts and participations).
pub const ACTIVITIES_DELETED_TOTAL: &str = "rostra_activities_deleted_total";

/// Counter: non-organizer shifts committed.
pub const SHIFTS_CREATED_TOTAL: &str = "rostra_shifts_created_total";

/// Counter: scheduling proposals rejected. Labels: reason.
pub const SCHEDULING_REJECTIONS_TOTAL: &str = "rostra_scheduling_rejections_total";

/// Counter: participation state changes. Labels: to.
pub const PARTICIPATION_TRANSITIONS_TOTAL: &str = "rostra_participation_transitions_total";

/// Counter: invariant breaches found in stored data.
pub const CONSISTENCY_VIOLATIONS_TOTAL: &str = "rostra_consistency_violations_total";

// ── Finalizer ───────────────────────────────────────────────────

/// Counter: finalizer runs.
pub const FINALIZER_RUNS_TOTAL: &str = "rostra_finalizer_runs_total";

/// Counter: activities closed by the finalizer.
pub const ACTIVITIES_FINALIZED_TOTAL: &str = "rostra_activities_finalized_total";

/// Counter: activities the finalizer failed to close (retried next run).
pub const FINALIZER_FAILURES_TOTAL: &str = "rostra_finalizer_failures_total";

/// Histogram: finalizer run duration in seconds.
pub const FINALIZER_DURATION_SECONDS: &str = "rostra_finalizer_duration_seconds";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rostra_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rostra_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Count a rejected scheduling proposal under its short reason label.
pub fn record_rejection(err: &EngineError) {
    metrics::counter!(SCHEDULING_REJECTIONS_TOTAL, "reason" => err.label()).increment(1);
}
