use std::net::SocketAddr;

// ── Ledger reads ────────────────────────────────────────────────

/// Counter: ledger records typed at the store boundary.
pub const LEDGER_RECORDS_TOTAL: &str = "slotaudit_ledger_records_total";

/// Counter: ledger partitions that could not be read. Labels: kind.
pub const LEDGER_FETCH_FAILURES_TOTAL: &str = "slotaudit_ledger_fetch_failures_total";

/// Histogram: per-partition ledger fetch latency in seconds.
pub const LEDGER_FETCH_DURATION_SECONDS: &str = "slotaudit_ledger_fetch_duration_seconds";

// ── Audit results ───────────────────────────────────────────────

/// Counter: classified groups. Labels: verdict.
pub const GROUPS_TOTAL: &str = "slotaudit_groups_total";

/// Counter: mismatched slots. Labels: direction.
pub const MISMATCHES_TOTAL: &str = "slotaudit_mismatches_total";

/// Histogram: end-to-end audit duration in seconds.
pub const AUDIT_DURATION_SECONDS: &str = "slotaudit_audit_duration_seconds";

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
