//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Endpoint probe results and the active mode
//! - Failover events
//! - Query execution
//! - Sync cycles (push / pull)
//! - Cross-instance replication
//! - SSH tunnel lifecycle
//! - Attachment file sync
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `hybrid_sync_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state,
//! histograms track distributions (duration, size).

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record an endpoint probe outcome.
pub fn record_probe(endpoint: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("hybrid_sync_probes_total", "endpoint" => endpoint.to_string(), "status" => status)
        .increment(1);
}

/// Record probe latency.
pub fn record_probe_latency(endpoint: &str, latency: Duration) {
    histogram!("hybrid_sync_probe_duration_seconds", "endpoint" => endpoint.to_string())
        .record(latency.as_secs_f64());
}

/// Gauge for the active mode (0=local, 1=cloud primary, 2=cloud secondary).
pub fn set_active_mode(mode: &str) {
    let value = match mode {
        "local cache" => 0.0,
        "cloud (primary)" => 1.0,
        "cloud (secondary)" => 2.0,
        _ => -1.0,
    };
    gauge!("hybrid_sync_active_mode").set(value);
}

/// Record a failover to the local cache.
pub fn record_failover(reason: &str) {
    counter!("hybrid_sync_failovers_total", "reason" => reason.to_string()).increment(1);
}

/// Record a query execution outcome per mode.
pub fn record_query(mode: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("hybrid_sync_queries_total", "mode" => mode.to_string(), "status" => status)
        .increment(1);
}

/// Record a completed sync cycle.
pub fn record_sync_cycle(pushed: usize, matched: usize, failed_tables: usize, duration: Duration) {
    counter!("hybrid_sync_sync_cycles_total").increment(1);
    counter!("hybrid_sync_tickets_pushed_total").increment(pushed as u64);
    counter!("hybrid_sync_tickets_matched_total").increment(matched as u64);
    if failed_tables > 0 {
        counter!("hybrid_sync_sync_table_errors_total").increment(failed_tables as u64);
    }
    histogram!("hybrid_sync_sync_cycle_duration_seconds").record(duration.as_secs_f64());
}

/// Record one table pulled from the remote snapshot.
pub fn record_pull_table(table: &str, rows: usize, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("hybrid_sync_pull_tables_total", "table" => table.to_string(), "status" => status)
        .increment(1);
    if rows > 0 {
        counter!("hybrid_sync_pull_rows_total", "table" => table.to_string())
            .increment(rows as u64);
    }
}

/// Record rows copied by the cross-instance replicator.
pub fn record_replicated_rows(table: &str, inserted: u64) {
    counter!("hybrid_sync_replicated_rows_total", "table" => table.to_string())
        .increment(inserted);
}

/// Record a cross-instance replication run.
pub fn record_replication_run(direction: &str, tables: usize, errors: usize, duration: Duration) {
    counter!("hybrid_sync_replication_runs_total", "direction" => direction.to_string())
        .increment(1);
    counter!("hybrid_sync_replication_tables_total", "direction" => direction.to_string())
        .increment(tables as u64);
    if errors > 0 {
        counter!("hybrid_sync_replication_errors_total", "direction" => direction.to_string())
            .increment(errors as u64);
    }
    histogram!("hybrid_sync_replication_duration_seconds").record(duration.as_secs_f64());
}

/// Record an SSH tunnel being opened (or reused).
pub fn record_tunnel_start(host: &str, reused: bool) {
    let kind = if reused { "reused" } else { "opened" };
    counter!("hybrid_sync_tunnel_starts_total", "host" => host.to_string(), "kind" => kind)
        .increment(1);
}

/// Record one forwarded connection through a tunnel.
pub fn record_tunnel_connection(host: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("hybrid_sync_tunnel_connections_total", "host" => host.to_string(), "status" => status)
        .increment(1);
}

/// Gauge for currently open tunnels.
pub fn set_open_tunnels(count: usize) {
    gauge!("hybrid_sync_open_tunnels").set(count as f64);
}

/// Record an attachment file sync run.
pub fn record_file_sync(to_local: usize, to_network: usize, skipped: usize) {
    counter!("hybrid_sync_file_sync_runs_total").increment(1);
    counter!("hybrid_sync_files_copied_total", "direction" => "to_local")
        .increment(to_local as u64);
    counter!("hybrid_sync_files_copied_total", "direction" => "to_network")
        .increment(to_network as u64);
    if skipped > 0 {
        counter!("hybrid_sync_files_skipped_total").increment(skipped as u64);
    }
}

/// Record errors by component.
pub fn record_error(component: &str, error_type: &str) {
    counter!(
        "hybrid_sync_errors_total",
        "component" => component.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // The metrics crate uses global state. These tests verify the wrappers
    // don't panic and handle edge cases; full verification would use
    // metrics-util's DebuggingRecorder.

    #[test]
    fn test_record_probe() {
        record_probe("primary", true);
        record_probe("secondary", false);
        record_probe("", true);
    }

    #[test]
    fn test_record_probe_latency() {
        record_probe_latency("primary", Duration::from_millis(40));
        record_probe_latency("primary", Duration::ZERO);
    }

    #[test]
    fn test_set_active_mode_all_modes() {
        set_active_mode("local cache");
        set_active_mode("cloud (primary)");
        set_active_mode("cloud (secondary)");
        set_active_mode("unknown");
    }

    #[test]
    fn test_record_failover() {
        record_failover("query connectivity fault");
        record_failover("probe chain exhausted");
    }

    #[test]
    fn test_record_query() {
        record_query("cloud (primary)", true);
        record_query("local cache", false);
    }

    #[test]
    fn test_record_sync_cycle() {
        record_sync_cycle(3, 2, 0, Duration::from_secs(1));
        record_sync_cycle(0, 0, 2, Duration::ZERO);
    }

    #[test]
    fn test_record_pull_table() {
        record_pull_table("tickets", 42, true);
        record_pull_table("assets", 0, false);
    }

    #[test]
    fn test_record_replication() {
        record_replicated_rows("tickets", 10);
        record_replication_run("primary_to_secondary", 9, 0, Duration::from_secs(2));
        record_replication_run("secondary_to_primary", 0, 3, Duration::ZERO);
    }

    #[test]
    fn test_record_tunnel() {
        record_tunnel_start("vps.example.com", false);
        record_tunnel_start("vps.example.com", true);
        record_tunnel_connection("vps.example.com", true);
        record_tunnel_connection("vps.example.com", false);
        set_open_tunnels(0);
        set_open_tunnels(2);
    }

    #[test]
    fn test_record_file_sync() {
        record_file_sync(2, 3, 0);
        record_file_sync(0, 0, 5);
    }

    #[test]
    fn test_record_error() {
        record_error("resolver", "probe_timeout");
        record_error("sync", "table_pull");
    }
}
