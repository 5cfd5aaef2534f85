//! Metrics/tracing hooks.
//!
//! Counters are emitted as tracing events; wire a subscriber (or an exporter
//! layer) up in the binary. Without the `tracing` feature these are no-ops.

use crate::report::{NodeReport, RunReport};

#[cfg(feature = "tracing")]
pub fn emit_node(report: &NodeReport) {
    tracing::info!(
        node = %report.name,
        component = %report.component_type,
        status = ?report.status,
        records_in = ?report.records_in,
        records_out = ?report.records_out,
        spilled_bytes = report.spilled_bytes,
        elapsed_ms = report.elapsed_ms,
        "node finished"
    );
    if let Some(err) = &report.error {
        tracing::error!(node = %report.name, error = %err, "node failed");
    }
}

#[cfg(not(feature = "tracing"))]
pub fn emit_node(_report: &NodeReport) {}

#[cfg(feature = "tracing")]
pub fn emit_run(report: &RunReport) {
    tracing::info!(
        run = %report.run_id,
        config = %report.config_hash.short(),
        status = ?report.status(),
        nodes = report.nodes.len(),
        peak_mem_bytes = report.peak_mem_bytes,
        spilled_bytes = report.total_spilled_bytes(),
        elapsed_ms = report.finished_ms.saturating_sub(report.started_ms),
        "run finished"
    );
}

#[cfg(not(feature = "tracing"))]
pub fn emit_run(_report: &RunReport) {}
