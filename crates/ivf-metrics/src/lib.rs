//! Metrics exporter and static instrumentation metadata for the IVF index
//! and its HTTP surface.

use std::sync::OnceLock;

use anyhow::{anyhow, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder if it hasn't been installed yet.
/// Subsequent calls are no-ops so every crate can call this defensively.
pub fn init() -> Result<()> {
    if HANDLE.get().is_some() {
        return Ok(());
    }

    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .map_err(|err| anyhow!("installing metrics recorder: {err}"))?;
    register_static_metadata();
    HANDLE
        .set(handle)
        .map_err(|_| anyhow!("metrics recorder already initialized"))?;
    Ok(())
}

fn register_static_metadata() {
    describe_counter!(
        "ivf_insert_total",
        Unit::Count,
        "Number of records inserted or upserted"
    );
    describe_counter!(
        "ivf_delete_total",
        Unit::Count,
        "Number of records successfully deleted"
    );
    describe_counter!(
        "ivf_query_total",
        Unit::Count,
        "Number of query operations executed"
    );
    describe_histogram!(
        "ivf_query_probed_cells",
        Unit::Count,
        "Number of cells probed per query after clamping"
    );
    describe_counter!(
        "ivf_reindex_total",
        Unit::Count,
        "Number of successful reindex operations"
    );
    describe_gauge!(
        "ivf_cell_count",
        Unit::Count,
        "Current number of cells in the index"
    );
    describe_gauge!(
        "ivf_record_count",
        Unit::Count,
        "Current number of live records across all cells"
    );
    describe_counter!(
        "ivf_api_requests_total",
        Unit::Count,
        "HTTP API request counter grouped by route and status"
    );
}

/// The Prometheus handle for metrics exposition, once initialized.
pub fn handle() -> Option<&'static PrometheusHandle> {
    HANDLE.get()
}

/// Current metrics snapshot in Prometheus text exposition format.
pub fn gather() -> Result<String> {
    let handle = HANDLE
        .get()
        .ok_or_else(|| anyhow!("metrics recorder has not been initialized"))?;
    let rendered = handle.render();
    if rendered.trim().is_empty() {
        Ok("# HELP ivf_metrics_up Exporter health indicator\n# TYPE ivf_metrics_up gauge\nivf_metrics_up 1\n".to_string())
    } else {
        Ok(rendered)
    }
}
