//! Prometheus metrics
//!
//! - `xelon_ccm_reconcile_total{controller,result}` - counter of reconciliations
//! - `xelon_ccm_reconcile_duration_seconds{controller}` - histogram of reconcile times
//! - `xelon_ccm_node_cache_refresh_total{result}` - counter of node inventory refreshes
//! - `xelon_ccm_forwarding_rule_operations_total{operation}` - counter of rule mutations

use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Install the global Prometheus recorder.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn describe_metrics() {
    describe_counter!(
        "xelon_ccm_reconcile_total",
        "Total number of reconciliations by controller and result"
    );
    describe_histogram!(
        "xelon_ccm_reconcile_duration_seconds",
        "Duration of reconciliations in seconds"
    );
    describe_counter!(
        "xelon_ccm_node_cache_refresh_total",
        "Total number of node inventory refreshes by result"
    );
    describe_counter!(
        "xelon_ccm_forwarding_rule_operations_total",
        "Total number of forwarding rules created, updated or deleted"
    );
}

pub fn record_reconcile(controller: &'static str, result: &'static str, duration: Duration) {
    counter!("xelon_ccm_reconcile_total", "controller" => controller, "result" => result)
        .increment(1);
    histogram!("xelon_ccm_reconcile_duration_seconds", "controller" => controller)
        .record(duration.as_secs_f64());
}

pub fn record_node_cache_refresh(result: &'static str) {
    counter!("xelon_ccm_node_cache_refresh_total", "result" => result).increment(1);
}

pub fn record_forwarding_rule_operations(operation: &'static str, count: usize) {
    counter!("xelon_ccm_forwarding_rule_operations_total", "operation" => operation)
        .increment(count as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        record_reconcile("service", "success", Duration::from_millis(20));
        record_node_cache_refresh("error");
        record_forwarding_rule_operations("create", 2);
    }
}
