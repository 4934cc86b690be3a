use std::sync::Arc;

use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;

/// GET /metrics — Prometheus exposition.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> String {
    handle.render()
}
