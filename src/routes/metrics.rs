use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use crate::services::queue::WorkQueue;

#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: Arc<dyn WorkQueue>,
}

/// Prometheus scrape endpoint. Samples the queue depth gauge before
/// rendering so it is current at scrape time.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.queue.depth().await {
        Ok(depth) => metrics::gauge!("compression_queue_depth").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "Could not sample queue depth"),
    }
    state.handle.render()
}
