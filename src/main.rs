use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use media_squeeze::{
    app_state::{AppState, Backends},
    config::AppConfig,
    routes::{self, metrics::MetricsState, MAX_UPLOAD_BYTES},
    telemetry,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    telemetry::init_tracing();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing media-squeeze gateway");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!(
        "compression_jobs_total",
        "Total compression jobs submitted"
    );
    metrics::describe_gauge!(
        "compression_queue_depth",
        "Job ids currently waiting in the work queue"
    );

    let backends = Backends::init(&config, true)
        .await
        .expect("Failed to connect to backends");

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .expect("Failed to create upload directory");
    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .expect("Failed to create output directory");

    let state = AppState::new(
        backends.store.clone(),
        backends.queue.clone(),
        config.upload_dir.clone(),
    );
    let metrics_state = MetricsState {
        handle: prometheus_handle,
        queue: backends.queue.clone(),
    };

    let app = routes::api_router(state)
        .merge(
            Router::new()
                .route("/metrics", get(routes::metrics::prometheus_metrics))
                .with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(MAX_UPLOAD_BYTES));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    backends.shutdown().await;
    tracing::info!("Gateway stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested, draining connections");
}
