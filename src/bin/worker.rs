use media_squeeze::{
    app_state::Backends,
    config::AppConfig,
    services::{
        transcoder::FfmpegTranscoder,
        worker::{self, Worker, WorkerSettings},
    },
    telemetry,
};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    telemetry::init_tracing();

    tracing::info!("Starting compression worker pool");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    telemetry::install_metrics_listener(config.worker_metrics_addr)
        .expect("Failed to install Prometheus exporter");
    worker::describe_metrics();
    tracing::info!("Metrics exporter listening on {}", config.worker_metrics_addr);

    let backends = Backends::init(&config, false)
        .await
        .expect("Failed to connect to backends");

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .expect("Failed to create output directory");

    let transcoder = Arc::new(FfmpegTranscoder::new(config.ffmpeg_bin.clone()));
    let settings = WorkerSettings::from_config(&config);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut workers = JoinSet::new();
    for i in 0..config.worker_count {
        let worker = Worker::new(
            format!("worker-{i}"),
            backends.store.clone(),
            backends.queue.clone(),
            transcoder.clone(),
            settings.clone(),
        );
        let shutdown = shutdown_rx.clone();
        workers.spawn(async move { worker.run(shutdown).await });
    }

    tracing::info!(workers = config.worker_count, "Worker pool ready");

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!("Shutdown requested, letting in-flight jobs finish");
    // Receivers treat a dropped sender as shutdown too.
    let _ = shutdown_tx.send(true);

    let drained = tokio::time::timeout(config.shutdown_timeout(), async {
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task panicked");
            }
        }
    })
    .await;

    if drained.is_err() {
        // Abandoned claims go stale and are reclaimed by the watchdog.
        tracing::warn!(
            remaining = workers.len(),
            "Shutdown timeout elapsed, aborting remaining workers"
        );
        workers.shutdown().await;
    }

    backends.shutdown().await;
    tracing::info!("Worker pool stopped");
}
