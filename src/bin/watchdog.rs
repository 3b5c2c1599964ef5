use media_squeeze::{
    app_state::Backends,
    config::AppConfig,
    services::watchdog::{self, Watchdog, WatchdogSettings},
    telemetry,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    telemetry::init_tracing();

    tracing::info!("Starting heartbeat watchdog");

    let config = AppConfig::from_env().expect("Failed to load configuration");

    telemetry::install_metrics_listener(config.watchdog_metrics_addr)
        .expect("Failed to install Prometheus exporter");
    watchdog::describe_metrics();
    tracing::info!("Metrics exporter listening on {}", config.watchdog_metrics_addr);

    let backends = Backends::init(&config, false)
        .await
        .expect("Failed to connect to backends");

    let watchdog = Watchdog::new(
        backends.store.clone(),
        backends.queue.clone(),
        WatchdogSettings::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        let _ = shutdown_tx.send(true);
    });

    watchdog.run(shutdown_rx).await;

    backends.shutdown().await;
}
