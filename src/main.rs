use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use reserva::clock::SystemClock;
use reserva::config::Config;
use reserva::delivery::LogDelivery;
use reserva::dispatcher::Dispatcher;
use reserva::engine::Engine;
use reserva::store::MemoryStore;
use reserva::sweeper::Sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    reserva::observability::init(config.metrics_port);

    info!("reserva starting");
    info!(
        "  check-in window: -{}min / +{}min, default extension: {}min",
        config.check_in_lead_min, config.auto_cancel_grace_min, config.default_extension_min
    );
    info!(
        "  sweep every {}s, dispatch every {}s (batch {}, max {} attempts)",
        config.sweep_interval_secs,
        config.dispatch_interval_secs,
        config.dispatch_batch_size,
        config.max_delivery_attempts
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(SystemClock);
    let engine = Arc::new(Engine::new(store.clone(), clock.clone(), config.engine()));

    let shutdown = CancellationToken::new();

    let sweeper = Arc::new(Sweeper::new(
        engine.clone(),
        store.clone(),
        clock.clone(),
        config.sweeper(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        store.clone(),
        Arc::new(LogDelivery),
        clock.clone(),
        config.dispatcher(),
    ));

    let sweep_task = tokio::spawn(sweeper.run(shutdown.clone()));
    let dispatch_task = tokio::spawn(dispatcher.run(shutdown.clone()));

    // Graceful shutdown: cancel the periodic loops on SIGTERM/ctrl-c and let
    // the in-flight cycles finish.
    let signal = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    signal.await;

    info!("shutdown signal received, stopping periodic jobs");
    shutdown.cancel();
    let _ = sweep_task.await;
    let _ = dispatch_task.await;

    info!("reserva stopped");
    Ok(())
}
