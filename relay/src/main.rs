use std::sync::Arc;

use tracing::info;

use relay::config::RelayConfig;
use relay::queue::DropOldestQueue;
use relay::registry::AthleteRegistry;
use relay::state::AppState;
use relay::{control, ingest, subscriber, watchdog};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "relay=info".into()),
        )
        .init();

    let config = match RelayConfig::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "configuration error, refusing to start");
            std::process::exit(1);
        }
    };

    let registry_table = match AthleteRegistry::load_from_path(&config.athletes_config) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(error = %e, "failed to load athlete registry");
            std::process::exit(1);
        }
    };
    let registry = AthleteRegistry::new(registry_table);

    let bind_addr = config.bind_addr;
    let subscriber_queue_depth = config.subscriber_queue_depth;
    let position_endpoint = config.position_endpoint.clone();
    let gate_endpoint = config.gate_endpoint.clone();

    let state = Arc::new(AppState::new(config, registry));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let position_queue = Arc::new(DropOldestQueue::new(subscriber_queue_depth));
    let gate_queue = Arc::new(DropOldestQueue::new(subscriber_queue_depth));

    let position_sub = tokio::spawn(subscriber::run_subscriber(
        "position",
        position_endpoint,
        position_queue.clone(),
        state.position_connected.clone(),
        shutdown_rx.clone(),
    ));
    let gate_sub = tokio::spawn(subscriber::run_subscriber(
        "gate",
        gate_endpoint,
        gate_queue.clone(),
        state.gate_connected.clone(),
        shutdown_rx.clone(),
    ));

    let position_ingest = tokio::spawn(ingest::run_position_ingest(
        state.clone(),
        position_queue,
        shutdown_rx.clone(),
    ));
    let gate_ingest = tokio::spawn(ingest::run_gate_ingest(
        state.clone(),
        gate_queue,
        shutdown_rx.clone(),
    ));

    let watchdog_task = tokio::spawn(watchdog::run_watchdog(state.clone(), shutdown_rx.clone()));

    let app = control::router(state.clone());
    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, %bind_addr, "failed to bind control surface");
            std::process::exit(1);
        }
    };
    info!(%bind_addr, "relay listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await;
    if let Err(e) = serve_result {
        tracing::error!(error = %e, "control surface server error");
    }

    // Stop subscribers -> drain ingest -> stop the watchdog. The broadcaster
    // and recorder need no explicit stop signal: clients disconnect when the
    // process exits, and the recorder is stopped explicitly below.
    let _ = tokio::join!(position_sub, gate_sub, position_ingest, gate_ingest, watchdog_task);

    if state.recorder.is_recording().await {
        if let Err(e) = state.recorder.stop().await {
            tracing::warn!(error = %e, "failed to cleanly stop recording during shutdown");
        }
    }

    info!("relay shutdown complete");
}

async fn shutdown_signal(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}
