//! Eikon server: HTTP API, background worker and webhook receiver.

use eikon::api::{self, AppState};
use eikon::config::Config;
use eikon::gateway::{HttpAssetStore, HttpSynthesisGateway};
use eikon::prelude::*;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eikon=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(database = %config.database_url, "Starting eikon");

    let store = Arc::new(SqliteJobStore::open(&config.database_url).await?);
    let admission = Arc::new(AdmissionController::new(config.max_active_per_owner));

    let gateway: Arc<dyn SynthesisGateway> =
        Arc::new(HttpSynthesisGateway::new(config.gateway.clone())?);
    let assets: Arc<dyn AssetStore> = Arc::new(HttpAssetStore::new(
        config.assets.presign_endpoint.clone(),
        config.assets.import_endpoint.clone(),
        config.gateway.auth.clone(),
    )?);

    let engine = Arc::new(Engine::new(
        store.clone(),
        gateway,
        assets.clone(),
        admission.clone(),
        config.engine_config(),
    ));

    let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
    let worker = Worker::new(engine, receiver).start();

    let correlator = CallbackCorrelator::new(
        store.clone(),
        assets.clone(),
        admission.clone(),
        config.retry_policy,
    )
    .with_unknown_handle_grace(config.unknown_handle_grace);

    let state = AppState {
        scheduler: JobScheduler::new(store.clone(), admission, sender),
        correlator: Arc::new(correlator),
        assets,
        upload_url_ttl: config.assets.upload_url_ttl,
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Server listening on http://{}", config.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Stopping worker");
    worker.shutdown().await;
    store.close().await;

    served?;
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
