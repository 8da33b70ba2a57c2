use std::sync::Arc;

use axum::http::StatusCode;
use axum::Router;
use log::info;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;

use crate::configuration::Settings;
use crate::routes::{cors_layer, create_router, AppState};
use crate::store::{AirQualityStore, PgStore, SupabaseStore};

/// Pick the backend: Supabase when its credentials are configured, otherwise
/// a direct Postgres pool.
pub fn build_store(settings: &Settings) -> Arc<dyn AirQualityStore> {
    match &settings.supabase {
        Some(supabase) => Arc::new(SupabaseStore::new(supabase)),
        None => Arc::new(PgStore::connect_lazy(&settings.database)),
    }
}

pub fn build_app(settings: &Settings, store: Arc<dyn AirQualityStore>) -> Router {
    let state = AppState::new(store, settings.application.health_check_timeout());
    create_router(state)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            settings.application.request_timeout(),
        ))
        .layer(cors_layer(&settings.application.origins()))
}

/// Serve until Ctrl-C or SIGTERM, then close the store.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
    let store = build_store(&settings);
    let app = build_app(&settings, store.clone());

    let address = settings.application.address();
    let listener = TcpListener::bind(&address).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    store.close().await;
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
