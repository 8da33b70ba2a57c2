//! Router configuration and request handlers.

mod health;
mod measurements;
mod stations;

pub use health::HealthStatus;

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use log::{info, warn};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::configuration::AllowedOrigins;
use crate::store::AirQualityStore;

/// Shared state for the handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn AirQualityStore>,
    pub health_check_timeout: Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn AirQualityStore>, health_check_timeout: Duration) -> Self {
        Self {
            store,
            health_check_timeout,
        }
    }
}

/// Create the router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/measurements", get(measurements::list_measurements))
        .route(
            "/measurements/timeseries",
            get(measurements::measurements_timeseries),
        )
        .route("/stations", get(stations::list_stations))
        .route("/stations_wkt", get(stations::list_stations_wkt))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

/// CORS for a read-only API: any method and header, no credentials.
pub fn cors_layer(origins: &AllowedOrigins) -> CorsLayer {
    let allow_origin = match origins {
        AllowedOrigins::Any => AllowOrigin::any(),
        AllowedOrigins::List(list) => {
            let values: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin {:?}", origin);
                        None
                    }
                })
                .collect();
            AllowOrigin::list(values)
        }
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();
    let response = next.run(request).await;
    info!(
        "{} {} -> {} ({:?})",
        method,
        uri,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}
