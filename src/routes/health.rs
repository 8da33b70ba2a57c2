use axum::extract::State;
use axum::Json;
use log::warn;
use serde::Serialize;

use super::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub database: &'static str,
}

/// Liveness check. Always 200; a failed or slow database ping only marks the
/// service as degraded.
pub async fn health(State(state): State<AppState>) -> Json<HealthStatus> {
    let reachable = match tokio::time::timeout(state.health_check_timeout, state.store.ping()).await
    {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("Health check could not reach the database: {}", e);
            false
        }
        Err(_) => {
            warn!(
                "Health check database ping timed out after {:?}",
                state.health_check_timeout
            );
            false
        }
    };

    Json(if reachable {
        HealthStatus {
            status: "ok",
            database: "reachable",
        }
    } else {
        HealthStatus {
            status: "degraded",
            database: "unreachable",
        }
    })
}
