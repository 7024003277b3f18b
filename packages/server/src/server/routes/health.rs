use axum::{extract::Extension, http::StatusCode, Json};
use serde::Serialize;

use crate::kernel::event_bus::ConsumerState;
use crate::server::app::AxumAppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    database: DatabaseHealth,
    active_connections: usize,
    consumers: Vec<ConsumerHealth>,
}

#[derive(Serialize)]
pub struct DatabaseHealth {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
pub struct ConsumerHealth {
    name: String,
    state: ConsumerState,
}

/// Health check endpoint
///
/// Checks:
/// - Database connectivity and responsiveness
/// - Every event consumer is still running
///
/// Returns 200 OK if all systems are healthy, 503 Service Unavailable otherwise.
pub async fn health_handler(
    Extension(state): Extension<AxumAppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let db_health = match &state.db_pool {
        Some(pool) => match tokio::time::timeout(
            std::time::Duration::from_secs(5),
            sqlx::query("SELECT 1").execute(pool),
        )
        .await
        {
            Ok(Ok(_)) => DatabaseHealth {
                status: "ok".to_string(),
                error: None,
            },
            Ok(Err(e)) => DatabaseHealth {
                status: "error".to_string(),
                error: Some(format!("Query failed: {}", e)),
            },
            Err(_) => DatabaseHealth {
                status: "error".to_string(),
                error: Some("Query timeout (>5s)".to_string()),
            },
        },
        None => DatabaseHealth {
            status: "skipped".to_string(),
            error: None,
        },
    };

    let consumers: Vec<ConsumerHealth> = state
        .consumers
        .iter()
        .map(|(name, rx)| ConsumerHealth {
            name: name.clone(),
            state: *rx.borrow(),
        })
        .collect();

    let is_healthy = db_health.status != "error"
        && consumers.iter().all(|c| c.state != ConsumerState::Stopped);

    let status_code = if is_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: if is_healthy { "healthy" } else { "unhealthy" }.to_string(),
            database: db_health,
            active_connections: state.server_deps.hub.active_connections().await,
            consumers,
        }),
    )
}
