use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use relay_agent::AgentRegistry;
use relay_db::DbPool;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    registry: Arc<AgentRegistry>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub registry: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool, registry: Arc<AgentRegistry>) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool, registry })
}

pub async fn spawn(
    bind_address: &str,
    port: u16,
    db_pool: DbPool,
    registry: Arc<AgentRegistry>,
) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.health.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "health endpoint started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router(db_pool, registry)).await {
            error!(
                event_name = "system.health.error",
                correlation_id = "bootstrap",
                error = %error,
                "health endpoint server terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let registry = registry_check(&state.registry).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        registry,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

/// A never-synced registry is reported but does not fail the probe; the
/// periodic sync task converges it.
async fn registry_check(registry: &AgentRegistry) -> HealthCheck {
    let agents = registry.list_all().await.len();
    match registry.last_sync().await {
        Some(last_sync) => HealthCheck {
            status: "ready",
            detail: format!("{agents} agents cached, last sync {}", last_sync.to_rfc3339()),
        },
        None => HealthCheck { status: "pending", detail: "registry never synced".to_string() },
    }
}
