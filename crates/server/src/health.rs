use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use salescope_core::domain::session::SessionId;
use salescope_db::{DbPool, SessionStore};
use serde::Serialize;
use tracing::warn;

const PROBE_SESSION_ID: &str = "health-probe";

#[derive(Clone)]
pub struct HealthState {
    pub db_pool: DbPool,
    pub sessions: Arc<dyn SessionStore>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub session_store: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let session_store = session_store_check(state.sessions.as_ref()).await;
    let ready = database.status == "ready" && session_store.status == "ready";

    if !ready {
        warn!(
            event_name = "system.health.degraded",
            correlation_id = "health",
            database = %database.detail,
            session_store = %session_store.detail,
            "health check reported a degraded dependency"
        );
    }

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck::ready("salescope-server runtime initialized"),
        database,
        session_store,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM products").fetch_one(pool).await {
        Ok(rows) => HealthCheck::ready(format!("sales table reachable ({rows} rows)")),
        Err(error) => HealthCheck::degraded(format!("database query failed: {error}")),
    }
}

async fn session_store_check(sessions: &dyn SessionStore) -> HealthCheck {
    let probe = match SessionId::parse(PROBE_SESSION_ID) {
        Ok(probe) => probe,
        Err(error) => return HealthCheck::degraded(error.to_string()),
    };
    match sessions.exists(&probe).await {
        Ok(_) => HealthCheck::ready("session store reachable"),
        Err(error) => HealthCheck::degraded(format!("session store failed: {error}")),
    }
}
