//! Wires configured collaborators into a shared [`AgentRuntime`].

use std::sync::Arc;

use chrono::Duration;
use thiserror::Error;
use tracing::info;

use salescope_core::config::{AppConfig, SessionBackend};
use salescope_db::{
    connect_read_only, connect_with_settings, migrations, DbPool, InMemorySessionStore,
    SessionStore, SqlSalesRepository, SqlSessionStore,
};

use crate::forecast_client::{ForecastError, ForecastProvider, HttpForecastProvider};
use crate::gemini::GeminiClient;
use crate::guardrails::QueryGuard;
use crate::llm::LlmError;
use crate::prompts::PromptError;
use crate::runtime::{AgentRuntime, RuntimeParts, RuntimeSettings};
use crate::sql_tools::SqlToolProvider;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("analytics database connection failed: {0}")]
    AnalyticsConnect(#[source] sqlx::Error),
    #[error("session database connection failed: {0}")]
    SessionConnect(#[source] sqlx::Error),
    #[error("session database migration failed: {0}")]
    SessionMigration(#[source] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Forecast(#[from] ForecastError),
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

pub struct AgentServices {
    pub runtime: Arc<AgentRuntime>,
    /// Read-only pool the SQL tools and sales history run against.
    pub analytics_pool: DbPool,
    pub sessions: Arc<dyn SessionStore>,
}

pub async fn open_session_store(
    config: &AppConfig,
) -> Result<Arc<dyn SessionStore>, AssemblyError> {
    let ttl = Duration::seconds(i64::try_from(config.session.ttl_secs).unwrap_or(i64::MAX));
    match config.session.backend {
        SessionBackend::Memory => Ok(Arc::new(InMemorySessionStore::new(ttl))),
        SessionBackend::Sqlite => {
            let pool = connect_with_settings(
                &config.session.url,
                config.database.max_connections,
                config.database.timeout_secs,
            )
            .await
            .map_err(AssemblyError::SessionConnect)?;
            migrations::run_pending(&pool).await.map_err(AssemblyError::SessionMigration)?;
            Ok(Arc::new(SqlSessionStore::new(pool, ttl)))
        }
    }
}

pub async fn assemble(config: &AppConfig) -> Result<AgentServices, AssemblyError> {
    let analytics_pool = connect_read_only(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(AssemblyError::AnalyticsConnect)?;

    let sessions = open_session_store(config).await?;
    let llm = Arc::new(GeminiClient::from_config(&config.llm)?);
    let guard = QueryGuard::new(config.agent.default_row_limit, config.agent.max_row_limit);
    let tools = SqlToolProvider::new(analytics_pool.clone(), guard).registry();

    let mut parts = RuntimeParts::new(
        llm,
        Arc::clone(&sessions),
        Arc::new(SqlSalesRepository::new(analytics_pool.clone())),
        tools,
    );
    if let Some(url) = config.forecast.service_url.as_deref() {
        let provider: Arc<dyn ForecastProvider> =
            Arc::new(HttpForecastProvider::new(url, config.forecast.timeout_secs)?);
        parts = parts.with_forecaster(provider);
    }

    let runtime = AgentRuntime::new(parts, RuntimeSettings::from_config(config))?;
    info!(
        event_name = "system.bootstrap.agent_ready",
        correlation_id = "bootstrap",
        model = %config.llm.model,
        session_backend = ?config.session.backend,
        forecasting = config.forecast.service_url.is_some(),
        "agent runtime assembled"
    );

    Ok(AgentServices { runtime: Arc::new(runtime), analytics_pool, sessions })
}
