use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use relay_agent::{AgentRegistry, HttpLlmClient, Orchestrator, RegistryError};
use relay_core::config::{AppConfig, ConfigError, LoadOptions};
use relay_db::repositories::{SqlAgentStore, SqlConversationRepository, SqlInterviewRepository};
use relay_db::{connect_with_settings, migrations, DbPool};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub registry: Arc<AgentRegistry>,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("initial registry load failed: {0}")]
    Registry(#[from] RegistryError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = Arc::new(SqlAgentStore::new(db_pool.clone()));
    let conversations = Arc::new(SqlConversationRepository::new(db_pool.clone()));
    let interviews = Arc::new(SqlInterviewRepository::new(db_pool.clone()));
    let llm = Arc::new(HttpLlmClient::from_config(&config.llm));

    let registry = Arc::new(AgentRegistry::new(store.clone()));
    let loaded = registry.load_all().await?;
    info!(
        event_name = "system.bootstrap.registry_loaded",
        correlation_id = "bootstrap",
        agents = loaded,
        "agent registry populated"
    );

    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        store,
        conversations,
        interviews,
        llm,
        config.llm.model.clone(),
        config.guardrails.default_policy.clone(),
        config.history.window,
    ));

    Ok(Application { config, db_pool, registry, orchestrator })
}
