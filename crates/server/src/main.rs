mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;

use relay_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use relay_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
        app.registry.clone(),
    )
    .await?;

    spawn_registry_sync(app.registry.clone(), app.config.registry.sync_interval_seconds);

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "relay-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "relay-server stopping"
    );
    drain(
        app.db_pool.clone(),
        Duration::from_secs(app.config.server.graceful_shutdown_secs),
    )
    .await;

    Ok(())
}

/// In-flight turns hold pool connections, so waiting for the pool to close
/// lets them commit before the process exits. The limit comes from
/// `server.graceful_shutdown_secs` and keeps a stuck connection from
/// hanging shutdown.
async fn drain(db_pool: relay_db::DbPool, limit: Duration) {
    if tokio::time::timeout(limit, db_pool.close()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            limit_secs = limit.as_secs(),
            "graceful drain timed out; exiting with connections still open"
        );
    }
}

/// Periodic reconciliation against the agent store. A failed pass keeps the
/// previous snapshot live and retries on the next tick.
fn spawn_registry_sync(registry: std::sync::Arc<relay_agent::AgentRegistry>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        // The first tick fires immediately; bootstrap already loaded.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match registry.sync().await {
                Ok(stats) => {
                    tracing::debug!(
                        event_name = "registry.periodic_sync",
                        total = stats.total,
                        added = stats.added,
                        removed = stats.removed,
                        kept = stats.kept,
                        "periodic registry sync completed"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        event_name = "registry.periodic_sync_failed",
                        error = %error,
                        "periodic registry sync failed; keeping previous snapshot"
                    );
                }
            }
        }
    });
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::drain;

    #[tokio::test]
    async fn drain_closes_an_idle_pool_within_the_limit() {
        let pool = relay_db::connect_with_settings("sqlite::memory:", 1, 5)
            .await
            .expect("pool should connect");

        drain(pool.clone(), Duration::from_secs(5)).await;

        assert!(pool.is_closed());
    }
}
