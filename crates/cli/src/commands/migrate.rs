use crate::commands::CommandResult;
use relay_core::config::{AppConfig, LoadOptions};
use relay_db::{connect_with_settings, migrations, DbPool};

/// (error_class, message, exit_code) for the failure envelope.
type MigrateFailure = (&'static str, String, u8);

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "config_invalid",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "migrate",
                "runtime",
                format!("could not start async runtime: {error}"),
                3,
            );
        }
    };

    match runtime.block_on(apply(&config)) {
        Ok((newly_applied, total)) => {
            CommandResult::success("migrate", migrate_message(newly_applied, total))
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}

async fn apply(config: &AppConfig) -> Result<(i64, i64), MigrateFailure> {
    let pool: DbPool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connect", error.to_string(), 4u8))?;

    let before = migrations::applied_count(&pool).await.unwrap_or(0);
    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("db_migrate", error.to_string(), 5u8))?;
    let after = migrations::applied_count(&pool).await.unwrap_or(before);
    pool.close().await;

    Ok((after - before, after))
}

fn migrate_message(newly_applied: i64, total: i64) -> String {
    if newly_applied == 0 {
        format!("database already up to date ({total} migrations applied)")
    } else {
        format!("applied {newly_applied} new migrations ({total} total)")
    }
}

#[cfg(test)]
mod tests {
    use super::migrate_message;

    #[test]
    fn message_distinguishes_fresh_runs_from_no_ops() {
        assert_eq!(
            migrate_message(0, 1),
            "database already up to date (1 migrations applied)"
        );
        assert_eq!(migrate_message(1, 1), "applied 1 new migrations (1 total)");
        assert_eq!(migrate_message(2, 3), "applied 2 new migrations (3 total)");
    }
}
