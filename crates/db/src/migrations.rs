use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

/// Number of migrations bundled into this binary.
pub fn available_count() -> usize {
    MIGRATOR.iter().count()
}

/// Number of successfully applied migrations recorded in the database.
/// Errors if the bookkeeping table does not exist yet (nothing was ever applied).
pub async fn applied_count(pool: &DbPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
        .fetch_one(pool)
        .await
}
