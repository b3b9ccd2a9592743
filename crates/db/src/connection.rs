//! SQLite pool construction for the orchestration store. Every connection
//! gets the same session pragmas: foreign keys on, so deleting an agent
//! cascades through its sub-agents; WAL, so turn persistence does not block
//! registry snapshot reads.

use std::time::Duration;

use sqlx::sqlite::SqlitePoolOptions;

pub type DbPool = sqlx::SqlitePool;

/// Pool sizing and patience knobs, mirroring the `database.*` config section.
#[derive(Clone, Copy, Debug)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// How long a writer waits on a locked database before erroring.
    pub busy_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with(database_url, PoolSettings::default()).await
}

/// Wrapper over [`connect_with`] taking the raw `database.url` /
/// `database.max_connections` / `database.timeout_secs` config values. The
/// busy timeout follows the acquire timeout but is capped so a stuck writer
/// surfaces as an error instead of stalling a whole turn.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let settings = PoolSettings {
        max_connections,
        acquire_timeout: Duration::from_secs(timeout_secs.max(1)),
        busy_timeout: Duration::from_secs(timeout_secs.clamp(1, 5)),
    };
    connect_with(database_url, settings).await
}

pub async fn connect_with(
    database_url: &str,
    settings: PoolSettings,
) -> Result<DbPool, sqlx::Error> {
    let busy_millis = settings.busy_timeout.as_millis().min(i64::MAX as u128) as i64;
    SqlitePoolOptions::new()
        .max_connections(settings.max_connections.max(1))
        .acquire_timeout(settings.acquire_timeout)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                sqlx::query(&format!("PRAGMA busy_timeout = {busy_millis}"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}
