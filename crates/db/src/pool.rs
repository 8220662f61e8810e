//! SQLite connection pool.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::DbError;

/// Type alias for the shared pool used across the whole application.
pub type DbPool = SqlitePool;

/// Create a new connection pool from the given `database_url`.
///
/// `max_connections` controls the pool ceiling.  An in-memory URL
/// (`sqlite::memory:`) is pinned to a single connection that is never
/// recycled, because every SQLite connection to `:memory:` is its own database.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, DbError> {
    let in_memory = database_url.contains(":memory:");
    info!(in_memory, "Connecting to database (max_connections={})", max_connections);

    let mut options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?
    };
    Ok(pool)
}

/// Run embedded SQLx migrations located in `./migrations` (relative to the
/// workspace root at build time).
pub async fn run_migrations(pool: &DbPool) -> Result<(), DbError> {
    info!("Running database migrations");
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Fresh in-memory database with the schema applied.  Used by tests across
/// the workspace.
pub async fn memory_pool() -> Result<DbPool, DbError> {
    let pool = create_pool("sqlite::memory:", 1).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}
