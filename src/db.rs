// External crate imports
use anyhow::{Context, Result};
use backoff::{future::retry, ExponentialBackoffBuilder};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing;

/// Default maximum connections for the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// How long startup keeps retrying an unreachable database.
const CONNECT_RETRY_WINDOW: Duration = Duration::from_secs(30);

/// Schema for the image and link tables, applied statement by statement.
const SCHEMA: &str = include_str!("../migrations/0001_media.sql");

/// Creates a PostgreSQL connection pool. No retries.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(DEFAULT_MAX_CONNECTIONS)
        .connect(database_url)
        .await
}

/// Creates the pool, retrying with exponential backoff while the database is
/// still coming up (e.g. containers started together).
pub async fn connect_with_retry(database_url: &str) -> Result<PgPool> {
    let policy = ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(250))
        .with_max_elapsed_time(Some(CONNECT_RETRY_WINDOW))
        .build();

    retry(policy, || async {
        create_pool(database_url).await.map_err(|e| {
            tracing::warn!(error = %e, "Database not reachable yet, retrying");
            backoff::Error::transient(e)
        })
    })
    .await
    .context("Failed to connect to Postgres")
}

/// Ensures the media tables exist. Every statement is idempotent.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let statements = SCHEMA
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} schema statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing schema SQL: {}", stmt);
        sqlx::query(stmt)
            .execute(pool)
            .await
            .with_context(|| format!("Failed to apply schema statement: {}", stmt))?;
    }

    Ok(())
}
