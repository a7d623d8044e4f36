use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration;

const SCHEMA_SQL: &str = include_str!("../migrations/0001_runtime.sql");

pub fn connect_lazy(database_url: &str) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(8))
        .connect_lazy(database_url)
        .context("Failed to create lazy database pool")
}

/// Creates any missing tables and indexes. Safe to run on every start.
pub async fn ensure_schema(db: &PgPool) -> Result<()> {
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(db)
        .await
        .context("failed to apply runtime schema")?;
    Ok(())
}
