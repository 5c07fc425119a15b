use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;

pub async fn init_db(database_url: &str) -> Result<SqlitePool> {
    if !database_url.starts_with("sqlite:") {
        return Err(anyhow::anyhow!("DATABASE_URL must start with sqlite://"));
    }

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .context("Failed to connect to SQLite")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    tracing::info!("Database ready at {}", database_url);
    Ok(pool)
}

/// Single-connection in-memory database with the schema applied.
/// Every connection to `:memory:` is its own database, so the pool is capped at one.
pub async fn init_memory_db() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("Failed to open in-memory SQLite")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_sqlite_url() {
        let err = init_db("postgres://localhost/coupons").await.unwrap_err();
        assert!(err.to_string().contains("sqlite"));
    }

    #[tokio::test]
    async fn memory_db_has_coupons_table() {
        let pool = init_memory_db().await.unwrap();
        let exists: bool = sqlx::query_scalar(
            "SELECT count(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'coupons'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(exists);
    }
}
