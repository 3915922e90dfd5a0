use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the catalog schema if it does not exist yet.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema on an open pool. Safe to call repeatedly.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Create reports table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ticker TEXT NOT NULL,
            year INTEGER NOT NULL CHECK (year >= 2000 AND year <= 2100),
            period TEXT NOT NULL,
            address TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(ticker, year, period)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_reports_ticker ON reports(ticker)")
        .execute(pool)
        .await?;

    Ok(())
}
