use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the history ledger and the client cache. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // UNIQUE(filename, category) is the dedup key; writers rely on it
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS download_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            filename TEXT NOT NULL,
            category TEXT NOT NULL,
            url TEXT,
            download_date INTEGER NOT NULL,
            UNIQUE(filename, category)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS clients (
            client_id INTEGER PRIMARY KEY,
            client_name TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_download_history_date ON download_history(download_date DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
