//! Persistent download history and client cache.
//!
//! The ledger's `UNIQUE(filename, category)` constraint is what keeps an
//! artifact from being produced twice. Writers use `INSERT OR IGNORE` and
//! read the affected row count, so two workers racing on the same key both
//! succeed from their own point of view and exactly one row lands.
//!
//! [`HistoryStore`] is cheap to clone; every clone shares one
//! [`SqlitePool`], and every query runs on its own pooled connection.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::models::{ClientRecord, HistoryRecord};
use crate::paths::ArtifactKind;

/// Result of recording an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Inserted,
    /// Another writer already owns this key.
    AlreadyPresent,
}

/// Per-kind counts for `frs stats`.
#[derive(Debug, Clone, Default)]
pub struct HistoryStats {
    pub images: i64,
    pub documents: i64,
    pub other: i64,
    pub clients: i64,
    pub last_recorded: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn is_downloaded(&self, filename: &str, category: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM download_history WHERE filename = ? AND category = ?",
        )
        .bind(filename)
        .bind(category)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }

    /// Record an artifact. A duplicate key is reported, never raised.
    pub async fn record_download(
        &self,
        filename: &str,
        category: &str,
        source: &str,
    ) -> Result<RecordOutcome> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO download_history (filename, category, url, download_date)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(filename)
        .bind(category)
        .bind(source)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            RecordOutcome::Inserted
        } else {
            RecordOutcome::AlreadyPresent
        })
    }

    /// Insert or replace the cached client names.
    pub async fn upsert_clients(&self, clients: &[ClientRecord]) -> Result<()> {
        if clients.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for client in clients {
            sqlx::query(
                r#"
                INSERT INTO clients (client_id, client_name) VALUES (?, ?)
                ON CONFLICT(client_id) DO UPDATE SET client_name = excluded.client_name
                "#,
            )
            .bind(client.id)
            .bind(client.display_name())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Cached client name, or `Unknown Client ({id})`. Never fails: a
    /// database error degrades to the sentinel as well.
    pub async fn lookup_client_name(&self, client_id: i64) -> String {
        let found: Result<Option<String>, sqlx::Error> =
            sqlx::query_scalar("SELECT client_name FROM clients WHERE client_id = ?")
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await;
        match found {
            Ok(Some(name)) => name,
            Ok(None) => format!("Unknown Client ({})", client_id),
            Err(e) => {
                tracing::warn!(client_id, error = %e, "client lookup failed");
                format!("Unknown Client ({})", client_id)
            }
        }
    }

    pub async fn list_clients(&self) -> Result<Vec<ClientRecord>> {
        let rows = sqlx::query("SELECT client_id, client_name FROM clients ORDER BY client_name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| ClientRecord {
                id: row.get("client_id"),
                name: Some(row.get("client_name")),
            })
            .collect())
    }

    /// Delete every ledger row, forcing the next pass to refetch everything.
    /// The client cache is kept.
    pub async fn clear_history(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_history")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT filename, category, url, download_date
            FROM download_history
            ORDER BY download_date DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| HistoryRecord {
                filename: row.get("filename"),
                category: row.get("category"),
                source: row.get("url"),
                recorded_at: DateTime::from_timestamp(row.get::<i64, _>("download_date"), 0)
                    .unwrap_or_default(),
            })
            .collect())
    }

    pub async fn stats(&self) -> Result<HistoryStats> {
        let rows = sqlx::query("SELECT category, COUNT(*) AS n FROM download_history GROUP BY category")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = HistoryStats::default();
        for row in &rows {
            let category: String = row.get("category");
            let n: i64 = row.get("n");
            match category.rsplit('/').next() {
                Some(kind) if kind == ArtifactKind::Image.dir_name() => stats.images += n,
                Some(kind) if kind == ArtifactKind::Document.dir_name() => stats.documents += n,
                _ => stats.other += n,
            }
        }

        stats.clients = sqlx::query_scalar("SELECT COUNT(*) FROM clients")
            .fetch_one(&self.pool)
            .await?;

        let last: Option<i64> = sqlx::query_scalar("SELECT MAX(download_date) FROM download_history")
            .fetch_one(&self.pool)
            .await?;
        stats.last_recorded = last.and_then(|ts| DateTime::from_timestamp(ts, 0));

        Ok(stats)
    }
}
