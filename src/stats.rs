//! History ledger statistics and maintenance.
//!
//! Backs `frs stats`, `frs clients` and `frs history clear`. None of these
//! touch the network; they only read or reset the local SQLite file.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::history::HistoryStore;

/// Run the stats command: query the ledger and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = HistoryStore::new(pool.clone());
    let stats = store.stats().await?;
    let recent = store.recent(5).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Field Report Sync: History Stats");
    println!("=================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Images:      {}", stats.images);
    println!("  Documents:   {}", stats.documents);
    if stats.other > 0 {
        println!("  Other:       {}", stats.other);
    }
    println!("  Clients:     {}", stats.clients);
    println!(
        "  Last sync:   {}",
        stats
            .last_recorded
            .map(|dt| format_ts_relative(dt.timestamp()))
            .unwrap_or_else(|| "never".to_string())
    );

    if !recent.is_empty() {
        println!();
        println!("  Recent:");
        println!("  {:<40} {:<36} {}", "FILENAME", "CATEGORY", "RECORDED");
        println!("  {}", "-".repeat(92));
        for record in &recent {
            println!(
                "  {:<40} {:<36} {}",
                record.filename,
                record.category,
                format_ts_relative(record.recorded_at.timestamp())
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// List the cached client records.
pub async fn run_clients(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let clients = HistoryStore::new(pool.clone()).list_clients().await?;

    if clients.is_empty() {
        println!("No cached clients. Run `frs sync` first.");
    } else {
        println!("{:>8}  {}", "ID", "NAME");
        for client in &clients {
            println!("{:>8}  {}", client.id, client.display_name());
        }
    }

    pool.close().await;
    Ok(())
}

/// Delete every history record so the next sync refetches everything.
pub async fn run_clear_history(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let removed = HistoryStore::new(pool.clone()).clear_history().await?;
    tracing::info!(removed, "history cleared");

    println!("history clear");
    println!("  removed records: {}", removed);
    println!("ok");

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn relative_time_buckets() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
