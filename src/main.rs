//! # Field Report Sync CLI (`frs`)
//!
//! The `frs` binary mirrors field-service reports from the remote catalog
//! API to a local folder tree: report photos are downloaded and each service
//! treatment slip is rendered to PDF. A SQLite ledger remembers what has
//! already been produced, so repeated runs only fetch what is new.
//!
//! ## Usage
//!
//! ```bash
//! frs --config ./config/frs.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `frs init` | Create the SQLite database and schema |
//! | `frs technicians` | Log in and list the branch's technicians |
//! | `frs sync` | Run one synchronization pass |
//! | `frs clients` | List cached client records |
//! | `frs stats` | Show history counts per artifact kind |
//! | `frs history clear` | Delete all history records |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! frs init --config ./config/frs.toml
//!
//! # Sync the first half of March for two technicians
//! frs sync --since 2024-03-01 --until 2024-03-15 --tech 12 --tech 31
//!
//! # Images only, eight parallel downloads, JSON progress
//! frs sync --no-documents --workers 8 --progress json
//! ```

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use field_report_sync::progress::ProgressMode;
use field_report_sync::sync::SyncOverrides;
use field_report_sync::{config, migrate, stats, sync};

/// Field Report Sync: incremental mirror of field-service reports.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/frs.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "frs",
    about = "Field Report Sync: mirror field-service report photos and PDFs locally",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/frs.toml`.
    #[arg(long, global = true, default_value = "./config/frs.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file with the `download_history` and
    /// `clients` tables. Safe to run repeatedly.
    Init,

    /// Log in and list the technicians of the account's branch.
    Technicians,

    /// Run one synchronization pass.
    ///
    /// Walks clients, contracts and reports, keeps the reports whose work
    /// date lies in the window, downloads new photos and renders new
    /// report documents.
    Sync {
        /// First work date to include (YYYY-MM-DD).
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Last work date to include (YYYY-MM-DD).
        #[arg(long)]
        until: Option<NaiveDate>,

        /// Technician id to include. Repeatable; defaults to `[sync].technicians`,
        /// then to every technician of the branch.
        #[arg(long = "tech")]
        tech: Vec<i64>,

        /// Maximum concurrent image downloads.
        #[arg(long)]
        workers: Option<usize>,

        /// Output root directory.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Skip photo downloads.
        #[arg(long)]
        no_images: bool,

        /// Skip document rendering.
        #[arg(long)]
        no_documents: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// List cached client records.
    Clients,

    /// Show history counts per artifact kind.
    Stats,

    /// Manage the download history.
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    /// Delete every history record so the next sync refetches everything.
    Clear,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Technicians => {
            sync::run_technicians(&cfg).await?;
        }
        Commands::Sync {
            since,
            until,
            tech,
            workers,
            output,
            no_images,
            no_documents,
            progress,
        } => {
            let overrides = SyncOverrides {
                since,
                until,
                technicians: tech,
                workers,
                output,
                no_images,
                no_documents,
            };
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            sync::run_sync(&cfg, overrides, progress).await?;
        }
        Commands::Clients => {
            stats::run_clients(&cfg).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::History { action } => match action {
            HistoryAction::Clear => {
                stats::run_clear_history(&cfg).await?;
            }
        },
    }

    Ok(())
}
