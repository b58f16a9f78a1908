//! # Field Report Sync
//!
//! Mirrors field-service reports from a remote catalog API onto the local
//! filesystem: report photos are downloaded and every service treatment
//! slip is rendered to a PDF. A SQLite history ledger makes repeated passes
//! incremental.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Catalog   │──▶│ Orchestrator │──▶│ DownloadPool │──┐
//! │ (HTTP API)  │   │ date window  │   └──────────────┘  │   ┌──────────┐
//! └─────────────┘   └──────┬───────┘                     ├──▶│  SQLite  │
//!                          │         ┌────────────────┐  │   │ history  │
//!                          └────────▶│ RenderPipeline │──┘   └──────────┘
//!                                    │ compose+render │
//!                                    └────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! frs init                                   # create database
//! frs technicians                            # list technician ids
//! frs sync --since 2024-03-01 --until 2024-03-15
//! frs stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Catalog records and jobs |
//! | [`paths`] | Artifact naming and categories |
//! | [`filter`] | Inclusive date window |
//! | [`history`] | Dedup ledger and client cache |
//! | [`catalog`] | Remote API client |
//! | [`download`] | Bounded image download pool |
//! | [`image_cache`] | LRU image loader for documents |
//! | [`compose`] | HTML report composer |
//! | [`render`] | PDF rendering surfaces |
//! | [`pipeline`] | Sequential document pipeline |
//! | [`sync`] | Orchestration and the `sync` command |
//! | [`progress`] | Progress events and reporters |
//! | [`stats`] | Ledger statistics and maintenance |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod catalog;
pub mod compose;
pub mod config;
pub mod db;
pub mod download;
pub mod error;
pub mod filter;
pub mod history;
pub mod image_cache;
pub mod migrate;
pub mod models;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod stats;
pub mod sync;
