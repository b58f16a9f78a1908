//! Sync orchestration.
//!
//! One pass walks the branch hierarchy sequentially:
//!
//! ```text
//! clients ─► contracts ─► detail + reports ─► date window
//!                                               │
//!                          ┌────────────────────┴───────────────────┐
//!                          ▼                                        ▼
//!                 DownloadPool (images)                 RenderPipeline (documents)
//!                          └──────────────► HistoryStore ◄──────────┘
//! ```
//!
//! For each contract with reports inside the window, the download pool and
//! the render pipeline run concurrently. Catalog failures are logged and
//! treated as "no data"; only login, store and config failures end the run.
//!
//! A stop request (Ctrl-C) is honored between contracts: the batch in
//! flight finishes, nothing new is dispatched.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::catalog::{Catalog, HttpCatalog};
use crate::compose::DocumentComposer;
use crate::config::Config;
use crate::db;
use crate::download::{DownloadPool, DownloadReport};
use crate::error::MalformedRecord;
use crate::filter::{filter_by_window, DateWindow};
use crate::history::HistoryStore;
use crate::image_cache::ImageCache;
use crate::migrate;
use crate::models::{DownloadJob, ReportRecord};
use crate::paths::{category, image_filename, ArtifactKind};
use crate::pipeline::{RenderPipeline, RenderTally};
use crate::progress::{spawn_reporter, EventSink, ProgressMode, SyncEvent};
use crate::render::{open_surface, PageFormat, RenderSurface};

/// Parameters of one pass.
#[derive(Debug, Clone)]
pub struct SyncParams {
    pub output_root: PathBuf,
    pub max_workers: usize,
    pub window: DateWindow,
    pub technician_ids: Vec<i64>,
    pub images: bool,
    pub documents: bool,
}

/// Command-line overrides applied on top of the `[sync]` config section.
#[derive(Debug, Clone, Default)]
pub struct SyncOverrides {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub technicians: Vec<i64>,
    pub workers: Option<usize>,
    pub output: Option<PathBuf>,
    pub no_images: bool,
    pub no_documents: bool,
}

/// Whether documents can be produced in this pass.
pub enum RenderCapability {
    Ready(Arc<dyn RenderSurface>),
    /// Opening the surface failed; documents are skipped, images continue.
    Unavailable(String),
    Disabled,
}

/// Totals of one pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncSummary {
    pub clients: usize,
    pub contracts: usize,
    pub reports_in_window: usize,
    pub images: u64,
    pub documents: u64,
    pub skipped: u64,
    pub image_failures: u64,
    pub document_failures: u64,
    pub malformed: u64,
    pub renderer_unavailable: Option<String>,
    /// Set when a stop request ended the pass early.
    pub interrupted: bool,
}

pub struct Orchestrator {
    catalog: Arc<dyn Catalog>,
    history: HistoryStore,
    http: reqwest::Client,
    composer: Arc<DocumentComposer>,
    page_format: PageFormat,
    download_timeout: Duration,
    events: EventSink,
    stop: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        history: HistoryStore,
        http: reqwest::Client,
        composer: Arc<DocumentComposer>,
        page_format: PageFormat,
        download_timeout: Duration,
        events: EventSink,
    ) -> Self {
        Self {
            catalog,
            history,
            http,
            composer,
            page_format,
            download_timeout,
            events,
            stop: CancellationToken::new(),
        }
    }

    /// Stop dispatching new contracts once `stop` is cancelled.
    pub fn with_stop_signal(mut self, stop: CancellationToken) -> Self {
        self.stop = stop;
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub async fn run(
        &self,
        branch_id: i64,
        params: &SyncParams,
        renderer: RenderCapability,
    ) -> Result<SyncSummary> {
        let mut summary = SyncSummary::default();

        let surface = match renderer {
            RenderCapability::Ready(surface) if params.documents => Some(surface),
            RenderCapability::Unavailable(reason) if params.documents => {
                tracing::warn!(reason = %reason, "documents disabled for this run");
                self.events.emit(SyncEvent::RendererUnavailable {
                    reason: reason.clone(),
                });
                summary.renderer_unavailable = Some(reason);
                None
            }
            _ => None,
        };

        let pool = DownloadPool::new(
            self.http.clone(),
            self.history.clone(),
            params.output_root.clone(),
            params.max_workers,
            self.download_timeout,
            self.events.clone(),
        );
        let pipeline = surface.map(|surface| {
            RenderPipeline::new(
                self.catalog.clone(),
                self.history.clone(),
                self.composer.clone(),
                surface,
                params.output_root.clone(),
                self.page_format,
                self.events.clone(),
            )
        });

        let clients = match self.catalog.list_clients(branch_id).await {
            Ok(clients) => clients,
            Err(e) => {
                tracing::warn!(branch_id, error = %e, "client list unavailable");
                Vec::new()
            }
        };
        if clients.is_empty() {
            tracing::warn!(branch_id, "no clients found, nothing to sync");
            self.finish(params, &summary);
            return Ok(summary);
        }

        self.history
            .upsert_clients(&clients)
            .await
            .context("Failed to update client cache")?;
        summary.clients = clients.len();
        self.events.emit(SyncEvent::ClientsSynced {
            count: clients.len(),
        });

        'clients: for (i, client) in clients.iter().enumerate() {
            if self.stop_requested() {
                self.interrupt(&mut summary);
                break;
            }
            let client_name = client.display_name();
            self.events.emit(SyncEvent::ClientStarted {
                index: i + 1,
                total: clients.len(),
                name: client_name.clone(),
            });

            let contracts = match self.catalog.list_contracts(client.id).await {
                Ok(contracts) => contracts,
                Err(e) => {
                    tracing::warn!(client_id = client.id, error = %e, "contract list unavailable");
                    Vec::new()
                }
            };
            if contracts.is_empty() {
                self.events.emit(SyncEvent::NoContracts {
                    client: client_name.clone(),
                });
                continue;
            }

            for contract in &contracts {
                if self.stop_requested() {
                    self.interrupt(&mut summary);
                    break 'clients;
                }
                let Some(contract_id) = contract.id else {
                    continue;
                };
                summary.contracts += 1;

                let detail = match self.catalog.fetch_contract_detail(contract_id).await {
                    Ok(detail) => detail,
                    Err(e) => {
                        tracing::warn!(contract_id, error = %e, "contract detail unavailable");
                        Default::default()
                    }
                };
                let listing = match self
                    .catalog
                    .list_reports(contract_id, &params.technician_ids)
                    .await
                {
                    Ok(listing) => listing,
                    Err(e) => {
                        tracing::warn!(contract_id, error = %e, "report list unavailable");
                        continue;
                    }
                };
                for reason in listing.rejected {
                    tracing::warn!(contract_id, reason = %reason, "skipping report");
                    self.events.emit(SyncEvent::MalformedRecord { reason });
                    summary.malformed += 1;
                }
                let reports = listing.reports;
                if reports.is_empty() {
                    continue;
                }

                let in_window = filter_by_window(reports, &params.window);
                if in_window.is_empty() {
                    continue;
                }
                summary.reports_in_window += in_window.len();
                self.events.emit(SyncEvent::ReportsInWindow {
                    contract_id,
                    count: in_window.len(),
                });

                let (valid, malformed): (Vec<ReportRecord>, Vec<ReportRecord>) = in_window
                    .into_iter()
                    .partition(|report| report.schedule_id.is_some());
                for _ in &malformed {
                    let reason = MalformedRecord::MissingScheduleId.to_string();
                    tracing::warn!(contract_id, reason = %reason, "skipping report");
                    self.events.emit(SyncEvent::MalformedRecord { reason });
                }
                summary.malformed += malformed.len() as u64;
                if valid.is_empty() {
                    continue;
                }

                let images = async {
                    if !params.images {
                        return Ok(DownloadReport::default());
                    }
                    let jobs = self.collect_image_jobs(&valid, &client_name).await;
                    let jobs = pool.plan_jobs(jobs).await?;
                    if !jobs.is_empty() {
                        self.events.emit(SyncEvent::ImagesQueued { count: jobs.len() });
                    }
                    Ok::<_, anyhow::Error>(pool.run(jobs).await)
                };
                let documents = async {
                    match &pipeline {
                        Some(pipeline) => pipeline.run(&valid, &detail, &client_name).await,
                        None => RenderTally::default(),
                    }
                };

                let (images, documents) = tokio::join!(images, documents);
                let images = images?;

                summary.images += images.succeeded;
                summary.skipped += images.skipped + documents.skipped;
                summary.image_failures += images.failures.len() as u64;
                summary.documents += documents.generated;
                summary.document_failures += documents.failed;
                summary.malformed += documents.malformed;
            }
        }

        self.finish(params, &summary);
        Ok(summary)
    }

    fn interrupt(&self, summary: &mut SyncSummary) {
        tracing::warn!("stop requested, no further contracts will be dispatched");
        summary.interrupted = true;
        self.events.emit(SyncEvent::Interrupted);
    }

    fn finish(&self, params: &SyncParams, summary: &SyncSummary) {
        self.events.emit(SyncEvent::Finished {
            images: params.images.then_some(summary.images),
            documents: params.documents.then_some(summary.documents),
            failures: summary.image_failures + summary.document_failures,
            malformed: summary.malformed,
        });
    }

    /// One job per uploaded file of every report; each manifest is fetched
    /// fresh.
    async fn collect_image_jobs(
        &self,
        reports: &[ReportRecord],
        client_name: &str,
    ) -> Vec<DownloadJob> {
        let mut jobs = Vec::new();
        for report in reports {
            let Some(schedule_id) = report.schedule_id else {
                continue;
            };
            let files = match self.catalog.list_uploaded_files(schedule_id).await {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(schedule_id, error = %e, "file manifest unavailable");
                    continue;
                }
            };
            let category = category(report.technician_name(), client_name, ArtifactKind::Image);
            for file in files {
                let (url, file_id) = match (file.remote_url, file.id) {
                    (Some(url), Some(id)) if !url.trim().is_empty() => (url, id),
                    (None, _) | (Some(_), Some(_)) => {
                        tracing::debug!(schedule_id, "{}", MalformedRecord::IncompleteFile("url"));
                        continue;
                    }
                    (Some(_), None) => {
                        tracing::debug!(schedule_id, "{}", MalformedRecord::IncompleteFile("id"));
                        continue;
                    }
                };
                jobs.push(DownloadJob {
                    filename: image_filename(schedule_id, file_id, &url),
                    category: category.clone(),
                    source_url: url,
                });
            }
        }
        jobs
    }
}

/// Resolve the pass's date window: explicit dates win, otherwise the
/// trailing `window_days` ending today.
pub fn resolve_window(
    config: &Config,
    overrides: &SyncOverrides,
    today: NaiveDate,
) -> Result<DateWindow> {
    let start = overrides.since.or(config.sync.start_date);
    let end = overrides.until.or(config.sync.end_date);
    match (start, end) {
        (None, None) => DateWindow::trailing(today, config.sync.window_days),
        (Some(start), None) => DateWindow::new(start, today.max(start)),
        (None, Some(end)) => DateWindow::trailing(end, config.sync.window_days),
        (Some(start), Some(end)) => DateWindow::new(start, end),
    }
}

/// Technician ids for the pass: `preferred` when non-empty, otherwise every
/// technician of the branch. A failed listing is logged and yields an empty
/// set.
pub async fn select_technicians(
    catalog: &dyn Catalog,
    branch_id: i64,
    preferred: &[i64],
    events: &EventSink,
) -> Vec<i64> {
    if !preferred.is_empty() {
        return preferred.to_vec();
    }
    match catalog.list_technicians(branch_id).await {
        Ok(all) => all.into_iter().map(|t| t.id).collect(),
        Err(e) => {
            tracing::warn!(branch_id, error = %e, "technician list unavailable");
            events.emit(SyncEvent::Warning {
                message: format!("technician list unavailable: {}", e),
            });
            Vec::new()
        }
    }
}

async fn login(config: &Config) -> Result<(HttpCatalog, i64)> {
    let mut catalog = HttpCatalog::new(&config.api)?;
    let session = catalog
        .login(&config.api.resolved_username(), &config.api.resolved_password())
        .await
        .context("Login failed")?;
    tracing::info!(branch_id = session.branch_id, "logged in");
    Ok((catalog, session.branch_id))
}

/// `frs technicians`: list the branch's technicians.
pub async fn run_technicians(config: &Config) -> Result<()> {
    let (catalog, branch_id) = login(config).await?;
    let technicians = catalog
        .list_technicians(branch_id)
        .await
        .context("Failed to list technicians")?;

    if technicians.is_empty() {
        println!("No technicians found for branch {}.", branch_id);
        return Ok(());
    }
    println!("{:>8}  {}", "ID", "NAME");
    for tech in &technicians {
        println!("{:>8}  {}", tech.id, tech.fullname.as_deref().unwrap_or("-"));
    }
    Ok(())
}

/// `frs sync`: one full synchronization pass.
pub async fn run_sync(config: &Config, overrides: SyncOverrides, progress: ProgressMode) -> Result<()> {
    let window = resolve_window(config, &overrides, Local::now().date_naive())?;
    let images = config.sync.images && !overrides.no_images;
    let documents = config.sync.documents && !overrides.no_documents;
    let output_root = overrides
        .output
        .clone()
        .unwrap_or_else(|| config.output.root.clone());
    let max_workers = overrides.workers.unwrap_or(config.sync.max_workers).max(1);

    let (catalog, branch_id) = login(config).await?;

    let (events, reporter) = spawn_reporter(progress.reporter());
    let preferred = if overrides.technicians.is_empty() {
        &config.sync.technicians
    } else {
        &overrides.technicians
    };
    let technician_ids = select_technicians(&catalog, branch_id, preferred, &events).await;

    let pool = db::connect(config).await?;
    migrate::apply_schema(&pool).await?;
    let history = HistoryStore::new(pool.clone());

    let http = catalog.http_client();
    let cache = ImageCache::new(
        http.clone(),
        config.composer.image_cache_capacity,
        Duration::from_secs(config.composer.image_timeout_secs),
    )
    .with_bearer_token(catalog.token());
    let composer = Arc::new(DocumentComposer::new(
        Arc::new(cache),
        config.composer.clone(),
        config.render.page_format,
    ));

    let renderer = if !documents || !config.render.is_enabled() {
        RenderCapability::Disabled
    } else {
        match open_surface(&config.render).await {
            Ok(surface) => {
                tracing::info!(surface = surface.name(), "rendering surface ready");
                RenderCapability::Ready(surface)
            }
            Err(e) => RenderCapability::Unavailable(e.to_string()),
        }
    };
    let surface = match &renderer {
        RenderCapability::Ready(surface) => Some(surface.clone()),
        _ => None,
    };

    let params = SyncParams {
        output_root: output_root.clone(),
        max_workers,
        window,
        technician_ids,
        images,
        documents,
    };

    let stop = CancellationToken::new();
    let interrupt = tokio::spawn({
        let stop = stop.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.cancel();
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("second interrupt, exiting immediately");
                    std::process::exit(130);
                }
            }
        }
    });

    let orchestrator = Orchestrator::new(
        Arc::new(catalog),
        history,
        http,
        composer,
        config.render.page_format,
        Duration::from_secs(config.api.download_timeout_secs),
        events,
    )
    .with_stop_signal(stop);

    let outcome = orchestrator.run(branch_id, &params, renderer).await;
    interrupt.abort();

    if let Some(surface) = surface {
        surface.close().await;
    }
    drop(orchestrator);
    let _ = reporter.await;
    pool.close().await;

    let summary = outcome?;
    if summary.image_failures + summary.document_failures > 0 {
        tracing::warn!(
            images = summary.image_failures,
            documents = summary.document_failures,
            "some artifacts failed and will be retried on the next pass"
        );
    }
    if summary.malformed > 0 {
        tracing::warn!(count = summary.malformed, "malformed records skipped");
    }

    println!("sync {} .. {}", params.window.start, params.window.end);
    println!("  output: {}", output_root.display());
    println!("  clients: {}", summary.clients);
    println!("  contracts: {}", summary.contracts);
    println!("  reports in window: {}", summary.reports_in_window);
    if images {
        println!("  images downloaded: {}", summary.images);
    }
    if documents {
        match &summary.renderer_unavailable {
            Some(reason) => println!("  documents: skipped (renderer unavailable: {})", reason),
            None => println!("  documents generated: {}", summary.documents),
        }
    }
    println!("  already present: {}", summary.skipped);
    if summary.interrupted {
        anyhow::bail!("sync interrupted");
    }
    println!("ok");
    Ok(())
}
