//! Sequential document render pipeline.
//!
//! Each report walks `Sanitized → Composed → Submitted → Persisted →
//! Recorded`, or stops at `Skipped` when the history ledger already owns its
//! target. Reports are processed one at a time against one shared
//! [`RenderSurface`]; a failure at any stage drops only that report and is
//! retried on the next pass because nothing was recorded.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::catalog::Catalog;
use crate::compose::DocumentComposer;
use crate::error::MalformedRecord;
use crate::history::{HistoryStore, RecordOutcome};
use crate::models::{ContractDetail, ReportRecord};
use crate::paths::{category, category_dir, report_filename, ArtifactKind};
use crate::progress::{EventSink, SyncEvent};
use crate::render::{PageFormat, RenderSurface};

/// Where a report ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Sanitized,
    Composed,
    Submitted,
    Persisted,
    Recorded,
    Skipped,
}

/// Per-batch counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderTally {
    pub generated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub malformed: u64,
}

struct Target {
    schedule_id: i64,
    filename: String,
    category: String,
    report: ReportRecord,
}

pub struct RenderPipeline {
    catalog: Arc<dyn Catalog>,
    history: HistoryStore,
    composer: Arc<DocumentComposer>,
    surface: Arc<dyn RenderSurface>,
    output_root: PathBuf,
    page_format: PageFormat,
    events: EventSink,
}

impl RenderPipeline {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        history: HistoryStore,
        composer: Arc<DocumentComposer>,
        surface: Arc<dyn RenderSurface>,
        output_root: PathBuf,
        page_format: PageFormat,
        events: EventSink,
    ) -> Self {
        Self {
            catalog,
            history,
            composer,
            surface,
            output_root,
            page_format,
            events,
        }
    }

    /// Render every report of one contract, strictly in order.
    pub async fn run(
        &self,
        reports: &[ReportRecord],
        detail: &ContractDetail,
        client_name: &str,
    ) -> RenderTally {
        let mut tally = RenderTally::default();

        for report in reports {
            let target = match self.sanitize(report, client_name).await {
                Ok(target) => target,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed report");
                    self.events.emit(SyncEvent::MalformedRecord {
                        reason: e.to_string(),
                    });
                    tally.malformed += 1;
                    continue;
                }
            };

            match self.process(&target, detail).await {
                Ok(Stage::Recorded) => {
                    tally.generated += 1;
                    self.events.emit(SyncEvent::DocumentSaved {
                        filename: target.filename.clone(),
                    });
                }
                Ok(_) => tally.skipped += 1,
                Err(e) => {
                    let reason = format!("{:#}", e);
                    tracing::warn!(schedule_id = target.schedule_id, error = %reason, "document failed");
                    self.events.emit(SyncEvent::DocumentFailed {
                        schedule_id: target.schedule_id,
                        reason,
                    });
                    tally.failed += 1;
                }
            }
        }

        tally
    }

    /// Validate identity and attach a freshly fetched file manifest.
    async fn sanitize(
        &self,
        report: &ReportRecord,
        client_name: &str,
    ) -> Result<Target, MalformedRecord> {
        let schedule_id = report.schedule_id.ok_or(MalformedRecord::MissingScheduleId)?;

        let mut report = report.clone();
        report.uploaded_files = match self.catalog.list_uploaded_files(schedule_id).await {
            Ok(files) => files,
            Err(e) => {
                tracing::warn!(schedule_id, error = %e, "file manifest unavailable");
                Vec::new()
            }
        };

        Ok(Target {
            schedule_id,
            filename: report_filename(client_name, report.date_work.as_deref(), schedule_id),
            category: category(report.technician_name(), client_name, ArtifactKind::Document),
            report,
        })
    }

    async fn process(&self, target: &Target, detail: &ContractDetail) -> Result<Stage> {
        let mut stage = Stage::Sanitized;
        if self
            .history
            .is_downloaded(&target.filename, &target.category)
            .await?
        {
            return Ok(Stage::Skipped);
        }
        self.events.emit(SyncEvent::DocumentStarted {
            schedule_id: target.schedule_id,
        });

        let document = self.composer.compose(&target.report, detail).await;
        stage = advance(stage, Stage::Composed);

        let pdf = self
            .surface
            .render(&document, self.page_format)
            .await
            .with_context(|| format!("{} could not render schedule {}", self.surface.name(), target.schedule_id))?;
        stage = advance(stage, Stage::Submitted);

        let dir = category_dir(&self.output_root, &target.category);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        let path = dir.join(&target.filename);
        let partial = dir.join(format!("{}.part", target.filename));
        tokio::fs::write(&partial, &pdf)
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        tokio::fs::rename(&partial, &path)
            .await
            .with_context(|| format!("Failed to move document into {}", path.display()))?;
        stage = advance(stage, Stage::Persisted);

        let source = format!("api_generated_{}", target.schedule_id);
        let outcome = self
            .history
            .record_download(&target.filename, &target.category, &source)
            .await?;
        Ok(match outcome {
            RecordOutcome::Inserted => advance(stage, Stage::Recorded),
            RecordOutcome::AlreadyPresent => Stage::Skipped,
        })
    }
}

fn advance(from: Stage, to: Stage) -> Stage {
    tracing::trace!(?from, ?to, "render stage");
    to
}
