//! Bounded-concurrency image download pool.
//!
//! A batch of [`DownloadJob`]s is executed on at most `max_workers`
//! concurrent tasks. Each job streams into `<name>.part` and is renamed into
//! place before it is recorded, so an interrupted run never leaves a
//! truncated file under its final name. Failures are isolated per job and
//! leave no history row; the next pass retries them.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};

use crate::history::{HistoryStore, RecordOutcome};
use crate::models::DownloadJob;
use crate::paths::category_dir;
use crate::progress::{EventSink, SyncEvent};

/// One job that did not produce a file.
#[derive(Debug, Clone, PartialEq)]
pub struct JobFailure {
    pub filename: String,
    pub reason: String,
}

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadReport {
    pub succeeded: u64,
    pub skipped: u64,
    pub failures: Vec<JobFailure>,
}

enum JobOutcome {
    Saved,
    AlreadyPresent,
}

struct Worker {
    client: reqwest::Client,
    history: HistoryStore,
    output_root: PathBuf,
    timeout: Duration,
}

pub struct DownloadPool {
    worker: Arc<Worker>,
    max_workers: usize,
    events: EventSink,
}

impl DownloadPool {
    /// `max_workers` of 0 is clamped to 1.
    pub fn new(
        client: reqwest::Client,
        history: HistoryStore,
        output_root: PathBuf,
        max_workers: usize,
        timeout: Duration,
        events: EventSink,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                client,
                history,
                output_root,
                timeout,
            }),
            max_workers: max_workers.max(1),
            events,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Drop jobs whose key is already in the history ledger.
    pub async fn plan_jobs(&self, jobs: Vec<DownloadJob>) -> Result<Vec<DownloadJob>> {
        let mut planned = Vec::with_capacity(jobs.len());
        for job in jobs {
            if !self
                .worker
                .history
                .is_downloaded(&job.filename, &job.category)
                .await?
            {
                planned.push(job);
            }
        }
        Ok(planned)
    }

    /// Execute a batch and wait for every job to finish.
    pub async fn run(&self, jobs: Vec<DownloadJob>) -> DownloadReport {
        let mut report = DownloadReport::default();
        if jobs.is_empty() {
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut seen = HashSet::new();
        let mut set = JoinSet::new();
        let mut names = HashMap::new();

        for job in jobs {
            if !seen.insert((job.filename.clone(), job.category.clone())) {
                tracing::debug!(filename = %job.filename, "duplicate job in batch");
                report.skipped += 1;
                continue;
            }
            let semaphore = semaphore.clone();
            let worker = self.worker.clone();
            let filename = job.filename.clone();
            let handle = set.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => worker.fetch(&job).await,
                    Err(e) => Err(anyhow::anyhow!("worker pool closed: {}", e)),
                };
                (job, outcome)
            });
            names.insert(handle.id(), filename);
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((_, Ok(JobOutcome::AlreadyPresent))) => report.skipped += 1,
                Ok((job, Ok(JobOutcome::Saved))) => {
                    report.succeeded += 1;
                    self.events.emit(SyncEvent::ImageSaved {
                        filename: job.filename,
                    });
                }
                Ok((job, Err(e))) => {
                    let reason = format!("{:#}", e);
                    tracing::warn!(filename = %job.filename, url = %job.source_url, error = %reason, "download failed");
                    self.events.emit(SyncEvent::ImageFailed {
                        filename: job.filename.clone(),
                        reason: reason.clone(),
                    });
                    report.failures.push(JobFailure {
                        filename: job.filename,
                        reason,
                    });
                }
                Err(e) => {
                    let failure = panicked_job(&mut names, &e);
                    tracing::error!(
                        filename = %failure.filename,
                        error = %failure.reason,
                        "download task panicked"
                    );
                    self.events.emit(SyncEvent::ImageFailed {
                        filename: failure.filename.clone(),
                        reason: failure.reason.clone(),
                    });
                    report.failures.push(failure);
                }
            }
        }

        report
    }
}

/// Failure entry for a task that never returned its job.
fn panicked_job(names: &mut HashMap<Id, String>, error: &JoinError) -> JobFailure {
    JobFailure {
        filename: names.remove(&error.id()).unwrap_or_default(),
        reason: error.to_string(),
    }
}

impl Worker {
    async fn fetch(&self, job: &DownloadJob) -> Result<JobOutcome> {
        // Another batch may have produced this key since planning
        if self.history.is_downloaded(&job.filename, &job.category).await? {
            return Ok(JobOutcome::AlreadyPresent);
        }

        let dir = category_dir(&self.output_root, &job.category);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let target = dir.join(&job.filename);
        let partial = dir.join(format!("{}.part", job.filename));
        if let Err(e) = self.stream_to(&job.source_url, &partial).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        tokio::fs::rename(&partial, &target)
            .await
            .with_context(|| format!("Failed to move download into {}", target.display()))?;

        match self
            .history
            .record_download(&job.filename, &job.category, &job.source_url)
            .await?
        {
            RecordOutcome::Inserted => Ok(JobOutcome::Saved),
            RecordOutcome::AlreadyPresent => Ok(JobOutcome::AlreadyPresent),
        }
    }

    async fn stream_to(&self, url: &str, partial: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
