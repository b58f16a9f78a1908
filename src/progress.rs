//! Sync progress reporting.
//!
//! The orchestrator and its sub-pipelines publish [`SyncEvent`]s on an
//! unbounded channel; a separate task drains the channel into a
//! [`ProgressReporter`]. Progress goes to **stderr** so stdout stays
//! reserved for the final summary.

use std::io::Write;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    ClientsSynced { count: usize },
    ClientStarted { index: usize, total: usize, name: String },
    NoContracts { client: String },
    ReportsInWindow { contract_id: i64, count: usize },
    ImagesQueued { count: usize },
    ImageSaved { filename: String },
    ImageFailed { filename: String, reason: String },
    DocumentStarted { schedule_id: i64 },
    DocumentSaved { filename: String },
    DocumentFailed { schedule_id: i64, reason: String },
    MalformedRecord { reason: String },
    RendererUnavailable { reason: String },
    Warning { message: String },
    Interrupted,
    Finished {
        images: Option<u64>,
        documents: Option<u64>,
        failures: u64,
        malformed: u64,
    },
}

/// Consumes progress events. Implementations write to stderr.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &SyncEvent);
}

/// Sending half handed to the pipeline. Cheap to clone; sends never block
/// and are dropped silently once the reporter is gone.
#[derive(Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl EventSink {
    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

/// Spawn the consumer task. Drop every [`EventSink`] clone, then await the
/// handle to flush the remaining events.
pub fn spawn_reporter(reporter: Box<dyn ProgressReporter>) -> (EventSink, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<SyncEvent>();
    let handle = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            reporter.report(&event);
        }
    });
    (EventSink { tx: Some(tx) }, handle)
}

/// Human-friendly progress lines on stderr.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &SyncEvent) {
        let line = human_line(event);
        let mut err = std::io::stderr().lock();
        let _ = writeln!(err, "{}", line);
        let _ = err.flush();
    }
}

fn human_line(event: &SyncEvent) -> String {
    match event {
        SyncEvent::ClientsSynced { count } => format!("synced {} clients", format_number(*count as u64)),
        SyncEvent::ClientStarted { index, total, name } => {
            format!("\n[{}/{}] client {}", index, total, name)
        }
        SyncEvent::NoContracts { .. } => "  - no contracts".to_string(),
        SyncEvent::ReportsInWindow { contract_id, count } => format!(
            "  - contract {}: {} report(s) in window",
            contract_id, count
        ),
        SyncEvent::ImagesQueued { count } => format!("    - {} new image(s), downloading", count),
        SyncEvent::ImageSaved { filename } => format!("      -> ok (image): {}", filename),
        SyncEvent::ImageFailed { filename, reason } => {
            format!("      -> FAILED (image): {} ({})", filename, reason)
        }
        SyncEvent::DocumentStarted { schedule_id } => {
            format!("    - rendering schedule {}", schedule_id)
        }
        SyncEvent::DocumentSaved { filename } => format!("      -> ok (document): {}", filename),
        SyncEvent::DocumentFailed { schedule_id, reason } => {
            format!("      -> FAILED (document): schedule {} ({})", schedule_id, reason)
        }
        SyncEvent::MalformedRecord { reason } => format!("    - skipped record: {}", reason),
        SyncEvent::RendererUnavailable { reason } => {
            format!("renderer unavailable, documents skipped for this run: {}", reason)
        }
        SyncEvent::Warning { message } => format!("warning: {}", message),
        SyncEvent::Interrupted => {
            "interrupted: finishing in-flight work, no new contracts will start".to_string()
        }
        SyncEvent::Finished {
            images,
            documents,
            failures,
            malformed,
        } => {
            let mut parts = Vec::new();
            if let Some(n) = images {
                parts.push(format!("{} new image(s)", format_number(*n)));
            }
            if let Some(n) = documents {
                parts.push(format!("{} new document(s)", format_number(*n)));
            }
            if *failures > 0 {
                parts.push(format!("{} failed", format_number(*failures)));
            }
            if *malformed > 0 {
                parts.push(format!("{} malformed record(s)", format_number(*malformed)));
            }
            if parts.is_empty() {
                "sync finished".to_string()
            } else {
                format!("sync finished: {}", parts.join(", "))
            }
        }
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &SyncEvent) {
        let obj = json_event(event);
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn json_event(event: &SyncEvent) -> serde_json::Value {
    use serde_json::json;
    match event {
        SyncEvent::ClientsSynced { count } => json!({"event": "clients_synced", "count": count}),
        SyncEvent::ClientStarted { index, total, name } => {
            json!({"event": "client", "n": index, "total": total, "name": name})
        }
        SyncEvent::NoContracts { client } => json!({"event": "no_contracts", "client": client}),
        SyncEvent::ReportsInWindow { contract_id, count } => {
            json!({"event": "reports", "contract_id": contract_id, "count": count})
        }
        SyncEvent::ImagesQueued { count } => json!({"event": "images_queued", "count": count}),
        SyncEvent::ImageSaved { filename } => json!({"event": "image_saved", "filename": filename}),
        SyncEvent::ImageFailed { filename, reason } => {
            json!({"event": "image_failed", "filename": filename, "reason": reason})
        }
        SyncEvent::DocumentStarted { schedule_id } => {
            json!({"event": "document_started", "schedule_id": schedule_id})
        }
        SyncEvent::DocumentSaved { filename } => {
            json!({"event": "document_saved", "filename": filename})
        }
        SyncEvent::DocumentFailed { schedule_id, reason } => {
            json!({"event": "document_failed", "schedule_id": schedule_id, "reason": reason})
        }
        SyncEvent::MalformedRecord { reason } => json!({"event": "malformed", "reason": reason}),
        SyncEvent::RendererUnavailable { reason } => {
            json!({"event": "renderer_unavailable", "reason": reason})
        }
        SyncEvent::Warning { message } => json!({"event": "warning", "message": message}),
        SyncEvent::Interrupted => json!({"event": "interrupted"}),
        SyncEvent::Finished {
            images,
            documents,
            failures,
            malformed,
        } => json!({
            "event": "finished",
            "images": images,
            "documents": documents,
            "failures": failures,
            "malformed": malformed,
        }),
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &SyncEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
