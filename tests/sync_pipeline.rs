//! End-to-end sync passes against an in-memory catalog, a fake rendering
//! surface and a local HTTP server serving image bytes.

use async_trait::async_trait;
use axum::extract::Path as UrlPath;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use field_report_sync::catalog::Catalog;
use field_report_sync::compose::DocumentComposer;
use field_report_sync::config::ComposerConfig;
use field_report_sync::db;
use field_report_sync::download::DownloadPool;
use field_report_sync::error::{CatalogError, RenderError};
use field_report_sync::filter::DateWindow;
use field_report_sync::history::HistoryStore;
use field_report_sync::image_cache::ImageCache;
use field_report_sync::migrate;
use field_report_sync::models::{
    decode_report, ClientRecord, Contract, ContractDetail, DownloadJob, ReportListing,
    ReportRecord, Technician, UploadedFile,
};
use field_report_sync::progress::{spawn_reporter, EventSink, ProgressReporter, SyncEvent};
use field_report_sync::render::{PageFormat, RenderSurface};
use field_report_sync::sync::{
    select_technicians, Orchestrator, RenderCapability, SyncParams, SyncSummary,
};

// ============ Fakes ============

#[derive(Default)]
struct FakeCatalog {
    clients: Vec<ClientRecord>,
    contracts: HashMap<i64, Vec<Contract>>,
    reports: HashMap<i64, Vec<ReportRecord>>,
    rejected: HashMap<i64, Vec<String>>,
    files: HashMap<i64, Vec<UploadedFile>>,
    manifest_calls: AtomicUsize,
    technicians_down: bool,
    technician_calls: AtomicUsize,
    /// Raised on every manifest fetch, to stop the run mid-contract.
    stop_on_manifest: Option<CancellationToken>,
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn list_technicians(&self, _branch_id: i64) -> Result<Vec<Technician>, CatalogError> {
        self.technician_calls.fetch_add(1, Ordering::SeqCst);
        if self.technicians_down {
            return Err(CatalogError::Status {
                endpoint: "/web/api/employee/no-paging".to_string(),
                status: 500,
            });
        }
        Ok(vec![Technician {
            id: 12,
            fullname: Some("Budi".to_string()),
        }])
    }

    async fn list_clients(&self, _branch_id: i64) -> Result<Vec<ClientRecord>, CatalogError> {
        Ok(self.clients.clone())
    }

    async fn list_contracts(&self, client_id: i64) -> Result<Vec<Contract>, CatalogError> {
        Ok(self.contracts.get(&client_id).cloned().unwrap_or_default())
    }

    async fn fetch_contract_detail(
        &self,
        _contract_id: i64,
    ) -> Result<ContractDetail, CatalogError> {
        Ok(ContractDetail {
            branch_name: "Malang".to_string(),
            client_address: "Jl. Merdeka 1".to_string(),
        })
    }

    async fn list_reports(
        &self,
        contract_id: i64,
        _technician_ids: &[i64],
    ) -> Result<ReportListing, CatalogError> {
        Ok(ReportListing {
            reports: self.reports.get(&contract_id).cloned().unwrap_or_default(),
            rejected: self.rejected.get(&contract_id).cloned().unwrap_or_default(),
        })
    }

    async fn list_uploaded_files(
        &self,
        schedule_id: i64,
    ) -> Result<Vec<UploadedFile>, CatalogError> {
        self.manifest_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stop) = &self.stop_on_manifest {
            stop.cancel();
        }
        Ok(self.files.get(&schedule_id).cloned().unwrap_or_default())
    }
}

#[derive(Default)]
struct FakeSurface {
    renders: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl RenderSurface for FakeSurface {
    fn name(&self) -> &str {
        "fake"
    }

    async fn render(&self, document: &str, _format: PageFormat) -> Result<Vec<u8>, RenderError> {
        if self.fail {
            return Err(RenderError::Failed("surface crashed".to_string()));
        }
        assert!(document.contains("SERVICE TREATMENT SLIP"));
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(b"%PDF-1.4 fake".to_vec())
    }

    async fn close(&self) {}
}

struct Collect(Arc<Mutex<Vec<SyncEvent>>>);

impl ProgressReporter for Collect {
    fn report(&self, event: &SyncEvent) {
        self.0.lock().unwrap().push(event.clone());
    }
}

// ============ Helpers ============

async fn image_server() -> String {
    async fn image(UrlPath(name): UrlPath<String>) -> (StatusCode, Vec<u8>) {
        (StatusCode::OK, format!("bytes-of-{}", name).into_bytes())
    }

    let app = Router::new()
        .route("/img/{name}", get(image))
        .route("/missing.jpg", get(|| async { StatusCode::NOT_FOUND }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn history(tmp: &TempDir) -> HistoryStore {
    let pool = db::connect_path(&tmp.path().join("history.sqlite"))
        .await
        .unwrap();
    migrate::apply_schema(&pool).await.unwrap();
    HistoryStore::new(pool)
}

fn report(schedule_id: Option<i64>, date: &str) -> ReportRecord {
    let mut value = json!({
        "employee_name": "Budi",
        "date_work": date,
        "client_name": "Hotel Tugu",
    });
    if let Some(id) = schedule_id {
        value["schedule_id"] = json!(id);
    }
    decode_report(value).unwrap()
}

fn file(url: String, id: i64) -> UploadedFile {
    UploadedFile {
        remote_url: Some(url),
        id: Some(id),
        notes: None,
    }
}

/// One client, one contract (7) with one in-window report (11) carrying
/// two photos.
fn catalog(base: &str) -> FakeCatalog {
    let mut catalog = FakeCatalog {
        clients: vec![ClientRecord {
            id: 1,
            name: Some("Hotel Tugu".to_string()),
        }],
        ..Default::default()
    };
    catalog.contracts.insert(1, vec![Contract { id: Some(7) }]);
    catalog
        .reports
        .insert(7, vec![report(Some(11), "2024-03-10")]);
    catalog.files.insert(
        11,
        vec![
            file(format!("{}/img/a.png", base), 1),
            file(format!("{}/img/b.jpg?sig=1", base), 2),
        ],
    );
    catalog
}

fn orchestrator(catalog: Arc<FakeCatalog>, history: HistoryStore, events: EventSink) -> Orchestrator {
    let http = reqwest::Client::new();
    let cache = ImageCache::new(http.clone(), 16, Duration::from_secs(5));
    let composer = Arc::new(DocumentComposer::new(
        Arc::new(cache),
        ComposerConfig::default(),
        PageFormat::A4,
    ));
    Orchestrator::new(
        catalog,
        history,
        http,
        composer,
        PageFormat::A4,
        Duration::from_secs(5),
        events,
    )
}

fn params(tmp: &TempDir) -> SyncParams {
    SyncParams {
        output_root: tmp.path().join("out"),
        max_workers: 4,
        window: DateWindow::parse("2024-03-01", "2024-03-15").unwrap(),
        technician_ids: Vec::new(),
        images: true,
        documents: true,
    }
}

async fn history_rows(store: &HistoryStore) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM download_history")
        .fetch_one(store.pool())
        .await
        .unwrap()
}

// ============ Download pool ============

#[tokio::test]
async fn duplicate_jobs_in_one_batch_produce_one_file() {
    let tmp = TempDir::new().unwrap();
    let base = image_server().await;
    let store = history(&tmp).await;
    let pool = DownloadPool::new(
        reqwest::Client::new(),
        store.clone(),
        tmp.path().join("out"),
        4,
        Duration::from_secs(5),
        EventSink::disabled(),
    );

    let job = DownloadJob {
        source_url: format!("{}/img/a.png", base),
        filename: "ReportImage_1_1.png".to_string(),
        category: "Budi/Hotel Tugu/Foto".to_string(),
    };
    let report = pool.run(vec![job.clone(), job.clone(), job]).await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.skipped, 2);
    assert!(report.failures.is_empty());
    let saved = tmp.path().join("out/Budi/Hotel Tugu/Foto/ReportImage_1_1.png");
    assert_eq!(std::fs::read(&saved).unwrap(), b"bytes-of-a.png");
    assert_eq!(history_rows(&store).await, 1);
}

#[tokio::test]
async fn failed_download_is_isolated() {
    let tmp = TempDir::new().unwrap();
    let base = image_server().await;
    let store = history(&tmp).await;
    let pool = DownloadPool::new(
        reqwest::Client::new(),
        store.clone(),
        tmp.path().join("out"),
        0,
        Duration::from_secs(5),
        EventSink::disabled(),
    );
    assert_eq!(pool.max_workers(), 1);

    let report = pool
        .run(vec![
            DownloadJob {
                source_url: format!("{}/missing.jpg", base),
                filename: "ReportImage_1_1.jpg".to_string(),
                category: "Budi/Tugu/Foto".to_string(),
            },
            DownloadJob {
                source_url: format!("{}/img/ok.jpg", base),
                filename: "ReportImage_1_2.jpg".to_string(),
                category: "Budi/Tugu/Foto".to_string(),
            },
        ])
        .await;

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].filename, "ReportImage_1_1.jpg");

    let dir = tmp.path().join("out/Budi/Tugu/Foto");
    assert!(!dir.join("ReportImage_1_1.jpg").exists());
    assert!(!dir.join("ReportImage_1_1.jpg.part").exists());
    assert!(dir.join("ReportImage_1_2.jpg").exists());
    assert!(!store.is_downloaded("ReportImage_1_1.jpg", "Budi/Tugu/Foto").await.unwrap());
    assert!(store.is_downloaded("ReportImage_1_2.jpg", "Budi/Tugu/Foto").await.unwrap());
}

#[tokio::test]
async fn plan_jobs_drops_recorded_keys() {
    let tmp = TempDir::new().unwrap();
    let store = history(&tmp).await;
    store
        .record_download("a.jpg", "T/C/Foto", "https://x/a.jpg")
        .await
        .unwrap();
    let pool = DownloadPool::new(
        reqwest::Client::new(),
        store,
        tmp.path().join("out"),
        2,
        Duration::from_secs(5),
        EventSink::disabled(),
    );

    let job = |name: &str| DownloadJob {
        source_url: format!("https://x/{}", name),
        filename: name.to_string(),
        category: "T/C/Foto".to_string(),
    };
    let planned = pool.plan_jobs(vec![job("a.jpg"), job("b.jpg")]).await.unwrap();
    assert_eq!(planned, vec![job("b.jpg")]);
}

// ============ Orchestrator ============

#[tokio::test]
async fn full_pass_downloads_images_and_renders_documents() {
    let tmp = TempDir::new().unwrap();
    let base = image_server().await;
    let store = history(&tmp).await;
    let surface = Arc::new(FakeSurface::default());

    let summary = orchestrator(Arc::new(catalog(&base)), store.clone(), EventSink::disabled())
        .run(1, &params(&tmp), RenderCapability::Ready(surface.clone()))
        .await
        .unwrap();

    assert_eq!(summary.clients, 1);
    assert_eq!(summary.contracts, 1);
    assert_eq!(summary.reports_in_window, 1);
    assert_eq!(summary.images, 2);
    assert_eq!(summary.documents, 1);
    assert_eq!(surface.renders.load(Ordering::SeqCst), 1);

    let client_dir = tmp.path().join("out/Budi/Hotel Tugu");
    assert!(client_dir.join("Foto/ReportImage_11_1.png").exists());
    assert!(client_dir.join("Foto/ReportImage_11_2.jpg").exists());
    let pdf = client_dir.join("STS Reports/STS_Report_Hotel Tugu_2024-03-10_11.pdf");
    assert_eq!(std::fs::read(pdf).unwrap(), b"%PDF-1.4 fake");
    assert!(store
        .is_downloaded("STS_Report_Hotel Tugu_2024-03-10_11.pdf", "Budi/Hotel Tugu/STS Reports")
        .await
        .unwrap());
    assert_eq!(store.lookup_client_name(1).await, "Hotel Tugu");
}

#[tokio::test]
async fn second_pass_produces_nothing_new() {
    let tmp = TempDir::new().unwrap();
    let base = image_server().await;
    let store = history(&tmp).await;
    let surface = Arc::new(FakeSurface::default());
    let catalog = Arc::new(catalog(&base));
    let orchestrator = orchestrator(catalog.clone(), store.clone(), EventSink::disabled());

    let first = orchestrator
        .run(1, &params(&tmp), RenderCapability::Ready(surface.clone()))
        .await
        .unwrap();
    assert_eq!((first.images, first.documents), (2, 1));
    let rows = history_rows(&store).await;
    let manifests = catalog.manifest_calls.load(Ordering::SeqCst);

    let second = orchestrator
        .run(1, &params(&tmp), RenderCapability::Ready(surface.clone()))
        .await
        .unwrap();
    assert_eq!((second.images, second.documents), (0, 0));
    assert_eq!(second.skipped, 1);
    assert_eq!(surface.renders.load(Ordering::SeqCst), 1);
    assert_eq!(history_rows(&store).await, rows);
    // Manifests are refetched every pass, before the dedup check
    assert_eq!(catalog.manifest_calls.load(Ordering::SeqCst), manifests * 2);
}

#[tokio::test]
async fn contract_without_reports_dispatches_nothing() {
    let tmp = TempDir::new().unwrap();
    let store = history(&tmp).await;
    let mut fake = catalog("http://unused.invalid");
    fake.reports.clear();
    let catalog = Arc::new(fake);
    let surface = Arc::new(FakeSurface::default());

    let summary = orchestrator(catalog.clone(), store.clone(), EventSink::disabled())
        .run(1, &params(&tmp), RenderCapability::Ready(surface.clone()))
        .await
        .unwrap();

    assert_eq!(summary.contracts, 1);
    assert_eq!(summary.reports_in_window, 0);
    assert_eq!((summary.images, summary.documents), (0, 0));
    assert_eq!(catalog.manifest_calls.load(Ordering::SeqCst), 0);
    assert_eq!(surface.renders.load(Ordering::SeqCst), 0);
    assert_eq!(history_rows(&store).await, 0);
}

#[tokio::test]
async fn renderer_unavailable_still_downloads_images() {
    let tmp = TempDir::new().unwrap();
    let base = image_server().await;
    let store = history(&tmp).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (events, reporter) = spawn_reporter(Box::new(Collect(seen.clone())));

    let orchestrator = orchestrator(Arc::new(catalog(&base)), store.clone(), events);
    let summary = orchestrator
        .run(
            1,
            &params(&tmp),
            RenderCapability::Unavailable("no chrome executable found".to_string()),
        )
        .await
        .unwrap();
    drop(orchestrator);
    reporter.await.unwrap();

    assert_eq!(summary.documents, 0);
    assert_eq!(summary.images, 2);
    assert_eq!(
        summary.renderer_unavailable.as_deref(),
        Some("no chrome executable found")
    );
    assert!(!tmp.path().join("out/Budi/Hotel Tugu/STS Reports").exists());

    let seen = seen.lock().unwrap();
    assert!(seen
        .iter()
        .any(|e| matches!(e, SyncEvent::RendererUnavailable { .. })));
    assert_eq!(
        seen.last(),
        Some(&SyncEvent::Finished {
            images: Some(2),
            documents: Some(0),
            failures: 0,
            malformed: 0,
        })
    );
}

#[tokio::test]
async fn render_failure_is_retried_next_pass() {
    let tmp = TempDir::new().unwrap();
    let base = image_server().await;
    let store = history(&tmp).await;
    let orchestrator = orchestrator(Arc::new(catalog(&base)), store.clone(), EventSink::disabled());
    let mut no_images = params(&tmp);
    no_images.images = false;

    let broken = Arc::new(FakeSurface {
        fail: true,
        ..Default::default()
    });
    let first = orchestrator
        .run(1, &no_images, RenderCapability::Ready(broken))
        .await
        .unwrap();
    assert_eq!(first.documents, 0);
    assert_eq!(first.document_failures, 1);
    assert_eq!(history_rows(&store).await, 0);

    let working = Arc::new(FakeSurface::default());
    let second = orchestrator
        .run(1, &no_images, RenderCapability::Ready(working.clone()))
        .await
        .unwrap();
    assert_eq!(second.documents, 1);
    assert_eq!(working.renders.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn window_and_malformed_records() {
    let tmp = TempDir::new().unwrap();
    let store = history(&tmp).await;
    let mut fake = catalog("http://unused.invalid");
    fake.files.clear();
    fake.reports.insert(
        7,
        vec![
            report(Some(11), "2024-03-15"),
            report(Some(12), "2024-03-16"),
            report(Some(13), "2024-02-29"),
            report(None, "2024-03-05"),
        ],
    );
    let surface = Arc::new(FakeSurface::default());

    let summary = orchestrator(Arc::new(fake), store, EventSink::disabled())
        .run(1, &params(&tmp), RenderCapability::Ready(surface.clone()))
        .await
        .unwrap();

    assert_eq!(summary.reports_in_window, 2);
    assert_eq!(summary.malformed, 1);
    assert_eq!(summary.documents, 1);
    assert_eq!(surface.renders.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_client_list_is_a_zero_summary() {
    let tmp = TempDir::new().unwrap();
    let store = history(&tmp).await;
    let summary = orchestrator(Arc::new(FakeCatalog::default()), store, EventSink::disabled())
        .run(1, &params(&tmp), RenderCapability::Disabled)
        .await
        .unwrap();
    assert_eq!(summary, SyncSummary::default());
}

#[tokio::test]
async fn undecodable_report_entries_are_counted_as_malformed() {
    let tmp = TempDir::new().unwrap();
    let store = history(&tmp).await;
    let mut fake = catalog("http://unused.invalid");
    fake.files.clear();
    fake.rejected.insert(
        7,
        vec!["report entry is a JSON string, not an object".to_string()],
    );
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (events, reporter) = spawn_reporter(Box::new(Collect(seen.clone())));

    let orchestrator = orchestrator(Arc::new(fake), store, events);
    let summary = orchestrator
        .run(1, &params(&tmp), RenderCapability::Disabled)
        .await
        .unwrap();
    drop(orchestrator);
    reporter.await.unwrap();

    assert_eq!(summary.reports_in_window, 1);
    assert_eq!(summary.malformed, 1);
    let seen = seen.lock().unwrap();
    assert!(seen.iter().any(|e| matches!(
        e,
        SyncEvent::MalformedRecord { reason } if reason.contains("not an object")
    )));
}

#[tokio::test]
async fn numeric_text_fields_still_produce_a_document() {
    let tmp = TempDir::new().unwrap();
    let store = history(&tmp).await;
    let mut fake = catalog("http://unused.invalid");
    fake.files.clear();
    let odd = decode_report(json!({
        "schedule_id": 11,
        "employee_name": 77,
        "date_work": "2024-03-10",
        "note_remark": 12
    }))
    .unwrap();
    fake.reports.insert(7, vec![odd]);
    let surface = Arc::new(FakeSurface::default());

    let summary = orchestrator(Arc::new(fake), store, EventSink::disabled())
        .run(1, &params(&tmp), RenderCapability::Ready(surface.clone()))
        .await
        .unwrap();

    assert_eq!(summary.malformed, 0);
    assert_eq!(summary.documents, 1);
    assert!(tmp
        .path()
        .join("out/77/Hotel Tugu/STS Reports/STS_Report_Hotel Tugu_2024-03-10_11.pdf")
        .exists());
}

#[tokio::test]
async fn failures_are_reported_in_the_finished_event() {
    let tmp = TempDir::new().unwrap();
    let base = image_server().await;
    let store = history(&tmp).await;
    let mut fake = catalog(&base);
    fake.files
        .insert(11, vec![file(format!("{}/missing.jpg", base), 1)]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (events, reporter) = spawn_reporter(Box::new(Collect(seen.clone())));

    let orchestrator = orchestrator(Arc::new(fake), store, events);
    let mut no_documents = params(&tmp);
    no_documents.documents = false;
    let summary = orchestrator
        .run(1, &no_documents, RenderCapability::Disabled)
        .await
        .unwrap();
    drop(orchestrator);
    reporter.await.unwrap();

    assert_eq!(summary.image_failures, 1);
    assert_eq!(
        seen.lock().unwrap().last(),
        Some(&SyncEvent::Finished {
            images: Some(0),
            documents: None,
            failures: 1,
            malformed: 0,
        })
    );
}

#[tokio::test]
async fn stop_request_finishes_current_contract_and_dispatches_no_more() {
    let tmp = TempDir::new().unwrap();
    let base = image_server().await;
    let store = history(&tmp).await;
    let stop = CancellationToken::new();

    let mut fake = catalog(&base);
    fake.contracts
        .insert(1, vec![Contract { id: Some(7) }, Contract { id: Some(8) }]);
    fake.reports
        .insert(8, vec![report(Some(21), "2024-03-12")]);
    fake.stop_on_manifest = Some(stop.clone());
    let surface = Arc::new(FakeSurface::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (events, reporter) = spawn_reporter(Box::new(Collect(seen.clone())));

    let orchestrator =
        orchestrator(Arc::new(fake), store.clone(), events).with_stop_signal(stop);
    let summary = orchestrator
        .run(1, &params(&tmp), RenderCapability::Ready(surface.clone()))
        .await
        .unwrap();
    drop(orchestrator);
    reporter.await.unwrap();

    assert!(summary.interrupted);
    assert_eq!(summary.contracts, 1);
    assert_eq!((summary.images, summary.documents), (2, 1));
    assert_eq!(surface.renders.load(Ordering::SeqCst), 1);

    // The batch in flight completed: no partial files left behind
    let photos = tmp.path().join("out/Budi/Hotel Tugu/Foto");
    let mut names: Vec<String> = std::fs::read_dir(&photos)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["ReportImage_11_1.png", "ReportImage_11_2.jpg"]);
    assert_eq!(history_rows(&store).await, 3);

    let seen = seen.lock().unwrap();
    assert!(seen.contains(&SyncEvent::Interrupted));
    assert!(!seen
        .iter()
        .any(|e| matches!(e, SyncEvent::ReportsInWindow { contract_id: 8, .. })));
}

#[tokio::test]
async fn technician_list_failure_falls_back_to_empty_set() {
    let fake = FakeCatalog {
        technicians_down: true,
        ..Default::default()
    };
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (events, reporter) = spawn_reporter(Box::new(Collect(seen.clone())));

    let ids = select_technicians(&fake, 4, &[], &events).await;
    drop(events);
    reporter.await.unwrap();

    assert!(ids.is_empty());
    let seen = seen.lock().unwrap();
    assert!(matches!(
        seen.as_slice(),
        [SyncEvent::Warning { message }] if message.contains("500")
    ));
}

#[tokio::test]
async fn explicit_technicians_skip_the_listing() {
    let fake = FakeCatalog::default();
    let ids = select_technicians(&fake, 4, &[31, 12], &EventSink::disabled()).await;
    assert_eq!(ids, vec![31, 12]);
    assert_eq!(fake.technician_calls.load(Ordering::SeqCst), 0);

    let ids = select_technicians(&fake, 4, &[], &EventSink::disabled()).await;
    assert_eq!(ids, vec![12]);
}
