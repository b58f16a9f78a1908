//! Rendering surfaces: HTML document in, paginated PDF bytes out.
//!
//! A surface is opened once per run and shared by every render. Both
//! backends serialize renders internally, so at most one document is in
//! flight at a time.
//!
//! | Backend | Mechanism |
//! |---------|-----------|
//! | `chrome` | headless Chrome/Chromium, `--print-to-pdf` on a scratch file |
//! | `http` | Gotenberg-compatible service, `POST /forms/chromium/convert/html` |
//!
//! Opening fails with [`RenderError::Unavailable`] when no executable can be
//! found or the service does not answer its health check.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::RenderConfig;
use crate::error::RenderError;

/// Paper size requested from the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum PageFormat {
    #[default]
    #[serde(alias = "a4")]
    A4,
    #[serde(alias = "letter")]
    Letter,
}

impl PageFormat {
    /// Width and height in inches.
    pub fn inches(&self) -> (f64, f64) {
        match self {
            PageFormat::A4 => (8.27, 11.69),
            PageFormat::Letter => (8.5, 11.0),
        }
    }

    /// Value for a CSS `@page { size: ... }` rule.
    pub fn css_size(&self) -> &'static str {
        match self {
            PageFormat::A4 => "A4",
            PageFormat::Letter => "letter",
        }
    }
}

#[async_trait]
pub trait RenderSurface: Send + Sync {
    fn name(&self) -> &str;

    /// Render one document. A failure here affects only this document.
    async fn render(&self, document: &str, format: PageFormat) -> Result<Vec<u8>, RenderError>;

    /// Release the surface. Called once, at the end of the run.
    async fn close(&self);
}

/// Open the configured backend.
pub async fn open_surface(config: &RenderConfig) -> Result<Arc<dyn RenderSurface>, RenderError> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.backend.as_str() {
        "chrome" => {
            let surface = ChromeSurface::open(config.chrome_path.as_deref(), timeout).await?;
            Ok(Arc::new(surface))
        }
        "http" => {
            let surface = HttpSurface::open(&config.endpoint, timeout).await?;
            Ok(Arc::new(surface))
        }
        "disabled" => Err(RenderError::Unavailable(
            "render backend is disabled".to_string(),
        )),
        other => Err(RenderError::Unavailable(format!(
            "unknown render backend '{}'",
            other
        ))),
    }
}

// ============ Headless Chrome ============

pub struct ChromeSurface {
    executable: PathBuf,
    scratch: PathBuf,
    timeout: Duration,
    session: Mutex<()>,
}

impl ChromeSurface {
    /// Resolve the executable (configured path first, then well-known
    /// locations and `PATH`), probe it, and create a scratch directory.
    pub async fn open(configured: Option<&Path>, timeout: Duration) -> Result<Self, RenderError> {
        let executable = configured
            .filter(|p| !p.as_os_str().is_empty() && p.exists())
            .map(Path::to_path_buf)
            .or_else(find_chrome_executable)
            .ok_or_else(|| {
                RenderError::Unavailable(
                    "no Chrome/Chromium executable found; set render.chrome_path".to_string(),
                )
            })?;

        let probe = Command::new(&executable)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(status)) if status.success() => {}
            Ok(Ok(status)) => {
                return Err(RenderError::Unavailable(format!(
                    "{} exited with {}",
                    executable.display(),
                    status
                )))
            }
            Ok(Err(e)) => {
                return Err(RenderError::Unavailable(format!(
                    "cannot launch {}: {}",
                    executable.display(),
                    e
                )))
            }
            Err(_) => {
                return Err(RenderError::Unavailable(format!(
                    "{} did not answer --version",
                    executable.display()
                )))
            }
        }

        let scratch = std::env::temp_dir().join(format!("frs-render-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&scratch)
            .await
            .map_err(|e| RenderError::Unavailable(format!("scratch dir: {}", e)))?;

        tracing::info!(executable = %executable.display(), "chrome rendering surface ready");
        Ok(Self {
            executable,
            scratch,
            timeout,
            session: Mutex::new(()),
        })
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }
}

#[async_trait]
impl RenderSurface for ChromeSurface {
    fn name(&self) -> &str {
        "chrome"
    }

    async fn render(&self, document: &str, _format: PageFormat) -> Result<Vec<u8>, RenderError> {
        // Chrome takes the paper size from the document's @page rule
        let _session = self.session.lock().await;

        let id = Uuid::new_v4();
        let html_path = self.scratch.join(format!("{}.html", id));
        let pdf_path = self.scratch.join(format!("{}.pdf", id));
        tokio::fs::write(&html_path, document).await?;

        let run = Command::new(&self.executable)
            .arg("--headless")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--no-pdf-header-footer")
            .arg(format!("--user-data-dir={}", self.scratch.join("profile").display()))
            .arg(format!("--print-to-pdf={}", pdf_path.display()))
            .arg(file_url(&html_path))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let result = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => Err(RenderError::Failed("chrome timed out".to_string())),
            Ok(Err(e)) => Err(RenderError::Io(e)),
            Ok(Ok(output)) if !output.status.success() => Err(RenderError::Failed(format!(
                "chrome exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Ok(Ok(_)) => tokio::fs::read(&pdf_path).await.map_err(|e| {
                RenderError::Failed(format!("chrome produced no PDF: {}", e))
            }),
        };

        let _ = tokio::fs::remove_file(&html_path).await;
        let _ = tokio::fs::remove_file(&pdf_path).await;

        match result {
            Ok(bytes) if bytes.is_empty() => Err(RenderError::Failed("empty PDF".to_string())),
            other => other,
        }
    }

    async fn close(&self) {
        let _session = self.session.lock().await;
        if let Err(e) = tokio::fs::remove_dir_all(&self.scratch).await {
            tracing::debug!(error = %e, "scratch cleanup failed");
        }
    }
}

fn file_url(path: &Path) -> String {
    let absolute = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    match reqwest::Url::from_file_path(&absolute) {
        Ok(url) => url.to_string(),
        Err(_) => format!("file://{}", absolute.display()),
    }
}

/// Well-known Chrome/Chromium locations, then `PATH`.
pub fn find_chrome_executable() -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    for (var, fallback) in [
        ("ProgramFiles", Some("C:/Program Files")),
        ("ProgramFiles(x86)", Some("C:/Program Files (x86)")),
        ("LOCALAPPDATA", None),
    ] {
        let base = std::env::var(var)
            .ok()
            .or_else(|| fallback.map(str::to_string));
        if let Some(base) = base.filter(|b| !b.is_empty()) {
            candidates.push(Path::new(&base).join("Google/Chrome/Application/chrome.exe"));
        }
    }
    candidates.push(PathBuf::from(
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    ));
    candidates.push(PathBuf::from(
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ));

    if let Some(found) = candidates.into_iter().find(|p| p.is_file()) {
        return Some(found);
    }

    let path_var = std::env::var_os("PATH")?;
    let names = [
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
        "chrome",
    ];
    std::env::split_paths(&path_var)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|p| p.is_file())
}

// ============ Gotenberg-compatible HTTP service ============

pub struct HttpSurface {
    client: reqwest::Client,
    endpoint: String,
    session: Mutex<()>,
}

impl HttpSurface {
    /// Connect and check `GET {endpoint}/health`.
    pub async fn open(endpoint: &str, timeout: Duration) -> Result<Self, RenderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RenderError::Unavailable(e.to_string()))?;
        let endpoint = endpoint.trim_end_matches('/').to_string();

        let health = client
            .get(format!("{}/health", endpoint))
            .send()
            .await
            .map_err(|e| RenderError::Unavailable(format!("{}: {}", endpoint, e)))?;
        if !health.status().is_success() {
            return Err(RenderError::Unavailable(format!(
                "{} health check returned {}",
                endpoint,
                health.status()
            )));
        }

        tracing::info!(endpoint = %endpoint, "http rendering surface ready");
        Ok(Self {
            client,
            endpoint,
            session: Mutex::new(()),
        })
    }
}

#[async_trait]
impl RenderSurface for HttpSurface {
    fn name(&self) -> &str {
        "http"
    }

    async fn render(&self, document: &str, format: PageFormat) -> Result<Vec<u8>, RenderError> {
        let _session = self.session.lock().await;

        let (width, height) = format.inches();
        let page = reqwest::multipart::Part::text(document.to_string())
            .file_name("index.html")
            .mime_str("text/html")
            .map_err(|e| RenderError::Failed(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("files", page)
            .text("paperWidth", width.to_string())
            .text("paperHeight", height.to_string())
            .text("printBackground", "true");

        let response = self
            .client
            .post(format!("{}/forms/chromium/convert/html", self.endpoint))
            .multipart(form)
            .send()
            .await
            .map_err(|e| RenderError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RenderError::Failed(format!("HTTP {}: {}", status, body.trim())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RenderError::Failed(e.to_string()))?;
        if bytes.is_empty() {
            return Err(RenderError::Failed("empty PDF".to_string()));
        }
        Ok(bytes.to_vec())
    }

    async fn close(&self) {}
}
