//! TOML configuration parsing and validation.
//!
//! A single file (default `./config/frs.toml`) carries the database path,
//! remote API credentials, output root, sync defaults, the rendering backend
//! and composer settings. CLI flags may override the sync section for one run.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::render::PageFormat;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub api: ApiConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub composer: ComposerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    20
}
fn default_download_timeout_secs() -> u64 {
    60
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}

impl ApiConfig {
    /// Username with `FRS_USERNAME` taking precedence over the file.
    pub fn resolved_username(&self) -> String {
        std::env::var("FRS_USERNAME").unwrap_or_else(|_| self.username.clone())
    }

    /// Password with `FRS_PASSWORD` taking precedence over the file.
    pub fn resolved_password(&self) -> String {
        std::env::var("FRS_PASSWORD").unwrap_or_else(|_| self.password.clone())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub technicians: Vec<i64>,
    #[serde(default = "default_true")]
    pub images: bool,
    #[serde(default = "default_true")]
    pub documents: bool,
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            technicians: Vec::new(),
            images: true,
            documents: true,
            window_days: default_window_days(),
            start_date: None,
            end_date: None,
        }
    }
}

fn default_max_workers() -> usize {
    4
}
fn default_true() -> bool {
    true
}
fn default_window_days() -> i64 {
    7
}

#[derive(Debug, Deserialize, Clone)]
pub struct RenderConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
    #[serde(default = "default_render_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub page_format: PageFormat,
    #[serde(default = "default_render_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            chrome_path: None,
            endpoint: default_render_endpoint(),
            page_format: PageFormat::default(),
            timeout_secs: default_render_timeout_secs(),
        }
    }
}

fn default_backend() -> String {
    "chrome".to_string()
}
fn default_render_endpoint() -> String {
    "http://localhost:3000".to_string()
}
fn default_render_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComposerConfig {
    #[serde(default = "default_cache_capacity")]
    pub image_cache_capacity: usize,
    #[serde(default = "default_image_timeout_secs")]
    pub image_timeout_secs: u64,
    /// Product name → local logo file, shown in the report header.
    #[serde(default)]
    pub product_logos: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub header_logo: Option<PathBuf>,
    #[serde(default)]
    pub company_name: Option<String>,
    #[serde(default)]
    pub company_address: Option<String>,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            image_cache_capacity: default_cache_capacity(),
            image_timeout_secs: default_image_timeout_secs(),
            product_logos: BTreeMap::new(),
            header_logo: None,
            company_name: None,
            company_address: None,
        }
    }
}

fn default_cache_capacity() -> usize {
    256
}
fn default_image_timeout_secs() -> u64 {
    15
}

impl RenderConfig {
    pub fn is_enabled(&self) -> bool {
        self.backend != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.api.base_url.trim().is_empty() {
        anyhow::bail!("api.base_url must not be empty");
    }
    if config.api.timeout_secs == 0 || config.api.download_timeout_secs == 0 {
        anyhow::bail!("api timeouts must be > 0");
    }

    if config.sync.max_workers == 0 {
        anyhow::bail!("sync.max_workers must be >= 1");
    }
    if config.sync.window_days < 0 {
        anyhow::bail!("sync.window_days must be >= 0");
    }
    if let (Some(start), Some(end)) = (config.sync.start_date, config.sync.end_date) {
        if start > end {
            anyhow::bail!("sync.start_date ({}) is after sync.end_date ({})", start, end);
        }
    }

    match config.render.backend.as_str() {
        "chrome" | "http" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown render backend: '{}'. Must be chrome, http, or disabled.",
            other
        ),
    }
    if config.render.timeout_secs == 0 {
        anyhow::bail!("render.timeout_secs must be > 0");
    }

    if config.composer.image_cache_capacity == 0 {
        anyhow::bail!("composer.image_cache_capacity must be >= 1");
    }

    Ok(())
}
