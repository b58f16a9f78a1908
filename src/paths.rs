//! Artifact naming and category derivation.
//!
//! The category string is the dedup key's second half and also the
//! directory under the output root, so it is computed in exactly one place:
//! `sanitize(technician)/sanitize(client)/<kind>`.

use std::fmt;
use std::path::{Path, PathBuf};

/// Which artifact namespace a file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Downloaded report photos.
    Image,
    /// Rendered report documents.
    Document,
}

impl ArtifactKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "Foto",
            ArtifactKind::Document => "STS Reports",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Keep alphanumerics, space and underscore; drop trailing whitespace.
pub fn sanitize_component(name: &str) -> String {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '_')
        .collect();
    kept.trim_end().to_string()
}

/// `sanitize(technician)/sanitize(client)/<kind>`, always `/`-separated.
pub fn category(technician: &str, client: &str, kind: ArtifactKind) -> String {
    format!(
        "{}/{}/{}",
        sanitize_component(technician),
        sanitize_component(client),
        kind.dir_name()
    )
}

/// Directory of a category under the output root.
pub fn category_dir(root: &Path, category: &str) -> PathBuf {
    category
        .split('/')
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

/// `ReportImage_{schedule}_{file}{ext}`; the extension comes from the URL
/// path and defaults to `.jpg`.
pub fn image_filename(schedule_id: i64, file_id: i64, url: &str) -> String {
    format!(
        "ReportImage_{}_{}{}",
        schedule_id,
        file_id,
        url_extension(url).unwrap_or_else(|| ".jpg".to_string())
    )
}

/// `STS_Report_{client}_{date}_{schedule}.pdf` with `/` in the client name
/// replaced so the name stays a single path component.
pub fn report_filename(client_name: &str, date_work: Option<&str>, schedule_id: i64) -> String {
    format!(
        "STS_Report_{}_{}_{}.pdf",
        client_name.replace('/', "_"),
        date_work.filter(|d| !d.is_empty()).unwrap_or("nodate"),
        schedule_id
    )
}

fn url_extension(url: &str) -> Option<String> {
    let path = match reqwest::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    let last = path.rsplit('/').next()?;
    let dot = last.rfind('.')?;
    // A leading dot is a hidden file name, not an extension
    if dot == 0 || dot + 1 == last.len() {
        return None;
    }
    Some(last[dot..].to_string())
}
