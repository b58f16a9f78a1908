//! Typed failures at the component seams.
//!
//! Command-level code works in `anyhow::Result`; these enums exist where the
//! caller must decide between "skip and keep going" and "stop the run".

use thiserror::Error;

/// A catalog call that produced no usable data. Never fatal to a run.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },
    #[error("{endpoint} returned malformed JSON: {reason}")]
    Decode { endpoint: String, reason: String },
}

/// Session establishment failed; nothing can be synced.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login rejected by server")]
    Rejected,
    #[error("login request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("login response missing account branch")]
    MissingBranch,
}

#[derive(Debug, Error)]
pub enum RenderError {
    /// No rendering surface could be opened. Disables documents for the run.
    #[error("rendering surface unavailable: {0}")]
    Unavailable(String),
    /// One document failed to render; the surface stays usable.
    #[error("render failed: {0}")]
    Failed(String),
    #[error("render I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A record that cannot be turned into an artifact.
#[derive(Debug, Error)]
pub enum MalformedRecord {
    #[error("report without schedule_id")]
    MissingScheduleId,
    #[error("uploaded file without {0}")]
    IncompleteFile(&'static str),
    #[error("report entry is a JSON {0}, not an object")]
    NotAnObject(&'static str),
    #[error("report entry could not be decoded: {0}")]
    Undecodable(String),
}
