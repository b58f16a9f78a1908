//! Memoized image loader for document composition.
//!
//! Resolves an image reference (remote URL or local path) into a base64
//! `data:` URI so rendered documents are self-contained. Results are kept in
//! a bounded least-recently-used map keyed by the reference; failures yield
//! a transparent placeholder pixel and are not cached. Remote fetches carry
//! the session's bearer token when one is set, the same credential the
//! catalog calls use.

use base64::Engine;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 1x1 transparent GIF used for missing or unreachable images.
pub const PLACEHOLDER_PIXEL: &str =
    "data:image/gif;base64,R0lGODlhAQABAIAAAAAAAP///yH5BAEAAAAALAAAAAABAAEAAAIBRAA7";

/// Encoded image bytes plus the format tag used in the data URI.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub format: &'static str,
    pub base64: String,
}

impl EncodedImage {
    pub fn data_uri(&self) -> String {
        format!("data:image/{};base64,{}", self.format, self.base64)
    }
}

struct Entry {
    last_used: u64,
    image: Arc<EncodedImage>,
}

#[derive(Default)]
struct Lru {
    entries: HashMap<String, Entry>,
    clock: u64,
}

pub struct ImageCache {
    client: reqwest::Client,
    bearer: Option<String>,
    timeout: Duration,
    capacity: usize,
    inner: Mutex<Lru>,
}

impl ImageCache {
    pub fn new(client: reqwest::Client, capacity: usize, timeout: Duration) -> Self {
        Self {
            client,
            bearer: None,
            timeout,
            capacity: capacity.max(1),
            inner: Mutex::new(Lru::default()),
        }
    }

    /// Authenticate remote fetches with `token`.
    pub fn with_bearer_token(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }

    /// `data:` URI for `reference`, or [`PLACEHOLDER_PIXEL`].
    pub async fn data_uri(&self, reference: Option<&str>) -> String {
        let reference = match reference.map(str::trim) {
            Some(r) if !r.is_empty() => r,
            _ => return PLACEHOLDER_PIXEL.to_string(),
        };

        if let Some(hit) = self.lookup(reference) {
            return hit.data_uri();
        }

        let loaded = if reference.starts_with("http://") || reference.starts_with("https://") {
            self.fetch_remote(reference).await
        } else {
            load_local(Path::new(reference)).await
        };

        match loaded {
            Some(image) => {
                let uri = image.data_uri();
                self.insert(reference, image);
                uri
            }
            None => PLACEHOLDER_PIXEL.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|lru| lru.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &str) -> Option<Arc<EncodedImage>> {
        let mut lru = self.inner.lock().ok()?;
        lru.clock += 1;
        let now = lru.clock;
        lru.entries.get_mut(key).map(|entry| {
            entry.last_used = now;
            entry.image.clone()
        })
    }

    fn insert(&self, key: &str, image: EncodedImage) {
        let Ok(mut lru) = self.inner.lock() else {
            return;
        };
        if !lru.entries.contains_key(key) && lru.entries.len() >= self.capacity {
            let oldest = lru
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                lru.entries.remove(&oldest);
            }
        }
        lru.clock += 1;
        let now = lru.clock;
        lru.entries.insert(
            key.to_string(),
            Entry {
                last_used: now,
                image: Arc::new(image),
            },
        );
    }

    async fn fetch_remote(&self, url: &str) -> Option<EncodedImage> {
        let mut request = self.client.get(url).timeout(self.timeout);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }
        let response = match request
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(url, error = %e, "image fetch failed");
                return None;
            }
        };

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_ascii_lowercase();
        let format = if content_type.contains("jpeg") || content_type.contains("jpg") {
            "jpeg"
        } else {
            "png"
        };

        let bytes = response.bytes().await.ok()?;
        Some(EncodedImage {
            format,
            base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
        })
    }
}

async fn load_local(path: &Path) -> Option<EncodedImage> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "local image not readable");
            return None;
        }
    };
    let is_png = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("png"));
    Some(EncodedImage {
        format: if is_png { "png" } else { "jpeg" },
        base64: base64::engine::general_purpose::STANDARD.encode(&bytes),
    })
}
