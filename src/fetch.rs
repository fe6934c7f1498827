//! Session-scoped asset cache with progress reporting.
//!
//! Assets (model weights, configs, the phonemizer engine and its data
//! tables) are fetched at most once per [`AssetCache`]. Entries are never
//! evicted; drop the cache to end the session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use crate::error::SynthError;

/// A fetched binary asset, shared between jobs without copying.
pub type Asset = Arc<[u8]>;

/// Header some static hosts use to report the uncompressed size.
const SIZE_HINT_HEADER: &str = "x-content-length";

/// Progress notification for a single network transfer.
#[derive(Debug, Clone)]
pub enum FetchEvent {
    Started {
        id: u64,
        url: String,
    },
    Progress {
        id: u64,
        url: String,
        loaded: u64,
        /// `None` when the server gave no size hint.
        total: Option<u64>,
    },
    Complete {
        id: u64,
        url: String,
        asset: Asset,
    },
}

impl FetchEvent {
    pub fn url(&self) -> &str {
        match self {
            FetchEvent::Started { url, .. }
            | FetchEvent::Progress { url, .. }
            | FetchEvent::Complete { url, .. } => url,
        }
    }

    /// Completed fraction in `[0, 1]`, or `None` while indeterminate.
    pub fn fraction(&self) -> Option<f64> {
        match self {
            FetchEvent::Started { .. } => Some(0.0),
            FetchEvent::Progress {
                loaded,
                total: Some(total),
                ..
            } if *total > 0 => Some((*loaded as f64 / *total as f64).min(1.0)),
            FetchEvent::Progress { .. } => None,
            FetchEvent::Complete { .. } => Some(1.0),
        }
    }
}

/// Callback receiving `(bytes_loaded, bytes_total)` as a transfer proceeds.
pub type ProgressFn<'a> = &'a mut (dyn FnMut(u64, Option<u64>) + Send);

/// Moves bytes from a URL into memory. The cache sits on top of this.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, progress: ProgressFn<'_>) -> Result<Vec<u8>, SynthError>;
}

/// HTTP(S) via `reqwest`; `file://` URLs and bare paths are read from disk.
#[derive(Debug, Clone, Default)]
pub struct DefaultTransport {
    client: reqwest::Client,
}

impl DefaultTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for DefaultTransport {
    async fn get(&self, url: &str, progress: ProgressFn<'_>) -> Result<Vec<u8>, SynthError> {
        if let Some(path) = local_path(url) {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| SynthError::fetch(url, e))?;
            let len = bytes.len() as u64;
            progress(len, Some(len));
            return Ok(bytes);
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| SynthError::fetch(url, e))?;

        let total = size_hint(response.headers()).or(response.content_length());
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| SynthError::fetch(url, e))?
        {
            body.extend_from_slice(&chunk);
            progress(body.len() as u64, total);
        }
        Ok(body)
    }
}

fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(rest) = url.strip_prefix("file://") {
        return Some(PathBuf::from(rest));
    }
    if url.contains("://") {
        return None;
    }
    Some(PathBuf::from(url))
}

fn size_hint(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(SIZE_HINT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// URL-keyed, append-only store of fetched assets.
pub struct AssetCache {
    transport: Arc<dyn Transport>,
    entries: Mutex<HashMap<String, Asset>>,
    next_fetch_id: AtomicU64,
    transfers: AtomicU64,
}

impl Default for AssetCache {
    fn default() -> Self {
        Self::new(Arc::new(DefaultTransport::new()))
    }
}

impl AssetCache {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            entries: Mutex::new(HashMap::new()),
            next_fetch_id: AtomicU64::new(1),
            transfers: AtomicU64::new(0),
        }
    }

    /// Return the cached asset for `url` without touching the network.
    pub fn get_cached(&self, url: &str) -> Option<Asset> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(url)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of transfers issued to the transport so far.
    pub fn transfers(&self) -> u64 {
        self.transfers.load(Ordering::Relaxed)
    }

    /// Fetch `url`, serving it from the cache when already present.
    ///
    /// Cache hits emit no events. A miss emits `Started`, then `Progress`
    /// for every received chunk, then `Complete` with the full buffer.
    /// Failures are returned as-is; retrying is up to the caller.
    pub async fn fetch(
        &self,
        url: &str,
        events: &(dyn Fn(FetchEvent) + Send + Sync),
    ) -> Result<Asset, SynthError> {
        if let Some(asset) = self.get_cached(url) {
            log::debug!("Asset cache hit: {url}");
            return Ok(asset);
        }

        let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        self.transfers.fetch_add(1, Ordering::Relaxed);
        log::info!("Fetching {url}");
        events(FetchEvent::Started {
            id,
            url: url.to_string(),
        });

        let mut on_progress = |loaded: u64, total: Option<u64>| {
            events(FetchEvent::Progress {
                id,
                url: url.to_string(),
                loaded,
                total,
            })
        };
        let body = self.transport.get(url, &mut on_progress).await?;

        let asset: Asset = Arc::from(body);
        log::info!("Fetched {url} ({} bytes)", asset.len());
        // A concurrent miss on the same URL may have landed first; the bytes are identical.
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.to_string(), asset.clone());

        events(FetchEvent::Complete {
            id,
            url: url.to_string(),
            asset: asset.clone(),
        });
        Ok(asset)
    }
}
