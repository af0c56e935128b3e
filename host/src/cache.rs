//! ==============================================================================
//! cache.rs - versioned offline asset cache
//! ==============================================================================
//!
//! purpose:
//!     keeps the panel's static assets available when the hub is offline.
//!     assets live in named buckets; the bucket name is the version tag
//!     (e.g. "iot-cache-v1"). bumping the tag is the only way to evict.
//!     buckets are directories under `cache.dir`, so a panel started while
//!     the hub is down still serves what the last install stored.
//!
//! lifecycle:
//!     - install: create the current bucket, download the manifest.
//!                all-or-nothing: one failed asset stores nothing.
//!     - activate: delete every bucket that is not the current one.
//!     - respond: cache first; on a miss go to the network and pass the
//!                result through untouched (never stored).
//!
//! relationships:
//!     - used by: main.rs (install/activate at startup, asset proxy)
//!     - uses: config.rs (CacheConfig, EndpointsConfig)
//!
//! ==============================================================================

use crate::config::{CacheConfig, EndpointsConfig};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;

/// a stored (or passed-through) http response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("offline and {path} is not cached: {reason}")]
    Offline { path: String, reason: String },

    #[error("install of {bucket} failed on {path}: {reason}")]
    Install { bucket: String, path: String, reason: String },

    #[error("cache bucket {bucket} could not be stored: {reason}")]
    Storage { bucket: String, reason: String },
}

/// where cache misses and manifest downloads go
pub trait AssetFetcher: Send + Sync + 'static {
    /// `Err` only for transport failures; any http status is `Ok`.
    fn fetch(&self, path: &str) -> impl Future<Output = anyhow::Result<CachedResponse>> + Send;
}

/// asset fetcher backed by the hub over http
pub struct HttpFetcher {
    client: reqwest::Client,
    endpoints: EndpointsConfig,
}

impl HttpFetcher {
    pub fn new(endpoints: EndpointsConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().build().context("failed to build http client")?;
        Ok(Self { client, endpoints })
    }
}

impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, path: &str) -> anyhow::Result<CachedResponse> {
        let url = self.endpoints.url(path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .with_context(|| format!("reading body of {} failed", url))?
            .to_vec();

        Ok(CachedResponse { status, content_type, body })
    }
}

// ==============================================================================
// bucket storage
// ==============================================================================

/// per-bucket metadata file; bodies sit next to it as `<n>.body`
const BUCKET_INDEX: &str = "bucket.json";

#[derive(Debug, Serialize, Deserialize)]
struct BucketIndex {
    name: String,
    /// creation order across buckets, survives restarts
    created: u64,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    path: String,
    status: u16,
    content_type: Option<String>,
    body_file: String,
}

#[derive(Debug, Clone)]
struct CacheBucket {
    name: String,
    created: u64,
    entries: Vec<(String, CachedResponse)>,
}

/// Named buckets on disk, one directory per bucket under `root`.
///
/// Cheap to clone; clones see the same buckets. Everything is loaded once
/// by `open_dir` and written through on every change, so lookups never
/// touch the disk. Lookups across buckets go in creation order.
#[derive(Clone)]
pub struct CacheStorage {
    root: Arc<PathBuf>,
    buckets: Arc<RwLock<Vec<CacheBucket>>>,
}

impl CacheStorage {
    /// Open (creating if needed) the storage directory and load every
    /// bucket in it. Directories without a readable index are skipped.
    pub async fn open_dir(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("failed to create cache dir {}", root.display()))?;

        let mut buckets = Vec::new();
        let mut dir = fs::read_dir(&root)
            .await
            .with_context(|| format!("failed to read cache dir {}", root.display()))?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match load_bucket(&entry.path()).await {
                Ok(bucket) => buckets.push(bucket),
                Err(e) => tracing::warn!(dir = %entry.path().display(), "skipping unreadable cache bucket: {:#}", e),
            }
        }
        buckets.sort_by_key(|b| b.created);
        tracing::debug!(root = %root.display(), buckets = buckets.len(), "cache storage opened");

        Ok(Self { root: Arc::new(root), buckets: Arc::new(RwLock::new(buckets)) })
    }

    /// create the bucket if it does not exist yet
    pub async fn open(&self, name: &str) -> anyhow::Result<()> {
        let mut buckets = self.buckets.write().await;
        if buckets.iter().any(|b| b.name == name) {
            return Ok(());
        }
        let bucket = CacheBucket { name: name.to_string(), created: next_created(&buckets), entries: Vec::new() };
        self.persist(&bucket).await?;
        buckets.push(bucket);
        Ok(())
    }

    /// Store all entries at once, replacing same-path entries.
    /// Creates the bucket when missing. Memory only changes once the disk
    /// write went through.
    pub async fn put_all(&self, name: &str, entries: Vec<(String, CachedResponse)>) -> anyhow::Result<()> {
        let mut buckets = self.buckets.write().await;
        let existing = buckets.iter().position(|b| b.name == name);
        let mut bucket = match existing {
            Some(index) => buckets[index].clone(),
            None => CacheBucket { name: name.to_string(), created: next_created(&buckets), entries: Vec::new() },
        };
        for (path, response) in entries {
            bucket.entries.retain(|(p, _)| *p != path);
            bucket.entries.push((path, response));
        }

        self.persist(&bucket).await?;
        match existing {
            Some(index) => buckets[index] = bucket,
            None => buckets.push(bucket),
        }
        Ok(())
    }

    pub async fn keys(&self) -> Vec<String> {
        self.buckets.read().await.iter().map(|b| b.name.clone()).collect()
    }

    /// remove the bucket and its directory; false if it did not exist
    pub async fn delete(&self, name: &str) -> anyhow::Result<bool> {
        let mut buckets = self.buckets.write().await;
        let Some(index) = buckets.iter().position(|b| b.name == name) else {
            return Ok(false);
        };
        let dir = self.bucket_dir(name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("failed to remove {}", dir.display())),
        }
        buckets.remove(index);
        Ok(true)
    }

    /// first match across all buckets
    pub async fn lookup(&self, path: &str) -> Option<CachedResponse> {
        self.buckets
            .read()
            .await
            .iter()
            .flat_map(|b| b.entries.iter())
            .find(|(p, _)| p == path)
            .map(|(_, response)| response.clone())
    }

    #[cfg(test)]
    pub async fn paths(&self, name: &str) -> Option<Vec<String>> {
        self.buckets
            .read()
            .await
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.entries.iter().map(|(p, _)| p.clone()).collect())
    }

    /// bucket names become directory names, so keep them to one plain segment
    fn bucket_dir(&self, name: &str) -> anyhow::Result<PathBuf> {
        let plain = name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if name.is_empty() || name == "." || name == ".." || !plain {
            bail!("invalid cache bucket name {:?}", name);
        }
        Ok(self.root.join(name))
    }

    /// Write bodies first, then swap the index in with a rename so a crash
    /// never leaves an index pointing at missing bodies.
    async fn persist(&self, bucket: &CacheBucket) -> anyhow::Result<()> {
        let dir = self.bucket_dir(&bucket.name)?;
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;

        let mut entries = Vec::with_capacity(bucket.entries.len());
        for (i, (path, response)) in bucket.entries.iter().enumerate() {
            let body_file = format!("{}.body", i);
            fs::write(dir.join(&body_file), &response.body)
                .await
                .with_context(|| format!("failed to write body of {}", path))?;
            entries.push(IndexEntry {
                path: path.clone(),
                status: response.status,
                content_type: response.content_type.clone(),
                body_file,
            });
        }

        let index = BucketIndex { name: bucket.name.clone(), created: bucket.created, entries };
        let json = serde_json::to_vec_pretty(&index)?;
        let tmp = dir.join(format!("{}.tmp", BUCKET_INDEX));
        fs::write(&tmp, json).await.with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, dir.join(BUCKET_INDEX)).await?;
        Ok(())
    }
}

fn next_created(buckets: &[CacheBucket]) -> u64 {
    buckets.iter().map(|b| b.created + 1).max().unwrap_or(0)
}

async fn load_bucket(dir: &Path) -> anyhow::Result<CacheBucket> {
    let raw = fs::read(dir.join(BUCKET_INDEX))
        .await
        .with_context(|| format!("no {} in {}", BUCKET_INDEX, dir.display()))?;
    let index: BucketIndex = serde_json::from_slice(&raw).context("bucket index is not valid json")?;

    let mut entries = Vec::with_capacity(index.entries.len());
    for entry in index.entries {
        let body = fs::read(dir.join(&entry.body_file))
            .await
            .with_context(|| format!("missing body for {}", entry.path))?;
        entries.push((
            entry.path,
            CachedResponse { status: entry.status, content_type: entry.content_type, body },
        ));
    }
    Ok(CacheBucket { name: index.name, created: index.created, entries })
}

// ==============================================================================
// offline cache
// ==============================================================================

pub struct OfflineCache<F> {
    version: String,
    assets: Vec<String>,
    storage: CacheStorage,
    fetcher: F,
}

impl<F: AssetFetcher> OfflineCache<F> {
    pub fn new(config: &CacheConfig, storage: CacheStorage, fetcher: F) -> Self {
        Self {
            version: config.version.clone(),
            assets: config.assets.clone(),
            storage,
            fetcher,
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    #[cfg(test)]
    pub fn storage(&self) -> &CacheStorage {
        &self.storage
    }

    fn storage_error(&self, e: anyhow::Error) -> CacheError {
        CacheError::Storage { bucket: self.version.clone(), reason: format!("{:#}", e) }
    }

    /// Populate the current bucket with the manifest. Returns the number
    /// of assets stored.
    pub async fn install(&self) -> Result<usize, CacheError> {
        self.storage.open(&self.version).await.map_err(|e| self.storage_error(e))?;

        let mut downloaded = Vec::with_capacity(self.assets.len());
        for path in &self.assets {
            let install_error = |reason: String| CacheError::Install {
                bucket: self.version.clone(),
                path: path.clone(),
                reason,
            };
            let response = self
                .fetcher
                .fetch(path)
                .await
                .map_err(|e| install_error(format!("{:#}", e)))?;
            if !response.is_success() {
                return Err(install_error(format!("status {}", response.status)));
            }
            downloaded.push((path.clone(), response));
        }

        let count = downloaded.len();
        self.storage
            .put_all(&self.version, downloaded)
            .await
            .map_err(|e| self.storage_error(e))?;
        tracing::info!(bucket = %self.version, assets = count, "offline cache installed");
        Ok(count)
    }

    /// Drop every bucket but the current one. Returns the deleted names.
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        let mut deleted = Vec::new();
        for name in self.storage.keys().await {
            if name == self.version {
                continue;
            }
            match self.storage.delete(&name).await {
                Ok(true) => deleted.push(name),
                Ok(false) => {}
                Err(e) => {
                    return Err(CacheError::Storage { bucket: name, reason: format!("{:#}", e) });
                }
            }
        }
        if !deleted.is_empty() {
            tracing::info!(bucket = %self.version, evicted = ?deleted, "stale caches removed");
        }
        Ok(deleted)
    }

    /// Cache-first lookup with network fallback.
    pub async fn respond(&self, path: &str) -> Result<CachedResponse, CacheError> {
        if let Some(cached) = self.storage.lookup(path).await {
            tracing::debug!(path, "cache hit");
            return Ok(cached);
        }

        match self.fetcher.fetch(path).await {
            Ok(response) => {
                tracing::debug!(path, status = response.status, "cache miss, served from network");
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(path, "offline and not cached: {:#}", e);
                Err(CacheError::Offline { path: path.to_string(), reason: format!("{:#}", e) })
            }
        }
    }
}
