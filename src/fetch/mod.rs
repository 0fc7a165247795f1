//! Conditional download of `Packages` indices.
//!
//! The Release file of a pocket declares the size and checksum of every
//! index. An index body is only downloaded when that declaration differs
//! from the one recorded at the last committed fetch, or when forced.

use crate::archive::{ArchiveConfig, IndexScope};
use crate::error::{Error, Result};
use crate::metadata::{Compression, IndexDigest, Release};
use reqwest::{StatusCode, Url};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// What the archive currently publishes for a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexState {
    /// Not listed in the pocket's Release file
    Absent,
    Present(IndexDigest),
}

#[derive(Debug)]
pub enum FetchOutcome {
    /// Verified and decompressed index body
    Fetched { data: Vec<u8>, digest: IndexDigest },
    /// Same declaration as the last committed fetch
    NotModified { absent: bool },
    /// The Release file does not list this index
    Absent,
}

/// Fetches indices for one archive. Not shared between archives.
pub struct IndexFetcher {
    client: reqwest::Client,
    recorded: RwLock<HashMap<IndexScope, IndexState>>,
    /// Release files seen this pass, including failed downloads
    releases: RwLock<HashMap<Url, std::result::Result<Arc<Release>, String>>>,
    downloads: AtomicU64,
}

impl IndexFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            recorded: RwLock::new(HashMap::new()),
            releases: RwLock::new(HashMap::new()),
            downloads: AtomicU64::new(0),
        }
    }

    /// Number of index bodies downloaded so far.
    pub fn downloads(&self) -> u64 {
        self.downloads.load(Ordering::Relaxed)
    }

    /// Drop memoized Release files; called at the start of every pass.
    pub async fn begin_pass(&self) {
        self.releases.write().await.clear();
    }

    /// Record what was stored for `scope`, enabling NotModified next time.
    pub async fn commit(&self, scope: &IndexScope, state: IndexState) {
        self.recorded.write().await.insert(scope.clone(), state);
    }

    /// Whether the last committed fetch of `scope` stored an index body.
    pub async fn contributed(&self, scope: &IndexScope) -> bool {
        matches!(
            self.recorded.read().await.get(scope),
            Some(IndexState::Present(_))
        )
    }

    /// Force the next fetch of `scope` to download again.
    pub async fn forget(&self, scope: &IndexScope) {
        self.recorded.write().await.remove(scope);
    }

    pub async fn fetch(
        &self,
        archive: &ArchiveConfig,
        scope: &IndexScope,
        force: bool,
    ) -> Result<FetchOutcome> {
        let root = archive.url_for(scope);
        let dists = join(root, &format!("dists/{}/", scope.pocket))?;
        let release = self.release(&join(&dists, "Release")?).await?;

        let current = release.select_index(&scope.release_path());
        let recorded = self.recorded.read().await.get(scope).cloned();

        let Some((compression, path, digest)) = current else {
            if !force && recorded == Some(IndexState::Absent) {
                return Ok(FetchOutcome::NotModified { absent: true });
            }
            tracing::debug!(archive = %archive.id, scope = %scope, "Index not listed in Release");
            return Ok(FetchOutcome::Absent);
        };

        if !force && recorded == Some(IndexState::Present(digest.clone())) {
            tracing::debug!(archive = %archive.id, scope = %scope, "Index not modified");
            return Ok(FetchOutcome::NotModified { absent: false });
        }

        let url = join(&dists, &path)?;
        let body = self.download(&url).await?;
        self.downloads.fetch_add(1, Ordering::Relaxed);

        verify(&url, &body, &digest)?;
        let data = decompress(&url, compression, body).await?;

        tracing::debug!(
            archive = %archive.id,
            scope = %scope,
            compression = %compression,
            size = data.len(),
            "Fetched index"
        );
        Ok(FetchOutcome::Fetched { data, digest })
    }

    /// Release file at `url`, requested at most once per pass.
    ///
    /// A failure is remembered too, so the remaining scopes of an unreachable
    /// pocket fail without another request.
    async fn release(&self, url: &Url) -> Result<Arc<Release>> {
        match self.releases.read().await.get(url) {
            Some(Ok(release)) => return Ok(Arc::clone(release)),
            Some(Err(msg)) => {
                return Err(Error::Unavailable {
                    url: url.to_string(),
                    msg: msg.clone(),
                });
            }
            None => {}
        }

        let loaded = self.load_release(url).await;
        let memo = match &loaded {
            Ok(release) => Ok(Arc::clone(release)),
            Err(e) => Err(e.to_string()),
        };
        self.releases.write().await.insert(url.clone(), memo);
        loaded
    }

    async fn load_release(&self, url: &Url) -> Result<Arc<Release>> {
        let body = self.download(url).await?;
        let text = String::from_utf8_lossy(&body);
        let release = Release::parse(&text).map_err(|msg| Error::InvalidRelease {
            url: url.to_string(),
            msg,
        })?;
        tracing::debug!(
            url = %url,
            suite = release.suite.as_deref().unwrap_or("-"),
            codename = release.codename.as_deref().unwrap_or("-"),
            "Loaded Release file"
        );
        Ok(Arc::new(release))
    }

    async fn download(&self, url: &Url) -> Result<Vec<u8>> {
        let http_err = |error| Error::Http {
            url: url.to_string(),
            error,
        };

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(http_err)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound {
                url: url.to_string(),
            });
        }

        let response = response.error_for_status().map_err(http_err)?;
        let body = response.bytes().await.map_err(http_err)?;
        Ok(body.to_vec())
    }
}

fn join(base: &Url, path: &str) -> Result<Url> {
    base.join(path).map_err(|e| Error::InvalidRelease {
        url: base.to_string(),
        msg: format!("cannot join '{}': {}", path, e),
    })
}

/// Check a downloaded body against the Release declaration.
fn verify(url: &Url, body: &[u8], digest: &IndexDigest) -> Result<()> {
    if body.len() as u64 != digest.size {
        return Err(Error::ChecksumMismatch {
            url: url.to_string(),
            expected: format!("{} bytes", digest.size),
            actual: format!("{} bytes", body.len()),
        });
    }

    let actual = digest.checksum.compute_like(body);
    if actual != digest.checksum {
        return Err(Error::ChecksumMismatch {
            url: url.to_string(),
            expected: digest.checksum.to_string(),
            actual: actual.to_string(),
        });
    }

    Ok(())
}

async fn decompress(url: &Url, compression: Compression, body: Vec<u8>) -> Result<Vec<u8>> {
    let decompress_err = |error| Error::Decompress {
        url: url.to_string(),
        error,
    };

    tokio::task::spawn_blocking(move || compression.decompress(&body))
        .await
        .map_err(|e| decompress_err(std::io::Error::other(e)))?
        .map_err(decompress_err)
}
