//! Archive descriptors built once from validated configuration.

use crate::config::{ArchiveSettings, Config};
use crate::error::Result;
use crate::storage::CacheStore;
use reqwest::Url;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Identity of a configured archive, safe to use as a directory name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArchiveId(String);

impl ArchiveId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive an identity from the host, port and path of an archive URL.
    ///
    /// `http://archive.ubuntu.com/ubuntu/` becomes `archive.ubuntu.com-ubuntu`.
    pub fn from_url(url: &Url) -> Self {
        let host = url.host_str().unwrap_or("archive");
        let raw = match url.port() {
            Some(port) => format!("{}:{}{}", host, port, url.path()),
            None => format!("{}{}", host, url.path()),
        };
        let mut slug = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
                slug.push(c);
            } else if !slug.ends_with('-') {
                slug.push('-');
            }
        }
        Self(slug.trim_matches('-').to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArchiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one index inside an archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexScope {
    pub pocket: String,
    pub component: String,
    pub arch: String,
    /// Served from the ports URL rather than the base URL
    pub ports: bool,
}

impl IndexScope {
    /// Path of the index relative to `dists/<pocket>/`.
    pub fn release_path(&self) -> String {
        format!("{}/binary-{}/Packages", self.component, self.arch)
    }
}

impl fmt::Display for IndexScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/binary-{}", self.pocket, self.component, self.arch)
    }
}

/// Immutable description of one mirrored archive.
pub struct ArchiveConfig {
    pub id: ArchiveId,
    pub base_url: Url,
    pub ports_url: Url,
    pub pockets: Vec<String>,
    pub components: Vec<String>,
    pub architectures: Vec<String>,
    pub ports_architectures: Vec<String>,
    /// Per-archive state directory, already namespaced by `id`
    pub cache_dir: PathBuf,
    pub client: reqwest::Client,
    pub store: Arc<CacheStore>,
}

impl ArchiveConfig {
    /// Build the descriptor and open its cache store from disk.
    pub async fn open(
        settings: &ArchiveSettings,
        cache_root: &std::path::Path,
        client: reqwest::Client,
    ) -> Result<Self> {
        let id = settings.identity()?;
        let cache_dir = cache_root.join(id.as_str());
        let store = CacheStore::open(&cache_dir, id.clone(), settings.pockets.clone()).await?;

        Ok(Self {
            id,
            base_url: settings.base_url()?,
            ports_url: settings.ports_url()?,
            pockets: settings.pockets.clone(),
            components: settings.components.clone(),
            architectures: settings.architectures.clone(),
            ports_architectures: settings.ports_architectures.clone(),
            cache_dir,
            client,
            store: Arc::new(store),
        })
    }

    /// Open every configured archive, in configuration order.
    pub async fn open_all(config: &Config) -> Result<Vec<Arc<ArchiveConfig>>> {
        let client = config.http_client()?;
        let mut archives = Vec::with_capacity(config.archives.len());
        for settings in &config.archives {
            let archive =
                ArchiveConfig::open(settings, &config.cache_directory, client.clone()).await?;
            archives.push(Arc::new(archive));
        }
        Ok(archives)
    }

    /// Every index of one pocket: primary architectures first, then ports.
    pub fn scopes(&self, pocket: &str) -> Vec<IndexScope> {
        let mut scopes = Vec::new();
        for component in &self.components {
            for arch in &self.architectures {
                scopes.push(IndexScope {
                    pocket: pocket.to_string(),
                    component: component.clone(),
                    arch: arch.clone(),
                    ports: false,
                });
            }
            for arch in &self.ports_architectures {
                scopes.push(IndexScope {
                    pocket: pocket.to_string(),
                    component: component.clone(),
                    arch: arch.clone(),
                    ports: true,
                });
            }
        }
        scopes
    }

    /// Root URL serving the given scope's architecture.
    pub fn url_for(&self, scope: &IndexScope) -> &Url {
        if scope.ports {
            &self.ports_url
        } else {
            &self.base_url
        }
    }
}
