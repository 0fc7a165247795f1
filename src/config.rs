use crate::archive::ArchiveId;
use crate::error::{Error, Result};
use crate::storage::validate_path_component;
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "server.yaml";
const APP_DIR: &str = "madison-mirror";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default = "default_cache_directory")]
    pub cache_directory: PathBuf,

    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default)]
    pub archives: Vec<ArchiveSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// One archive as written in the configuration file.
#[derive(Debug, Deserialize, Clone)]
pub struct ArchiveSettings {
    /// Identity used for namespacing; derived from `base_url` when absent
    #[serde(default)]
    pub name: Option<String>,

    pub base_url: String,

    #[serde(default)]
    pub ports_url: Option<String>,

    #[serde(default)]
    pub pockets: Vec<String>,

    #[serde(default = "default_components")]
    pub components: Vec<String>,

    #[serde(default = "default_architectures")]
    pub architectures: Vec<String>,

    #[serde(default = "default_ports_architectures")]
    pub ports_architectures: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8433
}

fn default_cache_directory() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_fetch_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    15
}

fn default_components() -> Vec<String> {
    ["main", "restricted", "universe", "multiverse"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_architectures() -> Vec<String> {
    ["amd64", "i386"].into_iter().map(String::from).collect()
}

fn default_ports_architectures() -> Vec<String> {
    ["arm64", "armhf", "ppc64el", "riscv64", "s390x"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Config {
    /// Load and validate the configuration.
    ///
    /// Without an explicit path, the first existing file among `./server.yaml`,
    /// `/etc/madison-mirror/server.yaml` and the user config directory is used.
    /// Environment variables prefixed with `MADISON` override file values.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match config_path {
            Some(path) => {
                builder = builder.add_source(
                    config::File::with_name(path)
                        .required(true)
                        .format(config::FileFormat::Yaml),
                );
            }
            None => {
                let candidates = Self::candidate_paths();
                let found = candidates.iter().find(|p| p.exists()).ok_or_else(|| {
                    Error::Config {
                        msg: format!("cannot find any config file in {:?}", candidates),
                    }
                })?;
                tracing::debug!(path = %found.display(), "Using configuration file");
                builder = builder.add_source(
                    config::File::from(found.as_path()).format(config::FileFormat::Yaml),
                );
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("MADISON")
                .separator("__")
                .try_parsing(true),
        );

        Self::from_builder(builder)
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from(CONFIG_FILE_NAME),
            PathBuf::from("/etc").join(APP_DIR).join(CONFIG_FILE_NAME),
        ];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join(APP_DIR).join(CONFIG_FILE_NAME));
        }
        paths
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let config = builder.build().map_err(|e| Error::Config {
            msg: format!("Failed to load configuration: {}", e),
        })?;

        let config: Config = config.try_deserialize().map_err(|e| Error::Config {
            msg: format!("Failed to deserialize configuration: {}", e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check everything the engine relies on before it starts.
    pub fn validate(&self) -> Result<()> {
        if self.archives.is_empty() {
            return Err(Error::Config {
                msg: "No archive defined in config file".to_string(),
            });
        }
        if self.refresh_interval_secs == 0 {
            return Err(Error::Config {
                msg: "refresh_interval_secs must be greater than zero".to_string(),
            });
        }

        let mut identities = HashSet::new();
        for (i, archive) in self.archives.iter().enumerate() {
            archive.validate(i)?;
            let id = archive.identity()?;
            if !identities.insert(id.clone()) {
                return Err(Error::Config {
                    msg: format!("duplicate archive identity '{}'", id),
                });
            }
        }

        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Shared client used by every archive fetcher.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(concat!("madison-mirror/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .timeout(Duration::from_secs(self.fetch_timeout_secs))
            .build()
            .map_err(|e| Error::Config {
                msg: format!("Failed to build HTTP client: {}", e),
            })
    }
}

impl ArchiveSettings {
    fn validate(&self, index: usize) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(Error::Config {
                msg: format!("missing base_url for archive {}", index),
            });
        }
        parse_archive_url(&self.base_url)?;
        if let Some(ports_url) = self.ports_url.as_deref().filter(|u| !u.is_empty()) {
            parse_archive_url(ports_url)?;
        }
        if self.pockets.is_empty() {
            return Err(Error::Config {
                msg: format!("no pockets configured for archive {}", self.base_url),
            });
        }
        if self.components.is_empty() {
            return Err(Error::Config {
                msg: format!("no components configured for archive {}", self.base_url),
            });
        }

        for name in self
            .pockets
            .iter()
            .chain(&self.components)
            .chain(&self.architectures)
            .chain(&self.ports_architectures)
        {
            validate_path_component(name).map_err(|_| Error::Config {
                msg: format!("invalid pocket, component or architecture name '{}'", name),
            })?;
        }

        Ok(())
    }

    pub fn identity(&self) -> Result<ArchiveId> {
        match &self.name {
            Some(name) => {
                validate_path_component(name).map_err(|_| Error::Config {
                    msg: format!("invalid archive name '{}'", name),
                })?;
                Ok(ArchiveId::new(name.clone()))
            }
            None => Ok(ArchiveId::from_url(&parse_archive_url(&self.base_url)?)),
        }
    }

    pub fn base_url(&self) -> Result<Url> {
        parse_archive_url(&self.base_url)
    }

    /// Ports URL, falling back to the base URL.
    pub fn ports_url(&self) -> Result<Url> {
        match &self.ports_url {
            Some(url) if !url.is_empty() => parse_archive_url(url),
            _ => {
                tracing::info!(base_url = %self.base_url, "missing ports_url, using base url");
                self.base_url()
            }
        }
    }
}

/// Parse an archive URL, making sure joins append below its path.
pub fn parse_archive_url(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).map_err(|e| Error::Config {
        msg: format!("invalid archive URL '{}': {}", raw, e),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::Config {
            msg: format!("unsupported URL scheme in '{}'", raw),
        });
    }

    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }

    Ok(url)
}
