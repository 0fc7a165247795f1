#![allow(dead_code)]

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use flate2::write::GzEncoder;
use madison_mirror::api::{AppState, StatusBoard};
use madison_mirror::archive::ArchiveConfig;
use madison_mirror::build_router;
use madison_mirror::catalog::Catalog;
use madison_mirror::config::ArchiveSettings;
use madison_mirror::metadata::{Compression, calculate_sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use xz2::write::XzEncoder;

/// Files published by one pocket, keyed by path relative to `dists/<pocket>/`.
type PocketFiles = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct FixtureState {
    pockets: Mutex<HashMap<String, PocketFiles>>,
    /// Pockets whose Release file currently answers 404
    hidden: Mutex<Vec<String>>,
    index_downloads: AtomicUsize,
    release_requests: AtomicUsize,
}

/// A Debian-style archive served over HTTP from memory.
pub struct FixtureArchive {
    state: Arc<FixtureState>,
    pub base_url: String,
}

impl FixtureArchive {
    pub async fn start() -> Self {
        let state = Arc::new(FixtureState::default());
        let app = Router::new()
            .fallback(serve_fixture)
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            state,
            base_url: format!("http://{}/", addr),
        }
    }

    /// Publish a Packages index, replacing any previous variant of it.
    pub fn set_index(&self, pocket: &str, component: &str, arch: &str, packages: &str, compression: Compression) {
        let base = format!("{}/binary-{}/Packages", component, arch);
        let mut pockets = self.state.pockets.lock().unwrap();
        let files = pockets.entry(pocket.to_string()).or_default();
        files.retain(|path, _| !path.starts_with(&base));
        files.insert(
            format!("{}{}", base, compression.extension()),
            compress(packages.as_bytes(), compression),
        );
    }

    /// Serve different bytes than the Release file declares. Freezes the
    /// pocket's Release file.
    pub fn corrupt_index(&self, pocket: &str, component: &str, arch: &str) {
        self.freeze_release(pocket);
        let base = format!("{}/binary-{}/Packages", component, arch);
        let mut pockets = self.state.pockets.lock().unwrap();
        let files = pockets.get_mut(pocket).unwrap();
        for (path, body) in files.iter_mut() {
            if path.starts_with(&base) {
                let last = body.len() - 1;
                body[last] ^= 0xff;
            }
        }
    }

    /// Freeze the Release file of a pocket at its current content.
    ///
    /// Later `set_index` calls change index bodies without updating the
    /// declared checksums until `thaw_release` is called.
    pub fn freeze_release(&self, pocket: &str) {
        let release = self.release(pocket).unwrap();
        let mut pockets = self.state.pockets.lock().unwrap();
        pockets
            .entry(pocket.to_string())
            .or_default()
            .insert("Release.frozen".to_string(), release.into_bytes());
    }

    pub fn thaw_release(&self, pocket: &str) {
        let mut pockets = self.state.pockets.lock().unwrap();
        if let Some(files) = pockets.get_mut(pocket) {
            files.remove("Release.frozen");
        }
    }

    /// Make the pocket's Release file answer 404.
    pub fn hide_pocket(&self, pocket: &str) {
        self.state.hidden.lock().unwrap().push(pocket.to_string());
    }

    pub fn unhide_pocket(&self, pocket: &str) {
        self.state.hidden.lock().unwrap().retain(|p| p != pocket);
    }

    /// Number of index bodies served so far.
    pub fn index_downloads(&self) -> usize {
        self.state.index_downloads.load(Ordering::SeqCst)
    }

    /// Number of Release requests received so far, answered or not.
    pub fn release_requests(&self) -> usize {
        self.state.release_requests.load(Ordering::SeqCst)
    }

    fn release(&self, pocket: &str) -> Option<String> {
        render_release(&self.state, pocket)
    }
}

fn render_release(state: &FixtureState, pocket: &str) -> Option<String> {
    let pockets = state.pockets.lock().unwrap();
    let files = pockets.get(pocket)?;
    if let Some(frozen) = files.get("Release.frozen") {
        return Some(String::from_utf8_lossy(frozen).into_owned());
    }

    let mut release = format!(
        "Origin: Fixture\nLabel: Fixture\nSuite: {pocket}\nCodename: {pocket}\nDate: Fri, 16 Oct 2026 00:00:00 UTC\nSHA256:\n"
    );
    for (path, body) in files {
        release.push_str(&format!(" {} {} {}\n", calculate_sha256(body), body.len(), path));
    }
    Some(release)
}

async fn serve_fixture(State(state): State<Arc<FixtureState>>, uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    let Some(rest) = path.strip_prefix("dists/") else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some((pocket, file)) = rest.split_once('/') else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if file == "Release" {
        state.release_requests.fetch_add(1, Ordering::SeqCst);
    }

    if state.hidden.lock().unwrap().iter().any(|p| p == pocket) {
        return StatusCode::NOT_FOUND.into_response();
    }

    if file == "Release" {
        return match render_release(&state, pocket) {
            Some(release) => release.into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        };
    }

    let body = {
        let pockets = state.pockets.lock().unwrap();
        pockets.get(pocket).and_then(|files| files.get(file)).cloned()
    };
    match body {
        Some(body) => {
            state.index_downloads.fetch_add(1, Ordering::SeqCst);
            body.into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn compress(data: &[u8], compression: Compression) -> Vec<u8> {
    match compression {
        Compression::None => data.to_vec(),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).unwrap();
            encoder.finish().unwrap()
        }
        Compression::Xz => {
            let mut encoder = XzEncoder::new(Vec::new(), 6);
            encoder.write_all(data).unwrap();
            encoder.finish().unwrap()
        }
    }
}

/// Render a Packages index from (package, version, architecture) triples.
pub fn packages(entries: &[(&str, &str, &str)]) -> String {
    entries
        .iter()
        .map(|(package, version, arch)| {
            format!(
                "Package: {package}\nVersion: {version}\nArchitecture: {arch}\nMaintainer: Fixture <fixture@example.invalid>\nDescription: fixture package\n multi-line description\n"
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn settings(
    name: &str,
    fixture: &FixtureArchive,
    pockets: &[&str],
    components: &[&str],
    architectures: &[&str],
) -> ArchiveSettings {
    ArchiveSettings {
        name: Some(name.to_string()),
        base_url: fixture.base_url.clone(),
        ports_url: None,
        pockets: pockets.iter().map(|s| s.to_string()).collect(),
        components: components.iter().map(|s| s.to_string()).collect(),
        architectures: architectures.iter().map(|s| s.to_string()).collect(),
        ports_architectures: Vec::new(),
    }
}

/// Serve `architectures` from a second fixture acting as the ports mirror.
pub fn with_ports(mut settings: ArchiveSettings, ports: &FixtureArchive, architectures: &[&str]) -> ArchiveSettings {
    settings.ports_url = Some(ports.base_url.clone());
    settings.ports_architectures = architectures.iter().map(|s| s.to_string()).collect();
    settings
}

pub async fn open_archive(settings: &ArchiveSettings, cache_root: &Path) -> Arc<ArchiveConfig> {
    let client = reqwest::Client::new();
    Arc::new(ArchiveConfig::open(settings, cache_root, client).await.unwrap())
}

pub fn cache_dir() -> TempDir {
    TempDir::new().unwrap()
}

/// HTTP application over already opened archives, without metrics.
pub fn setup_test_app(archives: &[Arc<ArchiveConfig>]) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState {
        catalog: Catalog::from_archives(archives),
        status: StatusBoard::new(archives.iter().map(|a| a.id.to_string()).collect()),
        metrics: None,
    });
    (build_router(Arc::clone(&state)), state)
}
