pub mod index_cache;

pub use index_cache::IndexCache;

use crate::archive::ArchiveId;
use crate::error::{Error, Result, ResultIoExt};
use crate::models::{PackageRecord, RecordKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Validate a path component to prevent directory traversal attacks
pub fn validate_path_component(component: &str) -> Result<()> {
    if component.is_empty()
        || component == "."
        || component == ".."
        || component.contains('/')
        || component.contains('\\')
        || component.contains('\0')
    {
        return Err(Error::InvalidPath {
            component: component.to_string(),
        });
    }

    Ok(())
}

/// Write `data` to `path` so that readers (and a restarted process) see
/// either the previous content or the new content, never a torn file.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| Error::InvalidPath {
        component: path.display().to_string(),
    })?;
    fs::create_dir_all(parent).await.map_io_err(parent)?;

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidPath {
            component: path.display().to_string(),
        })?;
    let tmp_path = parent.join(format!(".{}.tmp", file_name));

    let mut file = fs::File::create(&tmp_path).await.map_io_err(&tmp_path)?;
    file.write_all(data).await.map_io_err(&tmp_path)?;
    file.sync_all().await.map_io_err(&tmp_path)?;
    drop(file);

    fs::rename(&tmp_path, path).await.map_io_err(path)?;

    // Persist the rename itself
    #[cfg(unix)]
    fs::File::open(parent)
        .await
        .map_io_err(parent)?
        .sync_all()
        .await
        .map_io_err(parent)?;

    Ok(())
}

/// On-disk form of one pocket snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    archive: String,
    pocket: String,
    written_at: DateTime<Utc>,
    records: Vec<PackageRecord>,
}

/// Immutable record set of one pocket, indexed by package name.
#[derive(Debug, Default)]
struct PocketSnapshot {
    by_name: HashMap<String, Vec<PackageRecord>>,
    len: usize,
}

impl PocketSnapshot {
    fn from_records(records: Vec<PackageRecord>) -> Self {
        let len = records.len();
        let mut by_name: HashMap<String, Vec<PackageRecord>> = HashMap::new();
        for record in records {
            by_name.entry(record.package.clone()).or_default().push(record);
        }
        Self { by_name, len }
    }
}

/// Durable package cache for one archive.
///
/// Structure: {cache_dir}/snapshots/{pocket}.json
///
/// Each pocket is replaced wholesale. The new snapshot is committed to disk
/// before it is published to readers, and readers only ever clone a handle to
/// a complete snapshot.
pub struct CacheStore {
    archive: ArchiveId,
    snapshot_dir: PathBuf,
    pockets: Vec<String>,
    snapshots: RwLock<HashMap<String, Arc<PocketSnapshot>>>,
    writer: tokio::sync::Mutex<()>,
}

impl CacheStore {
    /// Open the store, loading whatever snapshots a previous run left behind.
    pub async fn open(cache_dir: &Path, archive: ArchiveId, pockets: Vec<String>) -> Result<Self> {
        let snapshot_dir = cache_dir.join("snapshots");
        fs::create_dir_all(&snapshot_dir)
            .await
            .map_io_err(&snapshot_dir)?;

        let mut snapshots = HashMap::new();
        for pocket in &pockets {
            validate_path_component(pocket)?;
            let path = snapshot_dir.join(format!("{}.json", pocket));
            if !path.exists() {
                continue;
            }

            match Self::load_snapshot(&path).await {
                Ok(file) => {
                    tracing::info!(
                        archive = %archive,
                        pocket,
                        records = file.records.len(),
                        written_at = %file.written_at,
                        "Loaded cached snapshot"
                    );
                    snapshots.insert(
                        pocket.clone(),
                        Arc::new(PocketSnapshot::from_records(file.records)),
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        archive = %archive,
                        pocket,
                        error = %e,
                        "Ignoring unreadable snapshot, pocket starts empty"
                    );
                }
            }
        }

        Ok(Self {
            archive,
            snapshot_dir,
            pockets,
            snapshots: RwLock::new(snapshots),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    async fn load_snapshot(path: &Path) -> Result<SnapshotFile> {
        let content = fs::read(path).await.map_io_err(path)?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub fn archive(&self) -> &ArchiveId {
        &self.archive
    }

    fn snapshot_path(&self, pocket: &str) -> Result<PathBuf> {
        validate_path_component(pocket)?;
        Ok(self.snapshot_dir.join(format!("{}.json", pocket)))
    }

    fn store_error(&self, msg: impl Into<String>) -> Error {
        Error::Store {
            archive: self.archive.to_string(),
            msg: msg.into(),
        }
    }

    /// Replace the snapshot of `pocket` with `records`.
    ///
    /// Records sharing (package, version, architecture, pocket) collapse to
    /// the last one given. Returns the number of records stored.
    pub async fn replace<I>(&self, pocket: &str, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = PackageRecord>,
    {
        if !self.pockets.iter().any(|p| p == pocket) {
            return Err(self.store_error(format!("unknown pocket '{}'", pocket)));
        }
        let path = self.snapshot_path(pocket)?;

        let mut keyed: BTreeMap<RecordKey, PackageRecord> = BTreeMap::new();
        for record in records {
            if record.pocket != pocket || record.archive != self.archive.as_str() {
                return Err(self.store_error(format!(
                    "record {} {} belongs to {}/{}, not {}/{}",
                    record.package,
                    record.version,
                    record.archive,
                    record.pocket,
                    self.archive,
                    pocket
                )));
            }
            keyed.insert(record.key(), record);
        }
        let records: Vec<PackageRecord> = keyed.into_values().collect();
        let count = records.len();

        let _guard = self.writer.lock().await;

        let file = SnapshotFile {
            archive: self.archive.to_string(),
            pocket: pocket.to_string(),
            written_at: Utc::now(),
            records,
        };
        let data = serde_json::to_vec(&file)?;
        write_atomic(&path, &data).await?;

        let snapshot = Arc::new(PocketSnapshot::from_records(file.records));
        self.snapshots
            .write()
            .map_err(|_| self.store_error("snapshot lock poisoned"))?
            .insert(pocket.to_string(), snapshot);

        tracing::debug!(archive = %self.archive, pocket, records = count, "Replaced snapshot");
        Ok(count)
    }

    /// Every record named `name`, in pocket configuration order.
    pub fn get(&self, name: &str) -> Result<Vec<PackageRecord>> {
        let snapshots: Vec<Arc<PocketSnapshot>> = {
            let guard = self
                .snapshots
                .read()
                .map_err(|_| self.store_error("snapshot lock poisoned"))?;
            self.pockets
                .iter()
                .filter_map(|pocket| guard.get(pocket).cloned())
                .collect()
        };

        Ok(snapshots
            .iter()
            .filter_map(|snapshot| snapshot.by_name.get(name))
            .flat_map(|records| records.iter().cloned())
            .collect())
    }

    /// Total number of records currently stored.
    pub fn record_count(&self) -> Result<usize> {
        let guard = self
            .snapshots
            .read()
            .map_err(|_| self.store_error("snapshot lock poisoned"))?;
        Ok(guard.values().map(|s| s.len).sum())
    }
}
