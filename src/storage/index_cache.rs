//! Last verified copy of every index body, so a pocket can be rebuilt when
//! only some of its indices changed.

use super::{validate_path_component, write_atomic};
use crate::archive::IndexScope;
use crate::error::{Result, ResultIoExt};
use std::path::{Path, PathBuf};
use tokio::fs;

const STAGED_SUFFIX: &str = ".new";

/// Structure: {cache_dir}/indices/{pocket}/{component}/binary-{arch}/Packages
pub struct IndexCache {
    root: PathBuf,
}

impl IndexCache {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            root: cache_dir.join("indices"),
        }
    }

    pub fn path(&self, scope: &IndexScope) -> Result<PathBuf> {
        validate_path_component(&scope.pocket)?;
        validate_path_component(&scope.component)?;
        validate_path_component(&scope.arch)?;

        Ok(self
            .root
            .join(&scope.pocket)
            .join(&scope.component)
            .join(format!("binary-{}", scope.arch))
            .join("Packages"))
    }

    fn staged_path(&self, scope: &IndexScope) -> Result<PathBuf> {
        let path = self.path(scope)?;
        Ok(path.with_file_name(format!("Packages{}", STAGED_SUFFIX)))
    }

    /// Committed copy of the index, if any.
    pub async fn load(&self, scope: &IndexScope) -> Result<Option<Vec<u8>>> {
        let path = self.path(scope)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).map_io_err(&path),
        }
    }

    /// Write a freshly fetched body next to the committed one.
    pub async fn stage(&self, scope: &IndexScope, data: &[u8]) -> Result<()> {
        let path = self.staged_path(scope)?;
        write_atomic(&path, data).await
    }

    /// Make a staged body the committed copy.
    pub async fn promote(&self, scope: &IndexScope) -> Result<()> {
        let staged = self.staged_path(scope)?;
        let path = self.path(scope)?;
        fs::rename(&staged, &path).await.map_io_err(&path)
    }

    /// Drop a staged body that will not be committed.
    pub async fn discard(&self, scope: &IndexScope) {
        if let Ok(staged) = self.staged_path(scope) {
            let _ = fs::remove_file(&staged).await;
        }
    }

    /// Forget the committed copy of an index that no longer exists upstream.
    pub async fn remove(&self, scope: &IndexScope) -> Result<()> {
        let path = self.path(scope)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).map_io_err(&path),
        }
    }
}
