//! `dists/<pocket>/Release` parsing.

use super::checksum::{Checksum, IndexDigest};
use super::compression::Compression;
use super::parser::{Stanzas, parse_fields};
use std::collections::HashMap;

/// Size and checksums of one file listed in a Release file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseEntry {
    pub size: u64,
    pub sha256: Option<String>,
    pub md5: Option<String>,
}

impl ReleaseEntry {
    /// Strongest checksum available, with the declared size.
    pub fn digest(&self) -> Option<IndexDigest> {
        let checksum = match (&self.sha256, &self.md5) {
            (Some(sha256), _) => Checksum::Sha256(sha256.to_ascii_lowercase()),
            (None, Some(md5)) => Checksum::Md5(md5.to_ascii_lowercase()),
            (None, None) => return None,
        };
        Some(IndexDigest {
            size: self.size,
            checksum,
        })
    }
}

/// The parts of a Release file the fetcher relies on.
#[derive(Debug, Clone, Default)]
pub struct Release {
    pub suite: Option<String>,
    pub codename: Option<String>,
    entries: HashMap<String, ReleaseEntry>,
}

impl Release {
    pub fn parse(content: &str) -> Result<Self, String> {
        let stanza = Stanzas::new(content)
            .next()
            .ok_or_else(|| "empty release file".to_string())?;
        let fields = parse_fields(&stanza).map_err(|e| e.to_string())?;

        let mut release = Release::default();
        for field in fields {
            match field.name.as_str() {
                "suite" => release.suite = Some(field.value),
                "codename" => release.codename = Some(field.value),
                "sha256" => release.add_hashes(&field.value, |entry, hash| {
                    entry.sha256 = Some(hash)
                })?,
                "md5sum" => {
                    release.add_hashes(&field.value, |entry, hash| entry.md5 = Some(hash))?
                }
                _ => {}
            }
        }

        if release.entries.is_empty() {
            return Err("release file lists no checksummed files".to_string());
        }

        Ok(release)
    }

    fn add_hashes(
        &mut self,
        list: &str,
        mut set: impl FnMut(&mut ReleaseEntry, String),
    ) -> Result<(), String> {
        for line in list.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            let [hash, size, path] = &parts[..] else {
                return Err(format!("invalid file list line: {}", line));
            };
            let size: u64 = size
                .parse()
                .map_err(|_| format!("invalid size in file list line: {}", line))?;

            let entry = self.entries.entry(path.to_string()).or_default();
            entry.size = size;
            set(entry, hash.to_string());
        }
        Ok(())
    }

    pub fn entry(&self, path: &str) -> Option<&ReleaseEntry> {
        self.entries.get(path)
    }

    /// Pick the variant of an index to download, in order of preference.
    ///
    /// `base_path` is the uncompressed path relative to the Release file,
    /// e.g. `main/binary-amd64/Packages`.
    pub fn select_index(&self, base_path: &str) -> Option<(Compression, String, IndexDigest)> {
        Compression::PREFERENCE.iter().find_map(|compression| {
            let path = format!("{}{}", base_path, compression.extension());
            let digest = self.entry(&path)?.digest()?;
            Some((*compression, path, digest))
        })
    }
}
