/// Calculate MD5 checksum
pub fn calculate_md5(data: &[u8]) -> String {
    let digest = md5::compute(data);
    format!("{:x}", digest)
}

/// Calculate SHA256 checksum
pub fn calculate_sha256(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Size and checksum an archive declares for one index file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDigest {
    pub size: u64,
    pub checksum: Checksum,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checksum {
    Sha256(String),
    Md5(String),
}

impl Checksum {
    /// Hash `data` with the same algorithm as `self`.
    pub fn compute_like(&self, data: &[u8]) -> Checksum {
        match self {
            Checksum::Sha256(_) => Checksum::Sha256(calculate_sha256(data)),
            Checksum::Md5(_) => Checksum::Md5(calculate_md5(data)),
        }
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Checksum::Sha256(hex) => write!(f, "sha256:{}", hex),
            Checksum::Md5(hex) => write!(f, "md5:{}", hex),
        }
    }
}

impl std::fmt::Display for IndexDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} bytes)", self.checksum, self.size)
    }
}
