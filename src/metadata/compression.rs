//! Transparent decompression of index files.

use flate2::read::GzDecoder;
use std::io::Read;
use xz2::read::XzDecoder;

/// Compression formats an archive may publish indices in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Xz,
}

impl Compression {
    /// Preferred download order: smallest transfer first.
    pub const PREFERENCE: [Compression; 3] = [Compression::Xz, Compression::Gzip, Compression::None];

    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Xz => ".xz",
        }
    }

    pub fn decompress(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut output = Vec::new();
        match self {
            Compression::None => output.extend_from_slice(data),
            Compression::Gzip => {
                GzDecoder::new(data).read_to_end(&mut output)?;
            }
            Compression::Xz => {
                XzDecoder::new(data).read_to_end(&mut output)?;
            }
        }
        Ok(output)
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Xz => write!(f, "xz"),
        }
    }
}
