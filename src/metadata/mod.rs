pub mod checksum;
pub mod compression;
pub mod parser;
pub mod release;

pub use checksum::{Checksum, IndexDigest, calculate_md5, calculate_sha256};
pub use compression::Compression;
pub use parser::{ParsedIndex, StanzaContext, parse_index};
pub use release::{Release, ReleaseEntry};
