use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// One (package, version, architecture) entry as published in a pocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PackageRecord {
    /// Identity of the archive the record was mirrored from
    #[schema(example = "ubuntu")]
    pub archive: String,
    /// Binary package name
    #[schema(example = "hello")]
    pub package: String,
    /// Package version, opaque
    #[schema(example = "2.10-3build1")]
    pub version: String,
    /// Architecture (e.g., amd64, arm64, all)
    #[schema(example = "amd64")]
    pub architecture: String,
    /// Component the index was published under
    #[schema(example = "main")]
    pub component: String,
    /// Pocket (suite) the index was published under
    #[schema(example = "noble")]
    pub pocket: String,
    /// Source package name
    #[schema(example = "hello")]
    pub source: String,
}

impl PackageRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            package: self.package.clone(),
            version: self.version.clone(),
            architecture: self.architecture.clone(),
            pocket: self.pocket.clone(),
        }
    }
}

/// Identity of a record within one archive snapshot.
///
/// The component is deliberately absent: the same key published in two
/// components collapses to a single record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub package: String,
    pub version: String,
    pub architecture: String,
    pub pocket: String,
}
