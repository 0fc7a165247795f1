pub mod package;
pub mod refresh;

pub use package::{PackageRecord, RecordKey};
pub use refresh::RefreshResult;
