use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use utoipa::ToSchema;

/// Summary of one refresh pass over an archive.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RefreshResult {
    /// Archive identity
    pub archive: String,
    /// When the pass started
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration of the pass
    #[serde(serialize_with = "serialize_secs")]
    #[schema(value_type = f64)]
    pub duration: Duration,
    /// Records stored for the archive once the pass finished
    pub records: usize,
    /// Pockets whose snapshot was replaced
    pub pockets_replaced: usize,
    /// Pockets whose indices had not changed
    pub pockets_unchanged: usize,
    /// Last error seen during the pass, if any
    pub error: Option<String>,
}

impl RefreshResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

fn serialize_secs<S: serde::Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(duration.as_secs_f64())
}
