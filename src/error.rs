use axum::response::IntoResponse;
use derive_more::{Display, From};
use std::path::Path;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, From)]
pub enum Error {
    #[display("I/O error at {path}: {error}")]
    Io { error: std::io::Error, path: String },

    #[display("Configuration error: {msg}")]
    Config { msg: String },

    #[display("Request to {url} failed: {error}")]
    Http { url: String, error: reqwest::Error },

    #[display("Not found: {url}")]
    NotFound { url: String },

    #[display("{url} unavailable this pass: {msg}")]
    Unavailable { url: String, msg: String },

    #[display("Invalid release file {url}: {msg}")]
    InvalidRelease { url: String, msg: String },

    #[display("Checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[display("Failed to decompress {url}: {error}")]
    Decompress { url: String, error: std::io::Error },

    #[display("Invalid path component: {component}")]
    InvalidPath { component: String },

    #[display("Cache store error for {archive}: {msg}")]
    Store { archive: String, msg: String },

    #[from]
    #[display("JSON error: {_0}")]
    Json(serde_json::Error),
}

impl std::error::Error for Error {}

/// Attach the offending path to I/O errors.
pub trait ResultIoExt<T> {
    fn map_io_err(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> ResultIoExt<T> for std::result::Result<T, std::io::Error> {
    fn map_io_err(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|error| Error::Io {
            error,
            path: path.as_ref().display().to_string(),
        })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            Error::NotFound { .. } | Error::InvalidPath { .. } => {
                (axum::http::StatusCode::NOT_FOUND, "Not found".to_string())
            }
            Error::Store { archive, msg } => {
                tracing::error!(archive, "Cache store failure: {}", msg);
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Package cache unavailable".to_string(),
                )
            }
            _ => {
                // Never expose paths or upstream URLs
                tracing::error!("Request failed: {}", self);
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = axum::Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}
