//! Error types for manifest building and normalization.

use std::path::PathBuf;

use grib2_parser::Grib2Error;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RefsError>;

#[derive(Error, Debug)]
pub enum RefsError {
    /// Ambiguous or inconsistent assignment of messages to arrays.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing group or unknown level type.
    #[error("schema error: {0}")]
    Schema(String),

    #[error("GRIB2 error: {0}")]
    Format(#[from] Grib2Error),

    /// A persisted manifest that cannot be interpreted.
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RefsError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
