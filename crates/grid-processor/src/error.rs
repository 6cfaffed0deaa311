//! Error types for dataset reading, normalization and writing.

use grib2_parser::Grib2Error;
use thiserror::Error;

/// Errors that can occur while processing a virtual dataset.
#[derive(Error, Debug)]
pub enum GridProcessorError {
    /// Missing or conflicting variables and dimensions.
    #[error("schema error: {0}")]
    Schema(String),

    /// A referenced byte range could not be read.
    #[error("failed to read {length} bytes at offset {offset} of {file}: {reason}")]
    RangeRead {
        file: String,
        offset: u64,
        length: u64,
        reason: String,
    },

    /// A referenced message could not be decoded.
    #[error("GRIB2 error: {0}")]
    Format(#[from] Grib2Error),

    /// Array metadata in the manifest that cannot be interpreted.
    #[error("invalid array metadata: {0}")]
    InvalidMetadata(String),

    /// Zarr format error.
    #[error("Zarr format error: {0}")]
    ZarrError(String),

    /// Storage/IO error while writing the output store.
    #[error("storage error: {0}")]
    StorageError(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl GridProcessorError {
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    pub fn range_read(file: &str, offset: u64, length: u64, reason: impl ToString) -> Self {
        Self::RangeRead {
            file: file.to_string(),
            offset,
            length,
            reason: reason.to_string(),
        }
    }

    pub fn invalid_metadata(msg: impl Into<String>) -> Self {
        Self::InvalidMetadata(msg.into())
    }

    pub fn zarr_error(err: impl std::fmt::Display) -> Self {
        Self::ZarrError(err.to_string())
    }

    pub fn storage_error(err: impl std::fmt::Display) -> Self {
        Self::StorageError(err.to_string())
    }

    /// Whether the failure came from reading or writing bytes.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::RangeRead { .. } | Self::StorageError(_))
    }
}

impl From<std::io::Error> for GridProcessorError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for GridProcessorError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidMetadata(err.to_string())
    }
}

/// Result type for grid processor operations.
pub type Result<T> = std::result::Result<T, GridProcessorError>;
