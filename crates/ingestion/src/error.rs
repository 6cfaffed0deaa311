//! Error types for the ingestion crate.

use std::fmt;
use std::path::PathBuf;

use grib_index::IndexError;
use grib_refs::RefsError;
use grid_processor::GridProcessorError;
use thiserror::Error;

/// Errors that can occur while processing a dataset.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("reference error: {0}")]
    Refs(#[from] RefsError),

    #[error("processing error: {0}")]
    Processing(#[from] GridProcessorError),

    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("source archive not found: {0}")]
    MissingSource(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failure classes that decide how a failed dataset is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or truncated message.
    Format,
    /// Ambiguous mapping or unusable settings.
    Configuration,
    /// Missing group or variable, or an unknown level type.
    Schema,
    /// Unreadable byte range or unwritable destination.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Format => "format",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Schema => "schema",
            ErrorKind::Io => "io",
        })
    }
}

impl IngestionError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestionError::Index(e) => match e {
                IndexError::Scan { .. } => ErrorKind::Format,
                IndexError::InvalidConfig(_) => ErrorKind::Configuration,
                IndexError::Io { .. } | IndexError::Serialization(_) => ErrorKind::Io,
            },
            IngestionError::Refs(e) => match e {
                RefsError::Configuration(_) => ErrorKind::Configuration,
                RefsError::Schema(_) | RefsError::InvalidManifest(_) => ErrorKind::Schema,
                RefsError::Format(_) => ErrorKind::Format,
                RefsError::Io { .. } | RefsError::Json(_) => ErrorKind::Io,
            },
            IngestionError::Processing(e) => match e {
                GridProcessorError::Schema(_) | GridProcessorError::InvalidMetadata(_) => ErrorKind::Schema,
                GridProcessorError::Format(_) => ErrorKind::Format,
                GridProcessorError::ConfigError(_) => ErrorKind::Configuration,
                GridProcessorError::RangeRead { .. }
                | GridProcessorError::StorageError(_)
                | GridProcessorError::ZarrError(_) => ErrorKind::Io,
            },
            IngestionError::InvalidConfig(_) | IngestionError::Yaml(_) => ErrorKind::Configuration,
            IngestionError::ConfigRead { .. } | IngestionError::MissingSource(_) | IngestionError::Io { .. } => {
                ErrorKind::Io
            }
        }
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_follow_the_source_error() {
        let schema: IngestionError = RefsError::schema("group 'atm2d' not found").into();
        assert_eq!(schema.kind(), ErrorKind::Schema);

        let duplicate: IngestionError = RefsError::configuration("2t/0.0 claimed twice").into();
        assert_eq!(duplicate.kind(), ErrorKind::Configuration);

        let range: IngestionError = GridProcessorError::range_read("/data/an.grib", 10, 20, "eof").into();
        assert_eq!(range.kind(), ErrorKind::Io);

        assert_eq!(IngestionError::MissingSource("an.grib".into()).kind(), ErrorKind::Io);
        assert_eq!(ErrorKind::Configuration.to_string(), "configuration");
    }
}
