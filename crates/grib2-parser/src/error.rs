//! Error types for GRIB2 parsing.

use thiserror::Error;

/// Errors raised while scanning or decoding GRIB2 messages.
#[derive(Error, Debug)]
pub enum Grib2Error {
    #[error("invalid GRIB2 format: {0}")]
    InvalidFormat(String),

    #[error("invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    /// A message declares more bytes than remain in the archive.
    #[error("truncated message at offset {offset}: declared {declared} bytes, {available} available")]
    Truncated {
        offset: u64,
        declared: u64,
        available: u64,
    },

    #[error("malformed message at offset {offset}: {reason}")]
    InvalidMessage { offset: u64, reason: String },

    #[error("unsupported grid definition template 3.{0}")]
    UnsupportedGrid(u16),

    #[error("unpacking failed: {0}")]
    UnpackingError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for GRIB2 operations.
pub type Result<T> = std::result::Result<T, Grib2Error>;
