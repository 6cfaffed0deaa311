//! Cheap change detection for source archives.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, Result};

/// How a source file is fingerprinted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintMethod {
    /// File size plus modification time. Never reads the file.
    #[default]
    SizeMtime,
    /// File size plus CRC-32 of the full contents.
    Crc32,
}

impl FingerprintMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintMethod::SizeMtime => "size_mtime",
            FingerprintMethod::Crc32 => "crc32",
        }
    }
}

impl FromStr for FingerprintMethod {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "size_mtime" | "mtime" => Ok(FingerprintMethod::SizeMtime),
            "crc32" | "hash" => Ok(FingerprintMethod::Crc32),
            other => Err(IndexError::InvalidConfig(format!(
                "unknown fingerprint method: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Fingerprint {
    SizeMtime { size: u64, modified_ns: u128 },
    Crc32 { size: u64, crc32: u32 },
}

impl Fingerprint {
    pub fn compute(path: &Path, method: FingerprintMethod) -> Result<Self> {
        let metadata = std::fs::metadata(path).map_err(|e| IndexError::io(path, e))?;
        let size = metadata.len();

        match method {
            FingerprintMethod::SizeMtime => {
                let modified = metadata.modified().map_err(|e| IndexError::io(path, e))?;
                let modified_ns = modified
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_nanos())
                    .unwrap_or(0);
                Ok(Fingerprint::SizeMtime { size, modified_ns })
            }
            FingerprintMethod::Crc32 => {
                let file = File::open(path).map_err(|e| IndexError::io(path, e))?;
                let mut reader = BufReader::new(file);
                let mut hasher = crc32fast::Hasher::new();
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    let n = reader.read(&mut buf).map_err(|e| IndexError::io(path, e))?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
                Ok(Fingerprint::Crc32 {
                    size,
                    crc32: hasher.finalize(),
                })
            }
        }
    }

    pub fn method(&self) -> FingerprintMethod {
        match self {
            Fingerprint::SizeMtime { .. } => FingerprintMethod::SizeMtime,
            Fingerprint::Crc32 { .. } => FingerprintMethod::Crc32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_str() {
        assert_eq!(
            "crc32".parse::<FingerprintMethod>().unwrap(),
            FingerprintMethod::Crc32
        );
        assert_eq!(
            "SIZE_MTIME".parse::<FingerprintMethod>().unwrap(),
            FingerprintMethod::SizeMtime
        );
        assert!("md5".parse::<FingerprintMethod>().is_err());
    }

    #[test]
    fn test_crc32_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.grib");

        std::fs::write(&path, b"GRIB-one").unwrap();
        let first = Fingerprint::compute(&path, FingerprintMethod::Crc32).unwrap();
        std::fs::write(&path, b"GRIB-two").unwrap();
        let second = Fingerprint::compute(&path, FingerprintMethod::Crc32).unwrap();

        assert_ne!(first, second);
        assert_eq!(second.method(), FingerprintMethod::Crc32);
    }

    #[test]
    fn test_missing_file() {
        let err = Fingerprint::compute(Path::new("/nonexistent/x.grib"), FingerprintMethod::SizeMtime)
            .unwrap_err();
        assert!(matches!(err, IndexError::Io { .. }));
    }
}
