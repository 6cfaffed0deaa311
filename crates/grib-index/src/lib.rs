//! Persistent index of GRIB2 archives.
//!
//! [`IndexStore::get_or_build`] returns the ordered message descriptors of
//! an archive, rescanning only when the archive's [`Fingerprint`] no longer
//! matches the persisted index.

pub mod error;
pub mod fingerprint;
pub mod store;

pub use error::{IndexError, Result};
pub use fingerprint::{Fingerprint, FingerprintMethod};
pub use store::{FileIndex, IndexStats, IndexStore, DEFAULT_MEMORY_CAPACITY, INDEX_DIR_ENV};
