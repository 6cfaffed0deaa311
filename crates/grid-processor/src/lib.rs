//! Lazy datasets over GRIB2 reference manifests and their Zarr V3 output.
//!
//! ```text
//! NormalizedManifest
//!      │
//!      ▼
//! DatasetReader::open         coordinates decoded inline,
//!      │                      payloads left as byte ranges
//!      ▼
//! normalize(ds, level_type)   value → (y, x), level rules,
//!      │                      renames, encodings cleared
//!      ▼
//! ZarrWriter::write           one plane at a time
//!      │                      ├─► ChunkCache hit: decoded plane
//!      │                      └─► miss: read range, decode message
//!      ▼
//! <data_root>/<model>/zarr/output.zarr
//! ```

pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod normalize;
pub mod reader;
pub mod writer;

pub use cache::{CacheStats, ChunkCache, ChunkKey};
pub use config::{GridProcessorConfig, ZarrCompression};
pub use dataset::{ArrayData, ArrayValues, DType, Dataset, LazyArray, NdArray, Variable};
pub use error::{GridProcessorError, Result};
pub use normalize::{
    apply_level_rules, clear_encoding, normalize, rename_variables, repair_spatial, RENAME_TABLE,
};
pub use reader::{open, DatasetReader};
pub use writer::{WriteSummary, ZarrWriter};
