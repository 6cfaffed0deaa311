//! Virtual Zarr references over GRIB2 archives.
//!
//! Messages indexed by `grib-index` are placed into groups and arrays by a
//! [`VariableMapping`] policy ([`build`]); one level type's group is then
//! re-rooted as a standalone [`NormalizedManifest`] ([`flatten`]) that can
//! be saved as a kerchunk JSON file and opened as a lazy dataset.

pub mod builder;
pub mod error;
pub mod flatten;
pub mod level;
pub mod manifest;
pub mod mapping;

pub use builder::{build, GRIB_CODEC_ID, LEVEL_DIM, TIME_DIM, VALUE_DIM};
pub use error::{RefsError, Result};
pub use flatten::flatten;
pub use level::{LevelType, PRESSURE_GROUP, SURFACE_GROUP};
pub use manifest::{InlineValue, NormalizedManifest, RefItem, RefKey, Reference, ReferenceManifest};
pub use mapping::{GfsMapping, IfsMapping, MappingKind, Placement, VariableMapping};
