//! GRIB2 archive to Zarr store ingestion.
//!
//! Each dataset description names a local GRIB2 archive and a level type.
//! [`Pipeline::run_dataset`] indexes the archive, builds and saves its
//! reference manifest, opens it lazily, normalizes the schema and writes
//! the final store:
//!
//! ```text
//! <data_root>/<model>/grib/<grib_fn>                      source
//! <data_root>/<model>/refs/<grib stem>/<level_type>.json  manifest
//! <data_root>/<model>/zarr/<zarr_fn | output.zarr>        store
//! ```

pub mod config;
pub mod error;
pub mod pipeline;

pub use config::{load_config, parse_config, DatasetConfig, GeneralConfig, NamedDataset};
pub use error::{ErrorKind, IngestionError, Result};
pub use pipeline::{DatasetFailure, DatasetReport, Pipeline, RunSummary};
