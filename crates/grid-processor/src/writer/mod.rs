//! Zarr output for normalized datasets.

mod zarr_writer;

pub use zarr_writer::{WriteSummary, ZarrWriter};
