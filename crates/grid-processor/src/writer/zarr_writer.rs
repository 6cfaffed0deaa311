//! Zarr V3 writer for normalized datasets.
//!
//! The store is a root group carrying the dataset attributes with one array
//! per coordinate and data variable. Lazy variables are streamed one plane
//! at a time so a full field never has to sit in memory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use zarrs::array::codec::bytes_to_bytes::blosc::{
    BloscCodec, BloscCompressionLevel, BloscCompressor, BloscShuffleMode,
};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::group::GroupBuilder;
use zarrs::storage::{ReadableStorageTraits, WritableStorageTraits};
use zarrs_filesystem::FilesystemStore;

use crate::config::{GridProcessorConfig, ZarrCompression};
use crate::dataset::{outer_indices, ArrayData, ArrayValues, DType, Dataset, Variable};
use crate::error::{GridProcessorError, Result};
use crate::normalize::{X_DIM, Y_DIM};

/// Outcome of writing one dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub path: PathBuf,
    /// Number of arrays written.
    pub arrays: usize,
    /// Uncompressed payload bytes.
    pub bytes_written: u64,
}

/// Writer for creating Zarr V3 stores from datasets.
pub struct ZarrWriter {
    config: GridProcessorConfig,
}

impl ZarrWriter {
    /// Create a new ZarrWriter with the given configuration.
    pub fn new(config: GridProcessorConfig) -> Self {
        Self { config }
    }

    /// Write `dataset` to a fresh store at `dest`.
    ///
    /// Whatever exists at `dest` is removed first; the write itself is not
    /// atomic, so a failure leaves a partial store behind.
    pub fn write(&self, dataset: &Dataset, dest: &Path) -> Result<WriteSummary> {
        if dest.is_dir() {
            info!(path = %dest.display(), "Replacing existing store");
            std::fs::remove_dir_all(dest)?;
        } else if dest.exists() {
            std::fs::remove_file(dest)?;
        }
        std::fs::create_dir_all(dest)?;

        let store = Arc::new(
            FilesystemStore::new(dest).map_err(GridProcessorError::storage_error)?,
        );

        let group = GroupBuilder::new()
            .attributes(dataset.attrs.clone())
            .build(store.clone(), "/")
            .map_err(GridProcessorError::zarr_error)?;
        group
            .store_metadata()
            .map_err(GridProcessorError::storage_error)?;

        let mut summary = WriteSummary {
            path: dest.to_path_buf(),
            arrays: 0,
            bytes_written: 0,
        };
        for (name, var) in dataset.variables() {
            summary.bytes_written += self.write_variable(store.clone(), name, var)?;
            summary.arrays += 1;
        }

        info!(
            path = %dest.display(),
            arrays = summary.arrays,
            bytes = summary.bytes_written,
            compression = %self.config.zarr_compression,
            "Wrote Zarr store"
        );
        Ok(summary)
    }

    fn write_variable<S: ReadableStorageTraits + WritableStorageTraits + 'static>(
        &self,
        store: Arc<S>,
        name: &str,
        var: &Variable,
    ) -> Result<u64> {
        let shape = var.shape();
        let chunk_shape = self.chunk_shape(name, var)?;
        let array = self.build_array(store, name, var, &shape, &chunk_shape)?;
        array
            .store_metadata()
            .map_err(GridProcessorError::storage_error)?;

        if shape.iter().any(|n| *n == 0) {
            return Ok(0);
        }

        let bytes = match &var.data {
            ArrayData::Eager(a) => {
                let subset = subset(&vec![0; shape.len()], &shape)?;
                let stored = match a.values() {
                    ArrayValues::Float32(v) => array.store_array_subset_elements(&subset, v),
                    ArrayValues::Float64(v) => array.store_array_subset_elements(&subset, v),
                    ArrayValues::Int64(v) => array.store_array_subset_elements(&subset, v),
                };
                stored.map_err(GridProcessorError::storage_error)?;
                (a.values().len() * a.dtype().size()) as u64
            }
            ArrayData::Lazy(lazy) => {
                let plane_shape = lazy.plane_shape();
                let mut bytes = 0u64;
                for outer in outer_indices(&lazy.outer_shape()) {
                    let plane = lazy.read_plane(&outer)?;
                    let start: Vec<usize> = outer.iter().copied().chain(plane_shape.iter().map(|_| 0)).collect();
                    let extent: Vec<usize> = outer.iter().map(|_| 1).chain(plane_shape.iter().copied()).collect();
                    array
                        .store_array_subset_elements(&subset(&start, &extent)?, &plane)
                        .map_err(GridProcessorError::storage_error)?;
                    bytes += std::mem::size_of_val(plane.as_slice()) as u64;
                }
                bytes
            }
        };
        debug!(variable = name, shape = ?shape, chunks = ?chunk_shape, bytes, "Wrote array");
        Ok(bytes)
    }

    /// Explicit chunking, else a still-valid inherited encoding, else one
    /// plane per chunk with spatial tiles. Clamped to the shape.
    fn chunk_shape(&self, name: &str, var: &Variable) -> Result<Vec<usize>> {
        let inherited = var.encoding.get("chunks").map(|c| {
            serde_json::from_value::<Vec<usize>>(c.clone())
                .map_err(|e| GridProcessorError::schema(format!("{}: bad encoded chunks: {}", name, e)))
        });
        let requested = match (&var.chunks, inherited) {
            (Some(chunks), _) => chunks.clone(),
            (None, Some(chunks)) => chunks?,
            (None, None) => var
                .dims
                .iter()
                .map(|d| {
                    if d == Y_DIM || d == X_DIM {
                        self.config.zarr_chunk_size
                    } else {
                        1
                    }
                })
                .collect(),
        };
        if requested.len() != var.dims.len() {
            return Err(GridProcessorError::schema(format!(
                "{}: chunks {:?} do not match dimensions {:?}",
                name, requested, var.dims
            )));
        }
        Ok(requested
            .iter()
            .zip(var.shape())
            .map(|(c, n)| (*c).clamp(1, n.max(1)))
            .collect())
    }

    /// Build a Zarr array with the configured settings.
    fn build_array<S: ReadableStorageTraits + WritableStorageTraits + 'static>(
        &self,
        storage: Arc<S>,
        name: &str,
        var: &Variable,
        shape: &[usize],
        chunk_shape: &[usize],
    ) -> Result<Array<S>> {
        let dtype = var.data.dtype();
        let (data_type, fill_value) = match dtype {
            DType::Float32 => (DataType::Float32, FillValue::from(f32::NAN)),
            DType::Float64 => (DataType::Float64, FillValue::from(f64::NAN)),
            DType::Int64 => (DataType::Int64, FillValue::from(0i64)),
        };

        let chunk_grid: zarrs::array::ChunkGrid = chunk_shape
            .iter()
            .map(|c| *c as u64)
            .collect::<Vec<u64>>()
            .try_into()
            .map_err(|e| GridProcessorError::ConfigError(format!("{:?}", e)))?;

        let mut binding = ArrayBuilder::new(
            shape.iter().map(|n| *n as u64).collect::<Vec<u64>>(),
            data_type,
            chunk_grid,
            fill_value,
        );
        let mut builder = binding
            .attributes(var.attrs.clone())
            .dimension_names(Some(var.dims.clone()));

        if self.config.zarr_compression != ZarrCompression::None {
            let codec = self.create_compression_codec(dtype.size())?;
            builder = builder.bytes_to_bytes_codecs(vec![codec]);
        }

        builder
            .build(storage, &format!("/{}", name))
            .map_err(GridProcessorError::zarr_error)
    }

    /// Create the compression codec based on configuration.
    fn create_compression_codec(
        &self,
        element_size: usize,
    ) -> Result<Arc<dyn zarrs::array::codec::BytesToBytesCodecTraits>> {
        let level = BloscCompressionLevel::try_from(self.config.zarr_compression_level)
            .map_err(|_| GridProcessorError::ConfigError("Invalid compression level".to_string()))?;

        let shuffle = if self.config.zarr_shuffle {
            BloscShuffleMode::Shuffle
        } else {
            BloscShuffleMode::NoShuffle
        };

        // typesize is required when shuffle is enabled
        let typesize = self.config.zarr_shuffle.then_some(element_size);

        let compressor = match self.config.zarr_compression {
            ZarrCompression::None => {
                return Err(GridProcessorError::ConfigError(
                    "No compression configured".to_string(),
                ))
            }
            ZarrCompression::BloscLz4 => BloscCompressor::LZ4,
            ZarrCompression::BloscZstd => BloscCompressor::Zstd,
        };

        let codec = BloscCodec::new(compressor, level, None, shuffle, typesize)
            .map_err(|e| GridProcessorError::ConfigError(e.to_string()))?;

        Ok(Arc::new(codec))
    }
}

fn subset(start: &[usize], shape: &[usize]) -> Result<ArraySubset> {
    ArraySubset::new_with_start_shape(
        start.iter().map(|s| *s as u64).collect(),
        shape.iter().map(|s| *s as u64).collect(),
    )
    .map_err(GridProcessorError::storage_error)
}
