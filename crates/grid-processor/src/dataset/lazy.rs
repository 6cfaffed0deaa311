//! Lazily read arrays backed by GRIB2 message references.
//!
//! A [`VirtualArray`] is the raw manifest array: outer axes of chunk size 1
//! and a trailing sample axis whose single chunk is one whole message. A
//! [`LazyArray`] is a view on it that may fix outer indices and regrid the
//! sample axis, all without touching the referenced files.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use tracing::debug;

use crate::cache::{hash_path, ChunkCache};
use crate::dataset::array::{ArrayValues, NdArray, SpatialGather};
use crate::error::{GridProcessorError, Result};

/// Where the bytes of one chunk live.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkSource {
    Range { file: String, offset: u64, length: u64 },
    Inline(Arc<Vec<u8>>),
}

/// Read `length` bytes at `offset` of `file`.
pub fn read_range(file: &str, offset: u64, length: u64) -> Result<Vec<u8>> {
    let fail = |reason: std::io::Error| GridProcessorError::range_read(file, offset, length, reason);

    let mut f = File::open(file).map_err(fail)?;
    f.seek(SeekFrom::Start(offset)).map_err(fail)?;
    let len = usize::try_from(length)
        .map_err(|_| GridProcessorError::range_read(file, offset, length, "range too large"))?;
    let mut buf = vec![0u8; len];
    f.read_exact(&mut buf).map_err(fail)?;
    Ok(buf)
}

/// A manifest array whose chunks are whole GRIB2 messages.
pub struct VirtualArray {
    name: String,
    /// Outer axes followed by the sample axis.
    shape: Vec<usize>,
    fill_value: f32,
    chunks: HashMap<Vec<usize>, ChunkSource>,
    cache: Arc<Mutex<ChunkCache>>,
}

impl std::fmt::Debug for VirtualArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualArray")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("chunks", &self.chunks.len())
            .finish()
    }
}

impl VirtualArray {
    /// `chunks` is keyed by outer index (the sample-axis chunk index dropped).
    pub fn new(
        name: impl Into<String>,
        shape: Vec<usize>,
        fill_value: f32,
        chunks: HashMap<Vec<usize>, ChunkSource>,
        cache: Arc<Mutex<ChunkCache>>,
    ) -> Result<Self> {
        let name = name.into();
        if shape.is_empty() {
            return Err(GridProcessorError::invalid_metadata(format!(
                "{}: referenced arrays need a sample axis",
                name
            )));
        }
        let outer = &shape[..shape.len() - 1];
        for idx in chunks.keys() {
            if idx.len() != outer.len() || idx.iter().zip(outer).any(|(i, n)| i >= n) {
                return Err(GridProcessorError::invalid_metadata(format!(
                    "{}: chunk {:?} outside shape {:?}",
                    name, idx, shape
                )));
            }
        }
        Ok(Self {
            name,
            shape,
            fill_value,
            chunks,
            cache,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn npoints(&self) -> usize {
        self.shape.last().copied().unwrap_or(0)
    }

    /// Decode the plane at a full outer index. Missing chunks read as fill.
    pub fn read_chunk(&self, outer: &[usize]) -> Result<Arc<Vec<f32>>> {
        let Some(source) = self.chunks.get(outer) else {
            return Ok(Arc::new(vec![self.fill_value; self.npoints()]));
        };

        let key = match source {
            ChunkSource::Range { file, offset, .. } => Some((hash_path(file), *offset)),
            ChunkSource::Inline(_) => None,
        };
        if let Some(key) = key {
            let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(plane) = cache.get(&key) {
                return Ok(plane);
            }
        }

        let values = match source {
            ChunkSource::Range {
                file,
                offset,
                length,
            } => {
                debug!(array = %self.name, file = %file, offset, length, "Reading message");
                grib2_parser::decode_message(&read_range(file, *offset, *length)?)?
            }
            ChunkSource::Inline(bytes) => grib2_parser::decode_message(bytes)?,
        };
        if values.len() != self.npoints() {
            return Err(GridProcessorError::invalid_metadata(format!(
                "{}: chunk {:?} decoded to {} values, expected {}",
                self.name,
                outer,
                values.len(),
                self.npoints()
            )));
        }

        let plane = Arc::new(values);
        if let Some(key) = key {
            self.cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, Arc::clone(&plane));
        }
        Ok(plane)
    }
}

/// Lazy view over a [`VirtualArray`].
#[derive(Debug, Clone)]
pub struct LazyArray {
    source: Arc<VirtualArray>,
    /// One entry per source outer axis; `Some` once the axis is fixed.
    selection: Vec<Option<usize>>,
    spatial: Option<Arc<SpatialGather>>,
}

impl LazyArray {
    pub fn new(source: Arc<VirtualArray>) -> Self {
        let selection = vec![None; source.shape().len() - 1];
        Self {
            source,
            selection,
            spatial: None,
        }
    }

    /// Sizes of the outer axes still free.
    pub fn outer_shape(&self) -> Vec<usize> {
        self.selection
            .iter()
            .zip(self.source.shape())
            .filter(|(s, _)| s.is_none())
            .map(|(_, n)| *n)
            .collect()
    }

    /// Shape of one plane: `[samples]` or `[y, x]`.
    pub fn plane_shape(&self) -> Vec<usize> {
        match &self.spatial {
            Some(g) => vec![g.ny(), g.nx()],
            None => vec![self.source.npoints()],
        }
    }

    pub fn shape(&self) -> Vec<usize> {
        let mut shape = self.outer_shape();
        shape.extend(self.plane_shape());
        shape
    }

    /// Fix `index` along free outer axis `axis`, dropping the axis.
    pub fn isel(&self, axis: usize, index: usize) -> Result<LazyArray> {
        let slot = self
            .selection
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| i)
            .nth(axis)
            .ok_or_else(|| {
                GridProcessorError::schema(format!(
                    "{}: cannot select along spatial axis {}",
                    self.source.name(),
                    axis
                ))
            })?;
        let len = self.source.shape()[slot];
        if index >= len {
            return Err(GridProcessorError::schema(format!(
                "{}: index {} out of bounds for axis of length {}",
                self.source.name(),
                index,
                len
            )));
        }
        let mut view = self.clone();
        view.selection[slot] = Some(index);
        Ok(view)
    }

    /// Regrid the sample axis through `gather`.
    pub fn with_spatial(&self, gather: Arc<SpatialGather>) -> Result<LazyArray> {
        if self.spatial.is_some() {
            return Err(GridProcessorError::schema(format!(
                "{}: spatial axis already expanded",
                self.source.name()
            )));
        }
        if gather.npoints() != self.source.npoints() {
            return Err(GridProcessorError::schema(format!(
                "{}: {} samples, spatial index expects {}",
                self.source.name(),
                self.source.npoints(),
                gather.npoints()
            )));
        }
        let mut view = self.clone();
        view.spatial = Some(gather);
        Ok(view)
    }

    /// Read the plane at `outer`, an index over the free outer axes.
    pub fn read_plane(&self, outer: &[usize]) -> Result<Vec<f32>> {
        let free = self.outer_shape();
        if outer.len() != free.len() || outer.iter().zip(&free).any(|(i, n)| i >= n) {
            return Err(GridProcessorError::schema(format!(
                "{}: plane {:?} outside outer shape {:?}",
                self.source.name(),
                outer,
                free
            )));
        }
        let mut rest = outer.iter();
        let full: Vec<usize> = self
            .selection
            .iter()
            .map(|s| s.or_else(|| rest.next().copied()).unwrap_or(0))
            .collect();

        let plane = self.source.read_chunk(&full)?;
        Ok(match &self.spatial {
            Some(gather) => gather.apply(&plane, f32::NAN),
            None => plane.as_ref().clone(),
        })
    }

    /// Read every plane, in parallel.
    pub fn load(&self) -> Result<NdArray> {
        let planes = outer_indices(&self.outer_shape())
            .par_iter()
            .map(|outer| self.read_plane(outer))
            .collect::<Result<Vec<_>>>()?;
        NdArray::new(self.shape(), ArrayValues::Float32(planes.concat()))
    }
}

/// All indices of `shape` in row-major order. A scalar shape yields one
/// empty index.
pub fn outer_indices(shape: &[usize]) -> Vec<Vec<usize>> {
    let mut out = vec![Vec::new()];
    for &n in shape {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..n).map(move |i| {
                    let mut idx = prefix.clone();
                    idx.push(i);
                    idx
                })
            })
            .collect();
    }
    out
}
