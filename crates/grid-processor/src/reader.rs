//! Opening a normalized manifest as a [`Dataset`].
//!
//! Arrays compressed with the GRIB codec become lazy data variables; arrays
//! without a compressor are small coordinates decoded immediately from their
//! inline bytes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use grib_refs::{InlineValue, NormalizedManifest, Reference, GRIB_CODEC_ID};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::cache::{CacheStats, ChunkCache};
use crate::config::GridProcessorConfig;
use crate::dataset::{
    read_range, ArrayData, ArrayValues, ChunkSource, DType, Dataset, LazyArray, NdArray, Variable,
    VirtualArray,
};
use crate::error::{GridProcessorError, Result};

const DIMENSIONS_ATTR: &str = "_ARRAY_DIMENSIONS";

/// Opens manifests, sharing one decoded-chunk cache across them.
pub struct DatasetReader {
    cache: Arc<Mutex<ChunkCache>>,
}

impl Default for DatasetReader {
    fn default() -> Self {
        Self::new(&GridProcessorConfig::default())
    }
}

impl DatasetReader {
    pub fn new(config: &GridProcessorConfig) -> Self {
        Self {
            cache: Arc::new(Mutex::new(ChunkCache::new(config.chunk_cache_size_bytes()))),
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stats()
    }

    /// Open `manifest` without reading any referenced payload.
    pub fn open(&self, manifest: &NormalizedManifest) -> Result<Dataset> {
        let mut ds = Dataset::new();
        if let Some(Value::Object(attrs)) = manifest.attrs() {
            ds.attrs = attrs.clone();
        }

        for node in manifest.arrays() {
            let meta = ArrayMeta::parse(manifest, node)?;
            let attrs = meta.attrs.clone();
            let encoding = meta.encoding();

            let (data, is_payload) = match &meta.compressor {
                Some(id) if id == GRIB_CODEC_ID => (self.lazy(manifest, node, &meta)?, true),
                Some(id) => {
                    return Err(GridProcessorError::invalid_metadata(format!(
                        "{}: unsupported compressor '{}'",
                        node, id
                    )))
                }
                None => (eager(manifest, node, &meta)?, false),
            };

            let mut var = Variable::new(meta.dims, data)?.with_attrs(attrs);
            var.encoding = encoding;
            if is_payload {
                ds.data_vars.insert(node.to_string(), var);
            } else {
                ds.coords.insert(node.to_string(), var);
            }
        }

        let dims = ds.dims()?;
        info!(
            data_vars = ds.data_vars.len(),
            coords = ds.coords.len(),
            dims = ?dims,
            "Opened virtual dataset"
        );
        Ok(ds)
    }

    fn lazy(&self, manifest: &NormalizedManifest, node: &str, meta: &ArrayMeta) -> Result<ArrayData> {
        let Some((&npoints, outer)) = meta.shape.split_last() else {
            return Err(GridProcessorError::invalid_metadata(format!(
                "{}: payload arrays need at least one dimension",
                node
            )));
        };
        let expected: Vec<usize> = outer.iter().map(|_| 1).chain([npoints]).collect();
        if meta.chunks != expected {
            return Err(GridProcessorError::invalid_metadata(format!(
                "{}: chunks {:?} are not one message per chunk (expected {:?})",
                node, meta.chunks, expected
            )));
        }
        if meta.dtype != DType::Float32 {
            return Err(GridProcessorError::invalid_metadata(format!(
                "{}: decoded messages are float32, metadata says {:?}",
                node, meta.dtype
            )));
        }

        let mut chunks = HashMap::new();
        for (idx, reference) in manifest.chunks(node) {
            let Some((&last, outer_idx)) = idx.split_last() else {
                continue;
            };
            if last != 0 {
                return Err(GridProcessorError::invalid_metadata(format!(
                    "{}: sample axis chunk {} does not exist",
                    node, last
                )));
            }
            let source = match reference {
                Reference::Range {
                    file,
                    offset,
                    length,
                } => ChunkSource::Range {
                    file: file.clone(),
                    offset: *offset,
                    length: *length,
                },
                Reference::Inline(InlineValue::Bytes(b)) => ChunkSource::Inline(Arc::new(b.clone())),
                Reference::Inline(InlineValue::Json(_)) => {
                    return Err(GridProcessorError::invalid_metadata(format!(
                        "{}: chunk {:?} holds JSON, not a message",
                        node, idx
                    )))
                }
            };
            let outer_idx = outer_idx
                .iter()
                .map(|i| usize::try_from(*i))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| GridProcessorError::invalid_metadata(e.to_string()))?;
            chunks.insert(outer_idx, source);
        }
        debug!(array = node, shape = ?meta.shape, chunks = chunks.len(), "Lazy array");

        let source = VirtualArray::new(
            node,
            meta.shape.clone(),
            meta.fill_value,
            chunks,
            Arc::clone(&self.cache),
        )?;
        Ok(ArrayData::Lazy(LazyArray::new(Arc::new(source))))
    }
}

/// Open `manifest` with the default configuration.
pub fn open(manifest: &NormalizedManifest) -> Result<Dataset> {
    DatasetReader::default().open(manifest)
}

fn eager(manifest: &NormalizedManifest, node: &str, meta: &ArrayMeta) -> Result<ArrayData> {
    if meta.chunks != meta.shape {
        return Err(GridProcessorError::invalid_metadata(format!(
            "{}: uncompressed arrays must be a single chunk",
            node
        )));
    }
    let mut references = manifest.chunks(node);
    let bytes = match references.next().map(|(_, r)| r) {
        Some(Reference::Inline(InlineValue::Bytes(b))) => b.clone(),
        Some(Reference::Range {
            file,
            offset,
            length,
        }) => read_range(file, *offset, *length)?,
        Some(Reference::Inline(InlineValue::Json(_))) | None => {
            return Err(GridProcessorError::invalid_metadata(format!(
                "{}: no inline data",
                node
            )))
        }
    };
    let values = ArrayValues::from_le_bytes(meta.dtype, &bytes)?;
    Ok(ArrayData::Eager(NdArray::new(meta.shape.clone(), values)?))
}

/// The parts of `.zarray` and `.zattrs` the reader understands.
struct ArrayMeta {
    shape: Vec<usize>,
    chunks: Vec<usize>,
    dtype: DType,
    dtype_name: String,
    fill_value: f32,
    compressor: Option<String>,
    dims: Vec<String>,
    attrs: Map<String, Value>,
}

impl ArrayMeta {
    fn parse(manifest: &NormalizedManifest, node: &str) -> Result<Self> {
        let invalid = |what: &str| GridProcessorError::invalid_metadata(format!("{}: {}", node, what));

        let meta = manifest.array_meta(node).ok_or_else(|| invalid("missing .zarray"))?;
        let shape = usize_list(meta.get("shape")).ok_or_else(|| invalid("bad shape"))?;
        let chunks = usize_list(meta.get("chunks")).ok_or_else(|| invalid("bad chunks"))?;
        let dtype_name = meta
            .get("dtype")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid("missing dtype"))?
            .to_string();
        let dtype = DType::from_zarr_v2(&dtype_name)
            .ok_or_else(|| invalid(&format!("unsupported dtype {}", dtype_name)))?;
        if meta.get("filters").is_some_and(|f| !f.is_null()) {
            return Err(invalid("filters are not supported"));
        }
        let compressor = match meta.get("compressor") {
            None | Some(Value::Null) => None,
            Some(c) => Some(
                c.get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| invalid("compressor without id"))?
                    .to_string(),
            ),
        };
        let fill_value = match meta.get("fill_value") {
            Some(Value::String(s)) if s == "NaN" => f32::NAN,
            Some(Value::Number(n)) => n.as_f64().map(|v| v as f32).unwrap_or(f32::NAN),
            _ => f32::NAN,
        };

        let mut attrs = match manifest.array_attrs(node) {
            Some(Value::Object(a)) => a.clone(),
            _ => Map::new(),
        };
        let dims = attrs
            .remove(DIMENSIONS_ATTR)
            .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
            .ok_or_else(|| invalid("missing _ARRAY_DIMENSIONS"))?;
        if dims.len() != shape.len() || chunks.len() != shape.len() {
            return Err(invalid("rank of dimensions, shape and chunks differ"));
        }

        Ok(Self {
            shape,
            chunks,
            dtype,
            dtype_name,
            fill_value,
            compressor,
            dims,
            attrs,
        })
    }

    fn encoding(&self) -> Map<String, Value> {
        let mut encoding = Map::new();
        encoding.insert("dtype".to_string(), json!(self.dtype_name));
        encoding.insert("chunks".to_string(), json!(self.chunks));
        encoding.insert("compressor".to_string(), json!(self.compressor));
        encoding.insert("fill_value".to_string(), json!(self.fill_value.is_nan().then_some("NaN")));
        encoding
    }
}

fn usize_list(value: Option<&Value>) -> Option<Vec<usize>> {
    value?
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|n| usize::try_from(n).ok()))
        .collect()
}
