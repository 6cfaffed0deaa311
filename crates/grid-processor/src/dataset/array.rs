//! In-memory n-dimensional arrays.

use crate::error::{GridProcessorError, Result};

/// Element type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Float32,
    Float64,
    Int64,
}

impl DType {
    /// Parse a little-endian Zarr v2 dtype string.
    pub fn from_zarr_v2(dtype: &str) -> Option<Self> {
        match dtype {
            "<f4" => Some(DType::Float32),
            "<f8" => Some(DType::Float64),
            "<i8" => Some(DType::Int64),
            _ => None,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            DType::Float32 => 4,
            DType::Int64 | DType::Float64 => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArrayValues {
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Int64(Vec<i64>),
}

impl ArrayValues {
    /// Decode little-endian bytes.
    pub fn from_le_bytes(dtype: DType, bytes: &[u8]) -> Result<Self> {
        if bytes.len() % dtype.size() != 0 {
            return Err(GridProcessorError::invalid_metadata(format!(
                "{} bytes is not a whole number of {:?} elements",
                bytes.len(),
                dtype
            )));
        }
        let words = bytes.chunks_exact(dtype.size());
        Ok(match dtype {
            DType::Float32 => ArrayValues::Float32(
                words
                    .map(|w| f32::from_le_bytes([w[0], w[1], w[2], w[3]]))
                    .collect(),
            ),
            DType::Float64 => ArrayValues::Float64(
                words
                    .map(|w| f64::from_le_bytes([w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7]]))
                    .collect(),
            ),
            DType::Int64 => ArrayValues::Int64(
                words
                    .map(|w| i64::from_le_bytes([w[0], w[1], w[2], w[3], w[4], w[5], w[6], w[7]]))
                    .collect(),
            ),
        })
    }

    pub fn len(&self) -> usize {
        match self {
            ArrayValues::Float32(v) => v.len(),
            ArrayValues::Float64(v) => v.len(),
            ArrayValues::Int64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            ArrayValues::Float32(_) => DType::Float32,
            ArrayValues::Float64(_) => DType::Float64,
            ArrayValues::Int64(_) => DType::Int64,
        }
    }
}

/// A dense, row-major array.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    values: ArrayValues,
}

impl NdArray {
    pub fn new(shape: Vec<usize>, values: ArrayValues) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(GridProcessorError::invalid_metadata(format!(
                "{} values do not fill shape {:?}",
                values.len(),
                shape
            )));
        }
        Ok(Self { shape, values })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &ArrayValues {
        &self.values
    }

    pub fn dtype(&self) -> DType {
        self.values.dtype()
    }

    /// All elements widened to `f64`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.values {
            ArrayValues::Float32(v) => v.iter().map(|x| f64::from(*x)).collect(),
            ArrayValues::Float64(v) => v.clone(),
            ArrayValues::Int64(v) => v.iter().map(|x| *x as f64).collect(),
        }
    }

    /// Select one index along `axis`, dropping that axis.
    pub fn isel(&self, axis: usize, index: usize) -> Result<NdArray> {
        let n = *self.shape.get(axis).ok_or_else(|| {
            GridProcessorError::schema(format!("axis {} out of range for shape {:?}", axis, self.shape))
        })?;
        if index >= n {
            return Err(GridProcessorError::schema(format!(
                "index {} out of bounds for axis {} of length {}",
                index, axis, n
            )));
        }
        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();

        let values = match &self.values {
            ArrayValues::Float32(v) => ArrayValues::Float32(select(v, outer, n, inner, index)),
            ArrayValues::Float64(v) => ArrayValues::Float64(select(v, outer, n, inner, index)),
            ArrayValues::Int64(v) => ArrayValues::Int64(select(v, outer, n, inner, index)),
        };
        let mut shape = self.shape.clone();
        shape.remove(axis);
        NdArray::new(shape, values)
    }

    /// Expand the last axis into `(y, x)` through a spatial gather.
    pub fn gather_last(&self, gather: &SpatialGather) -> Result<NdArray> {
        let Some((&npoints, rest)) = self.shape.split_last() else {
            return Err(GridProcessorError::schema("cannot expand a scalar"));
        };
        if npoints != gather.npoints() {
            return Err(GridProcessorError::schema(format!(
                "last axis has {} samples, spatial index expects {}",
                npoints,
                gather.npoints()
            )));
        }
        let values = match &self.values {
            ArrayValues::Float32(v) => ArrayValues::Float32(
                v.chunks(npoints.max(1))
                    .flat_map(|plane| gather.apply(plane, f32::NAN))
                    .collect(),
            ),
            ArrayValues::Float64(v) => ArrayValues::Float64(
                v.chunks(npoints.max(1))
                    .flat_map(|plane| gather.apply(plane, f64::NAN))
                    .collect(),
            ),
            ArrayValues::Int64(_) => {
                return Err(GridProcessorError::schema(
                    "integer arrays cannot be expanded onto a sparse grid",
                ))
            }
        };
        let mut shape = rest.to_vec();
        shape.extend([gather.ny(), gather.nx()]);
        NdArray::new(shape, values)
    }

    /// Apply `f` to every element of a floating-point array.
    pub fn map_float(&self, f: impl Fn(f64) -> f64) -> Result<NdArray> {
        let values = match &self.values {
            ArrayValues::Float32(v) => ArrayValues::Float32(v.iter().map(|x| f(f64::from(*x)) as f32).collect()),
            ArrayValues::Float64(v) => ArrayValues::Float64(v.iter().map(|x| f(*x)).collect()),
            ArrayValues::Int64(_) => {
                return Err(GridProcessorError::schema("expected a floating-point array"))
            }
        };
        NdArray::new(self.shape.clone(), values)
    }
}

fn select<T: Copy>(values: &[T], outer: usize, n: usize, inner: usize, index: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(outer * inner);
    for o in 0..outer {
        let start = (o * n + index) * inner;
        out.extend_from_slice(&values[start..start + inner]);
    }
    out
}

/// Mapping from a regular `(y, x)` grid cell to a flattened sample index.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialGather {
    ny: usize,
    nx: usize,
    npoints: usize,
    /// Row-major over `(y, x)`; `None` where no sample exists.
    index: Vec<Option<usize>>,
}

impl SpatialGather {
    pub fn new(ny: usize, nx: usize, npoints: usize, index: Vec<Option<usize>>) -> Result<Self> {
        if index.len() != ny * nx {
            return Err(GridProcessorError::schema(format!(
                "spatial index has {} cells, expected {}x{}",
                index.len(),
                ny,
                nx
            )));
        }
        if index.iter().flatten().any(|i| *i >= npoints) {
            return Err(GridProcessorError::schema("spatial index refers past the last sample"));
        }
        Ok(Self {
            ny,
            nx,
            npoints,
            index,
        })
    }

    pub fn ny(&self) -> usize {
        self.ny
    }

    pub fn nx(&self) -> usize {
        self.nx
    }

    pub fn npoints(&self) -> usize {
        self.npoints
    }

    /// Rearrange one flattened plane onto the grid.
    pub fn apply<T: Copy>(&self, plane: &[T], missing: T) -> Vec<T> {
        self.index
            .iter()
            .map(|i| i.and_then(|i| plane.get(i).copied()).unwrap_or(missing))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(shape: Vec<usize>) -> NdArray {
        let n: usize = shape.iter().product();
        NdArray::new(shape, ArrayValues::Float64((0..n).map(|i| i as f64).collect())).unwrap()
    }

    #[test]
    fn test_shape_must_match_values() {
        assert!(NdArray::new(vec![2, 3], ArrayValues::Int64(vec![0; 5])).is_err());
    }

    #[test]
    fn test_isel_middle_axis() {
        let a = grid(vec![2, 3, 2]);
        let b = a.isel(1, 2).unwrap();
        assert_eq!(b.shape(), &[2, 2]);
        assert_eq!(b.to_f64_vec(), vec![4.0, 5.0, 10.0, 11.0]);

        assert!(a.isel(1, 3).is_err());
        assert!(a.isel(3, 0).is_err());
    }

    #[test]
    fn test_gather_last_fills_holes() {
        let a = grid(vec![2, 3]);
        let gather = SpatialGather::new(2, 2, 3, vec![Some(2), None, Some(0), Some(1)]).unwrap();
        let b = a.gather_last(&gather).unwrap();

        assert_eq!(b.shape(), &[2, 2, 2]);
        let v = b.to_f64_vec();
        assert_eq!(v[0], 2.0);
        assert!(v[1].is_nan());
        assert_eq!(&v[2..4], &[0.0, 1.0]);
        assert_eq!(v[4], 5.0);
    }

    #[test]
    fn test_le_bytes() {
        let bytes: Vec<u8> = [1.5f64, -2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(
            ArrayValues::from_le_bytes(DType::Float64, &bytes).unwrap(),
            ArrayValues::Float64(vec![1.5, -2.0])
        );
        assert!(ArrayValues::from_le_bytes(DType::Int64, &bytes[..5]).is_err());
    }
}
