//! Labeled datasets with eager coordinates and lazy payloads.

mod array;
mod lazy;

use std::collections::BTreeMap;

use serde_json::{Map, Value};

pub use array::{ArrayValues, DType, NdArray, SpatialGather};
pub use lazy::{outer_indices, read_range, ChunkSource, LazyArray, VirtualArray};

use crate::error::{GridProcessorError, Result};

/// Variable payload.
#[derive(Debug, Clone)]
pub enum ArrayData {
    Eager(NdArray),
    Lazy(LazyArray),
}

impl ArrayData {
    pub fn shape(&self) -> Vec<usize> {
        match self {
            ArrayData::Eager(a) => a.shape().to_vec(),
            ArrayData::Lazy(l) => l.shape(),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::Eager(a) => a.dtype(),
            ArrayData::Lazy(_) => DType::Float32,
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, ArrayData::Lazy(_))
    }

    /// Materialize the values, reading referenced messages if needed.
    pub fn load(&self) -> Result<NdArray> {
        match self {
            ArrayData::Eager(a) => Ok(a.clone()),
            ArrayData::Lazy(l) => l.load(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub dims: Vec<String>,
    pub data: ArrayData,
    pub attrs: Map<String, Value>,
    /// Storage details inherited from the source the variable was read from.
    pub encoding: Map<String, Value>,
    /// Requested output chunking, one entry per dimension.
    pub chunks: Option<Vec<usize>>,
}

impl Variable {
    pub fn new(dims: Vec<String>, data: ArrayData) -> Result<Self> {
        let shape = data.shape();
        if dims.len() != shape.len() {
            return Err(GridProcessorError::schema(format!(
                "dimensions {:?} do not match shape {:?}",
                dims, shape
            )));
        }
        Ok(Self {
            dims,
            data,
            attrs: Map::new(),
            encoding: Map::new(),
            chunks: None,
        })
    }

    pub fn eager(dims: &[&str], array: NdArray) -> Result<Self> {
        Self::new(dims.iter().map(|d| d.to_string()).collect(), ArrayData::Eager(array))
    }

    pub fn with_attrs(mut self, attrs: Map<String, Value>) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn shape(&self) -> Vec<usize> {
        self.data.shape()
    }

    pub fn axis(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.axis(dim).is_some()
    }

    /// Select one index along `dim` and drop the dimension.
    pub fn isel(&self, dim: &str, index: usize) -> Result<Variable> {
        let axis = self
            .axis(dim)
            .ok_or_else(|| GridProcessorError::schema(format!("no dimension '{}'", dim)))?;
        let data = match &self.data {
            ArrayData::Eager(a) => ArrayData::Eager(a.isel(axis, index)?),
            ArrayData::Lazy(l) => ArrayData::Lazy(l.isel(axis, index)?),
        };
        let mut out = self.clone();
        out.data = data;
        out.dims.remove(axis);
        if let Some(chunks) = out.chunks.as_mut() {
            if axis < chunks.len() {
                chunks.remove(axis);
            }
        }
        Ok(out)
    }

    pub fn rename_dim(&mut self, from: &str, to: &str) {
        for d in self.dims.iter_mut().filter(|d| *d == from) {
            *d = to.to_string();
        }
    }
}

/// A set of named variables sharing dimensions.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub coords: BTreeMap<String, Variable>,
    pub data_vars: BTreeMap<String, Variable>,
    pub attrs: Map<String, Value>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Coordinates followed by data variables.
    pub fn variables(&self) -> impl Iterator<Item = (&String, &Variable)> {
        self.coords.iter().chain(self.data_vars.iter())
    }

    pub fn variables_mut(&mut self) -> impl Iterator<Item = (&String, &mut Variable)> {
        self.coords.iter_mut().chain(self.data_vars.iter_mut())
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.coords.get(name).or_else(|| self.data_vars.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Dimension sizes, checked for consistency across variables.
    pub fn dims(&self) -> Result<BTreeMap<String, usize>> {
        let mut dims = BTreeMap::new();
        for (name, var) in self.variables() {
            for (dim, len) in var.dims.iter().zip(var.shape()) {
                match dims.get(dim) {
                    Some(existing) if *existing != len => {
                        return Err(GridProcessorError::schema(format!(
                            "variable '{}' has {} = {}, elsewhere {}",
                            name, dim, len, existing
                        )));
                    }
                    Some(_) => {}
                    None => {
                        dims.insert(dim.clone(), len);
                    }
                }
            }
        }
        Ok(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(dim: &str, values: Vec<f64>) -> Variable {
        let n = values.len();
        Variable::eager(&[dim], NdArray::new(vec![n], ArrayValues::Float64(values)).unwrap()).unwrap()
    }

    #[test]
    fn test_dims_are_checked() {
        let mut ds = Dataset::new();
        ds.coords.insert("time".into(), coord("time", vec![0.0, 1.0]));
        ds.data_vars.insert(
            "t".into(),
            Variable::eager(
                &["time", "value"],
                NdArray::new(vec![2, 3], ArrayValues::Float32(vec![0.0; 6])).unwrap(),
            )
            .unwrap(),
        );
        let dims = ds.dims().unwrap();
        assert_eq!(dims["time"], 2);
        assert_eq!(dims["value"], 3);

        ds.coords.insert("value".into(), coord("value", vec![0.0; 4]));
        assert!(matches!(ds.dims(), Err(GridProcessorError::Schema(_))));
    }

    #[test]
    fn test_dims_must_match_rank() {
        let array = NdArray::new(vec![2], ArrayValues::Int64(vec![0, 1])).unwrap();
        assert!(Variable::eager(&["time", "value"], array).is_err());
    }

    #[test]
    fn test_isel_drops_dim_and_chunk() {
        let mut var = Variable::eager(
            &["time", "y", "x"],
            NdArray::new(vec![2, 1, 2], ArrayValues::Float32(vec![1.0, 2.0, 3.0, 4.0])).unwrap(),
        )
        .unwrap();
        var.chunks = Some(vec![1, 512, 512]);

        let first = var.isel("time", 1).unwrap();
        assert_eq!(first.dims, vec!["y", "x"]);
        assert_eq!(first.chunks, Some(vec![512, 512]));
        assert_eq!(first.data.load().unwrap().to_f64_vec(), vec![3.0, 4.0]);
        assert!(var.isel("level", 0).is_err());
    }
}
