//! Dataset descriptions loaded from YAML.
//!
//! ```yaml
//! globalDT_surface:
//!   general:
//!     data_root: ~/data/mars
//!     model: globalDT
//!     level_type: surface
//!     grib_fn: an_sfc.grib
//!   mars_request:
//!     class: od
//!     param: 2t/10u/10v/z/lsm
//! ```

use std::path::{Path, PathBuf};

use grib_refs::{LevelType, MappingKind};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::error::{IngestionError, Result};

pub const DEFAULT_ZARR_FN: &str = "output.zarr";

/// The `general` section of a dataset description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub data_root: PathBuf,
    pub model: String,
    /// `surface` or `pressure_level`; validated when the dataset runs.
    pub level_type: String,
    pub grib_fn: String,
    #[serde(default)]
    pub zarr_fn: Option<String>,
    #[serde(default)]
    pub policy: MappingKind,
}

impl GeneralConfig {
    pub fn level_type(&self) -> Result<LevelType> {
        Ok(self.level_type.parse::<LevelType>()?)
    }

    pub fn model_root(&self) -> PathBuf {
        self.data_root.join(&self.model)
    }

    pub fn grib_dir(&self) -> PathBuf {
        self.model_root().join("grib")
    }

    pub fn zarr_dir(&self) -> PathBuf {
        self.model_root().join("zarr")
    }

    pub fn refs_dir(&self) -> PathBuf {
        self.model_root().join("refs")
    }

    pub fn grib_path(&self) -> PathBuf {
        self.grib_dir().join(&self.grib_fn)
    }

    pub fn output_path(&self) -> PathBuf {
        self.zarr_dir()
            .join(self.zarr_fn.as_deref().unwrap_or(DEFAULT_ZARR_FN))
    }

    /// `refs/<grib stem>/<level_type>.json`
    pub fn refs_path(&self, level_type: LevelType) -> PathBuf {
        let stem = Path::new(&self.grib_fn)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.grib_fn.clone());
        self.refs_dir()
            .join(stem)
            .join(format!("{}.json", level_type.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub general: GeneralConfig,
    /// Retrieval request, passed through untouched.
    #[serde(default)]
    pub mars_request: Option<Value>,
}

/// A named dataset, in file order.
pub type NamedDataset = (String, DatasetConfig);

/// Parse a configuration document of `name -> dataset` entries.
pub fn parse_config(text: &str) -> Result<Vec<NamedDataset>> {
    let root: Value = serde_yaml::from_str(text)?;
    let mapping = match root {
        Value::Mapping(m) => m,
        Value::Null => return Ok(Vec::new()),
        _ => {
            return Err(IngestionError::InvalidConfig(
                "top level must map dataset names to descriptions".to_string(),
            ))
        }
    };

    let mut datasets = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let name = key
            .as_str()
            .ok_or_else(|| IngestionError::InvalidConfig(format!("dataset name {:?} is not a string", key)))?
            .to_string();
        let mut dataset: DatasetConfig = serde_yaml::from_value(value)
            .map_err(|e| IngestionError::InvalidConfig(format!("{}: {}", name, e)))?;
        dataset.general.data_root = expand_home(&dataset.general.data_root);
        datasets.push((name, dataset));
    }
    Ok(datasets)
}

pub fn load_config(path: &Path) -> Result<Vec<NamedDataset>> {
    let text = std::fs::read_to_string(path).map_err(|source| IngestionError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text)
}

fn expand_home(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(&text).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
zeta:
  general:
    data_root: /data/mars
    model: globalDT
    level_type: pressure_level
    grib_fn: an_pl.grib
    zarr_fn: pl.zarr
    policy: gfs
  mars_request:
    levelist: 300/500/700
alpha:
  general:
    data_root: ~/mars
    model: globalDT
    level_type: surface
    grib_fn: an_sfc.grib
"#;

    #[test]
    fn test_order_is_preserved() {
        let datasets = parse_config(CONFIG).unwrap();
        let names: Vec<&str> = datasets.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_derived_paths() {
        let datasets = parse_config(CONFIG).unwrap();
        let pl = &datasets[0].1.general;

        assert_eq!(pl.policy, MappingKind::Gfs);
        assert_eq!(pl.grib_path(), PathBuf::from("/data/mars/globalDT/grib/an_pl.grib"));
        assert_eq!(pl.output_path(), PathBuf::from("/data/mars/globalDT/zarr/pl.zarr"));
        assert_eq!(
            pl.refs_path(pl.level_type().unwrap()),
            PathBuf::from("/data/mars/globalDT/refs/an_pl/pressure_level.json")
        );
        assert!(datasets[0].1.mars_request.is_some());

        let sfc = &datasets[1].1.general;
        assert_eq!(sfc.policy, MappingKind::Ifs);
        assert!(sfc.output_path().ends_with("globalDT/zarr/output.zarr"));
        assert!(!sfc.data_root.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_unknown_level_type_is_schema_error() {
        let mut datasets = parse_config(CONFIG).unwrap();
        let general = &mut datasets[1].1.general;
        general.level_type = "model_level".to_string();
        let err = general.level_type().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Schema);
    }

    #[test]
    fn test_rejects_malformed_documents() {
        assert!(parse_config("- a\n- b\n").is_err());
        assert!(parse_config("x:\n  general:\n    model: m\n").is_err());
        assert!(parse_config("").unwrap().is_empty());
    }
}
