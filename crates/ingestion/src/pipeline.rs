//! The per-dataset pipeline and the multi-dataset loop.

use std::path::{Path, PathBuf};

use grib_index::IndexStore;
use grib_refs::{build, flatten};
use grid_processor::{normalize, DatasetReader, GridProcessorConfig, ZarrWriter};
use tracing::{error, info, instrument, warn};

use crate::config::{DatasetConfig, NamedDataset};
use crate::error::{ErrorKind, IngestionError, Result};

/// Outcome of one successful dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetReport {
    pub name: String,
    pub messages: usize,
    pub data_vars: Vec<String>,
    pub manifest_path: PathBuf,
    pub output_path: PathBuf,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFailure {
    pub name: String,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: Vec<DatasetReport>,
    pub failed: Vec<DatasetFailure>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs datasets one after another against a shared index store.
pub struct Pipeline {
    index_store: IndexStore,
    config: GridProcessorConfig,
    writer: ZarrWriter,
}

impl Pipeline {
    pub fn new(index_store: IndexStore, config: GridProcessorConfig) -> Self {
        let writer = ZarrWriter::new(config.clone());
        Self {
            index_store,
            config,
            writer,
        }
    }

    pub fn index_store(&self) -> &IndexStore {
        &self.index_store
    }

    /// index, build, flatten, save manifest, open, normalize, write.
    #[instrument(skip(self, dataset), fields(model = %dataset.general.model))]
    pub fn run_dataset(&self, name: &str, dataset: &DatasetConfig) -> Result<DatasetReport> {
        let general = &dataset.general;
        let level_type = general.level_type()?;

        let grib = general.grib_path();
        if !grib.is_file() {
            return Err(IngestionError::MissingSource(grib));
        }

        let index = self.index_store.get_or_build(&grib)?;
        let messages = index.len();
        let mapping = general.policy.mapping();
        let manifest = build(&[index], mapping.as_ref())?;
        let flat = flatten(&manifest, level_type)?;

        let manifest_path = general.refs_path(level_type);
        flat.save(&manifest_path)?;
        info!(path = %manifest_path.display(), refs = flat.len(), "Saved references");

        let reader = DatasetReader::new(&self.config);
        let ds = normalize(reader.open(&flat)?, level_type)?;
        let data_vars: Vec<String> = ds.data_vars.keys().cloned().collect();

        let output_path = general.output_path();
        let summary = self.writer.write(&ds, &output_path)?;
        let cache = reader.cache_stats();
        info!(
            output = %output_path.display(),
            arrays = summary.arrays,
            cache_hit_rate = cache.hit_rate(),
            "Dataset written"
        );

        Ok(DatasetReport {
            name: name.to_string(),
            messages,
            data_vars,
            manifest_path,
            output_path,
            bytes_written: summary.bytes_written,
        })
    }

    /// Process every dataset in order. A failure is logged and recorded;
    /// the remaining datasets still run.
    pub fn run_all(&self, datasets: &[NamedDataset], clear_cache: bool) -> RunSummary {
        let mut summary = RunSummary::default();
        for (name, dataset) in datasets {
            info!(dataset = %name, "Working on dataset");

            let result = if clear_cache {
                self.clear_cache(dataset)
                    .and_then(|()| self.run_dataset(name, dataset))
            } else {
                self.run_dataset(name, dataset)
            };

            match result {
                Ok(report) => summary.succeeded.push(report),
                Err(e) => {
                    let kind = e.kind();
                    error!(dataset = %name, kind = %kind, error = %e, "Dataset failed");
                    summary.failed.push(DatasetFailure {
                        name: name.clone(),
                        kind,
                        message: e.to_string(),
                    });
                }
            }
        }
        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            "Run finished"
        );
        summary
    }

    /// Remove the dataset's output store, references and file index.
    /// The source archive is kept.
    pub fn clear_cache(&self, dataset: &DatasetConfig) -> Result<()> {
        let general = &dataset.general;
        for dir in [general.zarr_dir(), general.refs_dir()] {
            remove_dir(&dir)?;
        }
        if self.index_store.remove(&general.grib_path())? {
            info!(grib = %general.grib_path().display(), "Cleared file index");
        }
        Ok(())
    }
}

fn remove_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => {
            info!(path = %dir.display(), "Deleted cache");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "Failed to delete cache");
            Err(IngestionError::io(dir, e))
        }
    }
}
