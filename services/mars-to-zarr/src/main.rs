//! GRIB2 to Zarr converter.
//!
//! Reads dataset descriptions from a YAML file and converts each dataset's
//! local GRIB2 archive into a Zarr store, one dataset after another.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use grib_index::{FingerprintMethod, IndexStore};
use grid_processor::GridProcessorConfig;
use ingestion::{load_config, Pipeline};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const CREDENTIALS_FILE: &str = "~/.ecmwfapirc";

#[derive(Parser, Debug)]
#[command(name = "mars-to-zarr")]
#[command(about = "Convert GRIB2 archives into Zarr stores")]
struct Args {
    /// Dataset description file
    #[arg(short, long, default_value = "example.globalDT.yaml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Delete each dataset's zarr and refs directories and file index first.
    /// The grib directory is kept, since archives are not retrieved here.
    #[arg(long)]
    clear_cache: bool,

    /// Directory for persisted file indices
    #[arg(long, env = "GRIB_INDEX_DIR")]
    index_dir: Option<PathBuf>,

    /// How archives are fingerprinted for index reuse (size_mtime, crc32)
    #[arg(long, default_value = "size_mtime")]
    fingerprint: FingerprintMethod,
}

fn main() -> ExitCode {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.verbose);

    let credentials = PathBuf::from(shellexpand::tilde(CREDENTIALS_FILE).as_ref());
    if !credentials.is_file() {
        error!(
            path = %credentials.display(),
            "Missing ECMWF API credentials; create {} with your API key",
            CREDENTIALS_FILE
        );
        return ExitCode::from(1);
    }

    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Run aborted");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(true).init();
}

/// Returns whether every dataset succeeded.
fn run(args: &Args) -> Result<bool> {
    let datasets = load_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(
        config = %args.config.display(),
        datasets = ?datasets.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(),
        "Loaded configuration"
    );

    let config = GridProcessorConfig::from_env();
    config.validate().map_err(|e| anyhow!("invalid writer configuration: {}", e))?;

    let pipeline = Pipeline::new(index_store(args), config);
    let summary = pipeline.run_all(&datasets, args.clear_cache);

    for failure in &summary.failed {
        error!(dataset = %failure.name, kind = %failure.kind, "{}", failure.message);
    }
    Ok(summary.is_success())
}

fn index_store(args: &Args) -> IndexStore {
    let dir = match &args.index_dir {
        Some(dir) => expand(dir),
        None => IndexStore::default_dir(),
    };
    let store = IndexStore::new(dir, args.fingerprint);
    info!(
        dir = %store.dir().display(),
        method = store.method().as_str(),
        "Index store"
    );
    store
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults_and_flags() {
        let args = Args::try_parse_from(["mars-to-zarr"]).unwrap();
        assert_eq!(args.config, PathBuf::from("example.globalDT.yaml"));
        assert!(!args.verbose);
        assert!(!args.clear_cache);
        assert_eq!(args.fingerprint, FingerprintMethod::SizeMtime);

        let args = Args::try_parse_from([
            "mars-to-zarr",
            "--config",
            "sets.yaml",
            "-v",
            "--clear-cache",
            "--fingerprint",
            "crc32",
        ])
        .unwrap();
        assert_eq!(args.config, PathBuf::from("sets.yaml"));
        assert!(args.verbose);
        assert!(args.clear_cache);
        assert_eq!(args.fingerprint, FingerprintMethod::Crc32);
    }

    #[test]
    fn test_clear_cache_help_mentions_kept_grib() {
        let help = Args::command().render_long_help().to_string();
        assert!(help.contains("grib directory is kept"));
    }

    #[test]
    fn test_index_store_honours_index_dir() {
        let dir = tempfile::tempdir().unwrap();
        let args = Args::try_parse_from([
            "mars-to-zarr",
            "--index-dir",
            dir.path().to_str().unwrap(),
            "--fingerprint",
            "crc32",
        ])
        .unwrap();
        let store = index_store(&args);
        assert_eq!(store.dir(), dir.path());
        assert_eq!(store.method(), FingerprintMethod::Crc32);
    }
}
