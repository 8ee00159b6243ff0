//! Configuration loading for CLI commands

use crate::cli::Cli;
use anyhow::{Context, Result};
use landcube_core::config::{CliConfigOverrides, LayeredConfig};
use std::path::{Path, PathBuf};

/// Default location of the configuration file, relative to the working directory
pub fn default_config_path() -> PathBuf {
    Path::new(".landcube").join("config.toml")
}

/// Defaults, then the config file, then `LANDCUBE_*` variables, then flags
pub fn load_config(cli: &Cli) -> Result<LayeredConfig> {
    let config = match &cli.config {
        // An explicitly named file has to exist
        Some(path) => LayeredConfig::with_defaults()
            .load_from_file(path)
            .with_context(|| format!("Failed to load configuration file {}", path.display()))?,
        None => LayeredConfig::with_defaults()
            .load_from_file_if_exists(default_config_path())
            .context("Failed to load configuration file")?,
    };

    let mut config = config.load_from_env();
    config.update_from_cli(overrides(cli));
    Ok(config)
}

fn overrides(cli: &Cli) -> CliConfigOverrides {
    CliConfigOverrides {
        workers: cli.workers,
        tile_memory_mb: cli.tile_memory_mb,
        store: cli.store.map(Into::into),
        data_dir: cli.data_dir.clone(),
        ..Default::default()
    }
}
