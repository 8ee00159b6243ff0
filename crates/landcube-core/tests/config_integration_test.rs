//! Integration tests for layered configuration
//!
//! These tests verify that configuration loading follows the correct precedence:
//! CLI arguments > Environment variables > Config file > Defaults

use landcube_core::config::{CliConfigOverrides, ConfigSource, LayeredConfig, StoreKind};
use landcube_core::models::Statistic;
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::PathBuf;
use tempfile::{NamedTempFile, TempDir};

const VARS: [&str; 8] = [
    "LANDCUBE_WORKERS",
    "LANDCUBE_TILE_MEMORY_MB",
    "LANDCUBE_STATISTICS",
    "LANDCUBE_BACKGROUND",
    "LANDCUBE_STORE",
    "LANDCUBE_DATA_DIR",
    "LANDCUBE_DATABASE_URL",
    "DATABASE_URL",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
fn test_partial_file_configuration() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
tile_memory_mb = 128
# Only override the memory budget, leave others as defaults
"#
    )
    .unwrap();

    let config = LayeredConfig::with_defaults().load_from_file(file.path()).unwrap();

    assert_eq!(config.tile_memory_mb.value, 128);
    assert_eq!(config.tile_memory_mb.source, ConfigSource::File);
    assert_eq!(config.tile_memory_bytes(), 128 * 1024 * 1024);
    assert_eq!(config.store.source, ConfigSource::Default);
    assert_eq!(config.statistics.source, ConfigSource::Default);
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    clear_env();
    env::set_var("LANDCUBE_WORKERS", "6");
    env::set_var("LANDCUBE_STATISTICS", "median,count");
    env::set_var("LANDCUBE_STORE", "memory");

    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
workers = 2
statistics = ["mean"]
store = "postgres"
"#
    )
    .unwrap();

    let config = LayeredConfig::with_defaults()
        .load_from_file(file.path())
        .unwrap()
        .load_from_env();

    assert_eq!(config.workers.value, 6);
    assert_eq!(config.workers.source, ConfigSource::Environment);
    assert_eq!(config.statistics.value, vec![Statistic::Median, Statistic::Count]);
    assert_eq!(config.store.value, StoreKind::Memory);

    clear_env();
}

#[test]
#[serial]
fn test_invalid_environment_values_are_ignored() {
    clear_env();
    env::set_var("LANDCUBE_WORKERS", "zero");
    env::set_var("LANDCUBE_STORE", "sqlite");
    env::set_var("LANDCUBE_STATISTICS", "kurtosis");

    let config = LayeredConfig::with_defaults().load_from_env();

    assert_eq!(config.workers.source, ConfigSource::Default);
    assert_eq!(config.store.value, StoreKind::Fs);
    assert_eq!(config.statistics.source, ConfigSource::Default);

    clear_env();
}

#[test]
#[serial]
fn test_cli_overrides_all() {
    clear_env();
    env::set_var("LANDCUBE_DATA_DIR", "/env/cube");
    env::set_var("DATABASE_URL", "postgres://localhost/env");

    let mut config = LayeredConfig::with_defaults().load_from_env();
    assert_eq!(config.database_url.value.as_deref(), Some("postgres://localhost/env"));

    config.update_from_cli(CliConfigOverrides {
        data_dir: Some(PathBuf::from("/cli/cube")),
        workers: Some(1),
        ..Default::default()
    });

    assert_eq!(config.data_dir.value, PathBuf::from("/cli/cube"));
    assert_eq!(config.data_dir.source, ConfigSource::Cli);
    assert_eq!(config.workers.value, 1);
    assert_eq!(config.require_database_url().unwrap(), "postgres://localhost/env");

    clear_env();
}

#[test]
fn test_invalid_toml_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "invalid toml content [[[").unwrap();

    assert!(LayeredConfig::with_defaults().load_from_file(file.path()).is_err());
}

#[test]
fn test_unknown_key_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "embedder = \"ollama\"").unwrap();

    assert!(LayeredConfig::with_defaults().load_from_file(file.path()).is_err());
}

#[test]
fn test_missing_config_file_is_optional() {
    let temp_dir = TempDir::new().unwrap();
    let non_existent = temp_dir.path().join("config.toml");

    assert!(LayeredConfig::with_defaults().load_from_file(&non_existent).is_err());

    let config = LayeredConfig::with_defaults().load_from_file_if_exists(&non_existent).unwrap();
    assert_eq!(config.tile_memory_mb.source, ConfigSource::Default);
}
