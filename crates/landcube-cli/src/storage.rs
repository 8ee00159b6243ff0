use crate::errors;
use anyhow::Result;
use landcube_core::config::{LayeredConfig, StoreKind};
use landcube_store::{
    DataCube, FsDataCube, FsMetadataStore, MemoryDataCube, MemoryMetadataStore, MetadataStore, PostgresConfig,
    PostgresMetadataStore,
};
use std::sync::Arc;

/// Host, port and database of a connection URL, for error messages
pub fn parse_database_url(url: &str) -> (String, String, String) {
    let authority = url.split('@').nth(1).and_then(|s| s.split('/').next());

    let host = authority
        .and_then(|s| s.split(':').next())
        .unwrap_or("localhost")
        .to_string();

    let port = authority
        .and_then(|s| s.split(':').nth(1))
        .unwrap_or("5432")
        .to_string();

    let database = url
        .split('/')
        .next_back()
        .and_then(|s| s.split('?').next())
        .unwrap_or("landcube")
        .to_string();

    (host, port, database)
}

/// The two collaborators a pipeline runs against
pub struct Storage {
    pub kind: StoreKind,
    pub cube: Arc<dyn DataCube>,
    pub store: Arc<dyn MetadataStore>,
}

impl Storage {
    pub async fn new(config: &LayeredConfig) -> Result<Self> {
        match config.store.value {
            StoreKind::Fs => Ok(Self::new_fs(config)),
            StoreKind::Postgres => Self::new_postgres(config).await,
            StoreKind::Memory => Ok(Self::new_memory()),
        }
    }

    fn new_fs(config: &LayeredConfig) -> Self {
        let data_dir = &config.data_dir.value;
        Self {
            kind: StoreKind::Fs,
            cube: Arc::new(FsDataCube::new(data_dir)),
            store: Arc::new(FsMetadataStore::new(data_dir)),
        }
    }

    fn new_memory() -> Self {
        tracing::warn!("Using the in-memory store; nothing is kept after this command");
        Self {
            kind: StoreKind::Memory,
            cube: Arc::new(MemoryDataCube::new()),
            store: Arc::new(MemoryMetadataStore::new()),
        }
    }

    /// PostgreSQL metadata next to the filesystem cube
    async fn new_postgres(config: &LayeredConfig) -> Result<Self> {
        let url = config
            .require_database_url()
            .map_err(|e| errors::database_connection_failed(&e.to_string()))?;
        let pg_config = PostgresConfig::new(url)?;

        let store = PostgresMetadataStore::connect(pg_config).await.map_err(|e| {
            let (host, port, database) = parse_database_url(url);
            errors::database_connection_failed(&e.to_string()).with_context(format!(
                "Connection details:\n  Host: {}\n  Port: {}\n  Database: {}\n\nError: {}",
                host, port, database, e
            ))
        })?;

        Ok(Self {
            kind: StoreKind::Postgres,
            cube: Arc::new(FsDataCube::new(&config.data_dir.value)),
            store: Arc::new(store),
        })
    }
}
