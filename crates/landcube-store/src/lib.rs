//! Landcube Store - Collaborator ports and adapters
//!
//! This crate defines the two external collaborators of the pipeline, the
//! raster data cube and the metadata / training-label store, and provides
//! in-memory, filesystem and PostgreSQL adapters for them.

pub mod cube;
pub mod fs;
pub mod memory;
pub mod ports;
pub mod postgres;

pub use fs::{FsDataCube, FsMetadataStore};
pub use memory::{MemoryDataCube, MemoryMetadataStore};
pub use ports::{DataCube, MetadataStore};
pub use postgres::{PostgresConfig, PostgresMetadataStore};
