//! Landcube Core - Domain models, error taxonomy, and configuration
//!
//! This crate contains the data model shared by every stage of the tile-oriented
//! classification pipeline: tiles, raster stacks, polygons, feature tables and
//! classifier artifacts.

pub mod config;
pub mod error;
pub mod models;
pub mod params;

pub use error::{CrsError, ErrorKind, LandcubeError, Result};
