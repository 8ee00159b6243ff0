//! Error types for Landcube

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Coordinate reference system failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrsError {
    #[error("Unparsable CRS definition: '{definition}'")]
    Unparsable { definition: String },

    #[error("CRS mismatch: geometry is in {found}, raster grid expects {expected}")]
    Mismatch { expected: String, found: String },

    #[error("Transform from {from} to {to} is undefined: {reason}")]
    Transform {
        from: String,
        to: String,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum LandcubeError {
    // Geometry / CRS errors
    #[error(transparent)]
    Crs(#[from] CrsError),

    #[error("Invalid geometry for {entity}: {reason}")]
    InvalidGeometry { entity: String, reason: String },

    #[error("Invalid raster: {reason}")]
    InvalidRaster { reason: String },

    // Data cube errors
    #[error("Tile {tile} not found for product '{product}'")]
    TileNotFound { product: String, tile: String },

    #[error("Data gap in product '{product}' at tile {tile}: {reason}")]
    DataGap {
        product: String,
        tile: String,
        reason: String,
    },

    // Feature / model errors
    #[error("Empty training set: {context}")]
    EmptyTrainingSet { context: String },

    #[error("Feature schema mismatch: {reason}")]
    SchemaMismatch { reason: String },

    #[error("Model has not been fitted yet")]
    ModelNotFitted,

    #[error("Model '{name}' not found in the metadata store")]
    ModelNotFound { name: String },

    // Segmentation errors
    #[error("Segmentation '{algorithm}' must run segment() before polygonize()")]
    NotSegmented { algorithm: String },

    // Registry errors
    #[error("Unknown {kind} algorithm '{name}'. Available: {available}")]
    UnknownAlgorithm {
        kind: String,
        name: String,
        available: String,
    },

    #[error("Invalid hyperparameter for '{algorithm}': {reason}")]
    InvalidHyperparameter { algorithm: String, reason: String },

    // Store errors
    #[error("Metadata store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    #[error("Store error: {0}")]
    Store(String),

    // Configuration errors
    #[error("Missing required configuration: {key}")]
    ConfigMissing { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Worker(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Stable classification of errors used in run summaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Crs,
    InvalidGeometry,
    InvalidRaster,
    TileNotFound,
    DataGap,
    EmptyTrainingSet,
    SchemaMismatch,
    ModelNotFitted,
    ModelNotFound,
    NotSegmented,
    UnknownAlgorithm,
    InvalidHyperparameter,
    StoreUnavailable,
    Store,
    Config,
    Cancelled,
    Worker,
    Io,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Crs => "CrsError",
            ErrorKind::InvalidGeometry => "InvalidGeometry",
            ErrorKind::InvalidRaster => "InvalidRaster",
            ErrorKind::TileNotFound => "TileNotFoundError",
            ErrorKind::DataGap => "DataGapError",
            ErrorKind::EmptyTrainingSet => "EmptyTrainingSetError",
            ErrorKind::SchemaMismatch => "SchemaMismatchError",
            ErrorKind::ModelNotFitted => "ModelNotFitted",
            ErrorKind::ModelNotFound => "ModelNotFound",
            ErrorKind::NotSegmented => "NotSegmentedError",
            ErrorKind::UnknownAlgorithm => "UnknownAlgorithm",
            ErrorKind::InvalidHyperparameter => "InvalidHyperparameter",
            ErrorKind::StoreUnavailable => "StoreUnavailable",
            ErrorKind::Store => "StoreError",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Worker => "WorkerError",
            ErrorKind::Io => "IoError",
            ErrorKind::Serialization => "SerializationError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LandcubeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LandcubeError::Crs(_) => ErrorKind::Crs,
            LandcubeError::InvalidGeometry { .. } => ErrorKind::InvalidGeometry,
            LandcubeError::InvalidRaster { .. } => ErrorKind::InvalidRaster,
            LandcubeError::TileNotFound { .. } => ErrorKind::TileNotFound,
            LandcubeError::DataGap { .. } => ErrorKind::DataGap,
            LandcubeError::EmptyTrainingSet { .. } => ErrorKind::EmptyTrainingSet,
            LandcubeError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            LandcubeError::ModelNotFitted => ErrorKind::ModelNotFitted,
            LandcubeError::ModelNotFound { .. } => ErrorKind::ModelNotFound,
            LandcubeError::NotSegmented { .. } => ErrorKind::NotSegmented,
            LandcubeError::UnknownAlgorithm { .. } => ErrorKind::UnknownAlgorithm,
            LandcubeError::InvalidHyperparameter { .. } => ErrorKind::InvalidHyperparameter,
            LandcubeError::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            LandcubeError::Store(_) => ErrorKind::Store,
            LandcubeError::ConfigMissing { .. } | LandcubeError::ConfigInvalid { .. } => {
                ErrorKind::Config
            }
            LandcubeError::Cancelled => ErrorKind::Cancelled,
            LandcubeError::Worker(_) => ErrorKind::Worker,
            LandcubeError::Io(_) => ErrorKind::Io,
            LandcubeError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Missing source data: the tile is skipped and recorded, the run continues.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LandcubeError::TileNotFound { .. } | LandcubeError::DataGap { .. })
    }

    /// Cross-cutting failures that abort the whole run instead of a single tile.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(self, LandcubeError::StoreUnavailable { .. })
    }
}

impl From<serde_json::Error> for LandcubeError {
    fn from(err: serde_json::Error) -> Self {
        LandcubeError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LandcubeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        let gap = LandcubeError::DataGap {
            product: "s2_10m".to_string(),
            tile: "3_4".to_string(),
            reason: "no acquisitions".to_string(),
        };
        assert!(gap.is_recoverable());
        assert_eq!(gap.kind(), ErrorKind::DataGap);

        let schema = LandcubeError::SchemaMismatch { reason: "band missing".to_string() };
        assert!(!schema.is_recoverable());
        assert!(!schema.is_fatal_to_run());
    }

    #[test]
    fn test_store_unavailable_is_fatal_to_run() {
        let err = LandcubeError::StoreUnavailable { reason: "connection refused".to_string() };
        assert!(err.is_fatal_to_run());
        assert_eq!(err.kind().as_str(), "StoreUnavailable");
    }

    #[test]
    fn test_crs_error_conversion() {
        let err: LandcubeError = CrsError::Unparsable { definition: "bogus".to_string() }.into();
        assert_eq!(err.kind(), ErrorKind::Crs);
        assert!(err.to_string().contains("bogus"));
    }
}
