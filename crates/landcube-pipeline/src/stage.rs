//! Per-tile state machine.
//!
//! `Pending -> Fetching -> (Segmenting) -> Extracting -> Modeling -> Persisting -> Done`.
//! A tile may skip stages its job does not need but never moves backwards.
//! Failure is terminal and records the stage the tile was in.

use landcube_core::error::{ErrorKind, LandcubeError};
use landcube_core::models::TileKey;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileStage {
    Pending,
    Fetching,
    Segmenting,
    Extracting,
    Modeling,
    Persisting,
    Done,
}

impl TileStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TileStage::Pending => "pending",
            TileStage::Fetching => "fetching",
            TileStage::Segmenting => "segmenting",
            TileStage::Extracting => "extracting",
            TileStage::Modeling => "modeling",
            TileStage::Persisting => "persisting",
            TileStage::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TileStage::Done)
    }

    /// Stages only move forward; optional stages may be skipped
    pub fn can_advance_to(&self, next: TileStage) -> bool {
        !self.is_terminal() && next > *self
    }
}

impl fmt::Display for TileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of one tile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileFailure {
    pub tile_key: TileKey,
    pub stage: TileStage,
    pub kind: ErrorKind,
    pub cause: String,
}

impl TileFailure {
    pub fn new(tile_key: TileKey, stage: TileStage, error: &LandcubeError) -> Self {
        Self { tile_key, stage, kind: error.kind(), cause: error.to_string() }
    }
}

impl fmt::Display for TileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed while {} ({}): {}", self.tile_key, self.stage, self.kind, self.cause)
    }
}
