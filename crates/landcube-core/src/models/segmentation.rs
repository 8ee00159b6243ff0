use super::polygon::Polygon;
use super::tile::TileKey;
use serde::{Deserialize, Serialize};

/// Provenance of a segmentation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationInfo {
    /// Name later used to look the segmentation up for object prediction
    pub name: String,
    pub datasource: String,
    pub year: i32,
    pub algorithm: String,
    pub parameters: serde_json::Value,
}

/// Polygons of one segmented tile plus provenance, persisted as a unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationResult {
    pub info: SegmentationInfo,
    pub tile_key: TileKey,
    pub polygons: Vec<Polygon>,
}

impl SegmentationResult {
    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }
}
