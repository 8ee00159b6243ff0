pub mod affine;
pub mod artifact;
pub mod features;
pub mod geometry;
pub mod polygon;
pub mod raster;
pub mod segmentation;
pub mod tile;

pub use affine::Affine;
pub use artifact::{ClassifierArtifact, ModelSummary};
pub use features::{
    CategoricalSchema, CategorySource, ColumnKind, ColumnSchema, ColumnSpec, EntityId, ExtractionMode,
    FeatureMatrix, Statistic,
};
pub use geometry::{BoundingBox, Crs, Geometry, GeometryType, Region};
pub use polygon::{AttributeValue, Polygon, PolygonId};
pub use raster::{is_nodata, LabelArray, RasterLayer, RasterStack, TemporalReducer};
pub use segmentation::{SegmentationInfo, SegmentationResult};
pub use tile::{GridSpec, Tile, TileKey, TimeRange};
