//! Landcube Segment - Unsupervised segmentation of raster tiles
//!
//! Segmentation families (SLIC superpixels and BIS-style region merging)
//! share one lifecycle: construct from a tile, segment into a label grid,
//! polygonize the labels and persist the polygons with their provenance.

pub mod bis;
pub mod registry;
pub mod segmentation;
pub mod slic;

pub use registry::{SegmenterEntry, SegmenterRegistry};
pub use segmentation::{SegmentInput, Segmentation, Segmenter};
