//! The three job kinds a pipeline runs over a tile query.

pub mod predict;
pub mod segment;
pub mod train;

pub use predict::{ObjectSource, PredictJob, CONFIDENCE_ATTRIBUTE};
pub use segment::SegmentJob;
pub use train::{TrainJob, TrainOutcome};
