//! Landcube Pipeline - Tiled orchestration of training, prediction and segmentation
//!
//! This crate partitions a region query into tiles that fit a memory budget,
//! runs them through a bounded worker pool with per-tile failure isolation and
//! cooperative cancellation, and reports what happened to every tile.

pub mod jobs;
pub mod pipeline;
pub mod query;
pub mod report;
pub mod runner;
pub mod stage;

pub use jobs::{ObjectSource, PredictJob, SegmentJob, TrainJob, TrainOutcome};
pub use pipeline::{Pipeline, PipelineSettings};
pub use query::{enumerate_tiles, TileIter, TilePlan, TileQuery};
pub use report::{CancelledTile, RunReport};
pub use runner::{run_blocking, CancelHandle, CancelToken, ProgressFn, Runner, TileContext, TileStatus, TileTask};
pub use stage::{TileFailure, TileStage};
