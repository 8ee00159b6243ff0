//! Landcube Features - zonal statistics and feature tables
//!
//! Turns (raster stack, polygons) pairs into fixed-width feature matrices:
//! nodata-aware zonal aggregation, categorical one-hot encoding and the
//! training / prediction table builders that keep column layouts stable.

pub mod encoding;
pub mod table;
pub mod zonal;

pub use encoding::{decode_one_hot, learn_categories, one_hot};
pub use table::{
    build_prediction_table, build_training_table, extract_raw, CategoricalColumn, Entities,
    RawTable, TableOptions, TrainingTable,
};
pub use zonal::{zonal_statistics, ZonalStatistics, ZoneStats};
