//! Landcube Model - Classifier families and their lifecycle
//!
//! This crate implements the pluggable classifiers (random forest, gradient
//! boosting and histogram boosting), the registry that maps algorithm names to
//! constructors, and the schema-aware `Model` wrapper that fits, predicts,
//! scores and persists them as artifacts.

pub mod boosting;
pub mod classifier;
pub mod forest;
pub mod model;
pub mod registry;
pub mod report;
pub mod tree;

pub use classifier::Classifier;
pub use model::Model;
pub use registry::{ClassifierEntry, ClassifierRegistry};
pub use report::{AccuracyReport, ClassMetrics};
