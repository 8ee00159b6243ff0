use landcube_core::models::{ModelSummary, Tile};
use landcube_model::AccuracyReport;
use landcube_pipeline::{RunReport, TileFailure};
use serde::Serialize;
use tabled::Tabled;

/// One row of the `tiles` listing
#[derive(Debug, Serialize, Tabled)]
pub struct TileRow {
    #[tabled(rename = "Tile")]
    pub key: String,
    #[tabled(rename = "Level")]
    pub level: u8,
    #[tabled(rename = "Bounds")]
    pub bounds: String,
    #[tabled(rename = "Pixels")]
    pub shape: String,
}

impl From<&Tile> for TileRow {
    fn from(tile: &Tile) -> Self {
        let b = &tile.bbox;
        Self {
            key: tile.key.to_string(),
            level: tile.key.level,
            bounds: format!("{:.1} {:.1} {:.1} {:.1}", b.min_x, b.min_y, b.max_x, b.max_y),
            shape: format!("{}x{}", tile.shape.0, tile.shape.1),
        }
    }
}

/// Output for tiles command
#[derive(Debug, Serialize)]
pub struct TilesOutput {
    pub product: String,
    pub crs: String,
    pub level: u8,
    pub max_tile_bytes: u64,
    pub tiles: Vec<TileRow>,
}

/// Failed tile row of a run summary
#[derive(Debug, Serialize, Tabled)]
pub struct FailureRow {
    #[tabled(rename = "Tile")]
    pub tile: String,
    #[tabled(rename = "Stage")]
    pub stage: String,
    #[tabled(rename = "Error")]
    pub kind: String,
    #[tabled(rename = "Cause")]
    pub cause: String,
}

impl From<&TileFailure> for FailureRow {
    fn from(failure: &TileFailure) -> Self {
        Self {
            tile: failure.tile_key.to_string(),
            stage: failure.stage.to_string(),
            kind: failure.kind.as_str().to_string(),
            cause: failure.cause.clone(),
        }
    }
}

/// Output for predict and segment commands
#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub command: String,
    /// Name the results were saved under
    pub output: String,
    pub report: RunReport,
}

/// Output for train command
#[derive(Debug, Serialize)]
pub struct TrainOutput {
    pub model: ModelSummary,
    pub training_rows: usize,
    pub training_accuracy: AccuracyReport,
    pub report: RunReport,
}

/// One row of the `models` listing
#[derive(Debug, Serialize, Tabled)]
pub struct ModelRow {
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Algorithm")]
    pub algorithm: String,
    #[tabled(rename = "Training Set")]
    pub training_set: String,
    #[tabled(rename = "Features")]
    pub n_features: usize,
    #[tabled(rename = "Classes")]
    pub n_classes: usize,
    #[tabled(rename = "Created")]
    pub created_at: String,
}

impl From<&ModelSummary> for ModelRow {
    fn from(summary: &ModelSummary) -> Self {
        Self {
            name: summary.name.clone(),
            algorithm: summary.algorithm.clone(),
            training_set: summary.training_set.clone(),
            n_features: summary.n_features,
            n_classes: summary.n_classes,
            created_at: summary.created_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        }
    }
}

/// One parameter of a registered algorithm
#[derive(Debug, Serialize, Tabled)]
pub struct ParamRow {
    #[tabled(rename = "Algorithm")]
    pub algorithm: String,
    #[tabled(rename = "Parameter")]
    pub name: String,
    #[tabled(rename = "Default")]
    pub default: String,
    #[tabled(rename = "Description")]
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct AlgorithmInfo {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamRow>,
}

/// Output for algorithms command
#[derive(Debug, Serialize)]
pub struct AlgorithmsOutput {
    pub classifiers: Vec<AlgorithmInfo>,
    pub segmenters: Vec<AlgorithmInfo>,
}

/// Output for labels import command
#[derive(Debug, Serialize)]
pub struct ImportOutput {
    pub training_set: String,
    pub imported: usize,
    pub labeled: usize,
    pub crs: Option<String>,
}
