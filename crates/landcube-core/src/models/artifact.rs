use super::features::ColumnSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted form of a fitted classifier
///
/// `payload` is owned by the algorithm family and opaque to everything else;
/// the column schema and fill values are what prediction needs to rebuild an
/// identical feature layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierArtifact {
    pub name: String,
    pub algorithm: String,
    pub hyperparameters: serde_json::Value,
    pub training_set: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<String>,
    pub column_schema: ColumnSchema,
    /// Sorted class codes seen during fit
    pub classes: Vec<i64>,
    /// Per-column training means used to fill missing values
    pub fill_values: Vec<f64>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ClassifierArtifact {
    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            name: self.name.clone(),
            algorithm: self.algorithm.clone(),
            training_set: self.training_set.clone(),
            n_features: self.column_schema.len(),
            n_classes: self.classes.len(),
            created_at: self.created_at,
        }
    }
}

/// Listing entry for stored models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub algorithm: String,
    pub training_set: String,
    pub n_features: usize,
    pub n_classes: usize,
    pub created_at: DateTime<Utc>,
}
