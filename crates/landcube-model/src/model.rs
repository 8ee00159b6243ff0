//! Schema-aware wrapper around a classifier family.
//!
//! A [`Model`] owns everything a prediction needs besides the fitted trees: the
//! column schema learned from the training table, the class codes, and the
//! per-column fill values for missing cells. Artifacts written by `save` and
//! `to_store` carry all of it.

use crate::classifier::{argmax_rows, Classifier};
use crate::registry::ClassifierRegistry;
use crate::report::AccuracyReport;
use chrono::{DateTime, Utc};
use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::{ClassifierArtifact, ColumnSchema, ColumnSpec, ExtractionMode, FeatureMatrix};
use landcube_features::{RawTable, TrainingTable};
use landcube_store::fs::write_atomic;
use landcube_store::MetadataStore;
use ndarray::{Array2, Axis};
use std::path::Path;

#[derive(Debug)]
pub struct Model {
    name: String,
    training_set: String,
    recipe: Option<String>,
    classifier: Box<dyn Classifier>,
    schema: Option<ColumnSchema>,
    classes: Vec<i64>,
    fill_values: Vec<f64>,
    created_at: Option<DateTime<Utc>>,
}

impl Model {
    pub fn new(name: impl Into<String>, training_set: impl Into<String>, classifier: Box<dyn Classifier>) -> Self {
        Self {
            name: name.into(),
            training_set: training_set.into(),
            recipe: None,
            classifier,
            schema: None,
            classes: Vec::new(),
            fill_values: Vec::new(),
            created_at: None,
        }
    }

    /// Record the temporal recipe the training rasters were composited with
    pub fn with_recipe(mut self, recipe: impl Into<String>) -> Self {
        self.recipe = Some(recipe.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm(&self) -> &'static str {
        self.classifier.algorithm()
    }

    pub fn training_set(&self) -> &str {
        &self.training_set
    }

    pub fn recipe(&self) -> Option<&str> {
        self.recipe.as_deref()
    }

    pub fn schema(&self) -> Option<&ColumnSchema> {
        self.schema.as_ref()
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    pub fn is_fitted(&self) -> bool {
        self.classifier.is_fitted() && self.schema.is_some()
    }

    /// Learn this model's column schema from a raw training table and encode it
    pub fn hot_encode_training(&mut self, raw: RawTable) -> Result<TrainingTable> {
        let table = raw.into_training()?;
        self.schema = Some(table.schema.clone());
        Ok(table)
    }

    /// Encode prediction rows with this model's column schema
    pub fn hot_encode_predict(&self, raw: &RawTable) -> Result<FeatureMatrix> {
        let schema = self.schema.as_ref().ok_or(LandcubeError::ModelNotFitted)?;
        raw.encode(schema)
    }

    pub fn fit_table(&mut self, table: &TrainingTable) -> Result<()> {
        self.schema = Some(table.schema.clone());
        self.fit(&table.matrix, &table.labels)
    }

    /// Fit on an encoded matrix
    ///
    /// Without a schema from `hot_encode_training`/`fit_table`, the matrix
    /// columns are taken as pixel-mode layers of the same names.
    pub fn fit(&mut self, matrix: &FeatureMatrix, labels: &[i64]) -> Result<()> {
        if matrix.is_empty() {
            return Err(LandcubeError::EmptyTrainingSet {
                context: format!("model '{}' got a feature matrix with zero rows", self.name),
            });
        }
        if labels.len() != matrix.nrows() {
            return Err(LandcubeError::SchemaMismatch {
                reason: format!("{} labels for {} feature rows", labels.len(), matrix.nrows()),
            });
        }

        let schema = match &self.schema {
            Some(schema) => {
                check_columns(schema, matrix)?;
                schema.clone()
            }
            None => ColumnSchema {
                mode: ExtractionMode::Pixel,
                stats: Vec::new(),
                layers: matrix.columns.clone(),
                categorical: Vec::new(),
                columns: matrix.columns.iter().map(|c| ColumnSpec::pixel(c)).collect(),
            },
        };

        let mut classes = labels.to_vec();
        classes.sort_unstable();
        classes.dedup();
        let y: Vec<usize> = labels.iter().map(|l| classes.binary_search(l).unwrap_or(0)).collect();

        let fill_values = column_means(&matrix.values);
        let (x, filled) = fill_missing(&matrix.values, &fill_values);
        if filled > 0 {
            tracing::info!(model = %self.name, cells = filled, "Filled missing training values with column means");
        }

        tracing::info!(
            model = %self.name,
            algorithm = self.classifier.algorithm(),
            rows = x.nrows(),
            columns = x.ncols(),
            classes = classes.len(),
            "Fitting classifier"
        );
        self.classifier.fit(x.view(), &y, classes.len())?;

        self.schema = Some(schema);
        self.classes = classes;
        self.fill_values = fill_values;
        self.created_at = Some(Utc::now());
        Ok(())
    }

    /// Class probabilities, columns ordered as `classes()`
    pub fn predict_proba(&self, matrix: &FeatureMatrix) -> Result<Array2<f64>> {
        let schema = self.schema.as_ref().ok_or(LandcubeError::ModelNotFitted)?;
        if !self.classifier.is_fitted() {
            return Err(LandcubeError::ModelNotFitted);
        }
        check_columns(schema, matrix)?;

        let (x, filled) = fill_missing(&matrix.values, &self.fill_values);
        if filled > 0 {
            tracing::info!(model = %self.name, cells = filled, "Filled missing prediction values with training means");
        }
        self.classifier.predict_proba(x.view())
    }

    pub fn predict(&self, matrix: &FeatureMatrix) -> Result<Vec<i64>> {
        Ok(self.predict_confidence(matrix)?.into_iter().map(|(class, _)| class).collect())
    }

    /// Predicted class and its probability per row
    pub fn predict_confidence(&self, matrix: &FeatureMatrix) -> Result<Vec<(i64, f64)>> {
        let proba = self.predict_proba(matrix)?;
        Ok(argmax_rows(&proba).into_iter().map(|(i, p)| (self.classes[i], p)).collect())
    }

    pub fn score(&self, matrix: &FeatureMatrix, labels: &[i64]) -> Result<AccuracyReport> {
        let predicted = self.predict(matrix)?;
        AccuracyReport::from_predictions(labels, &predicted)
    }

    pub fn to_artifact(&self) -> Result<ClassifierArtifact> {
        let schema = self.schema.as_ref().ok_or(LandcubeError::ModelNotFitted)?;
        Ok(ClassifierArtifact {
            name: self.name.clone(),
            algorithm: self.classifier.algorithm().to_string(),
            hyperparameters: self.classifier.hyperparameters(),
            training_set: self.training_set.clone(),
            recipe: self.recipe.clone(),
            column_schema: schema.clone(),
            classes: self.classes.clone(),
            fill_values: self.fill_values.clone(),
            payload: self.classifier.payload()?,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        })
    }

    pub fn from_artifact(artifact: ClassifierArtifact, registry: &ClassifierRegistry) -> Result<Self> {
        if artifact.fill_values.len() != artifact.column_schema.len() {
            return Err(LandcubeError::SchemaMismatch {
                reason: format!(
                    "artifact '{}' has {} fill values for {} columns",
                    artifact.name,
                    artifact.fill_values.len(),
                    artifact.column_schema.len()
                ),
            });
        }

        let mut classifier = registry.restore(&artifact.algorithm, &artifact.hyperparameters)?;
        classifier.restore(&artifact.payload, artifact.classes.len())?;

        Ok(Self {
            name: artifact.name,
            training_set: artifact.training_set,
            recipe: artifact.recipe,
            classifier,
            schema: Some(artifact.column_schema),
            classes: artifact.classes,
            fill_values: artifact.fill_values,
            created_at: Some(artifact.created_at),
        })
    }

    /// Write the artifact to `path` atomically
    pub fn save(&self, path: &Path) -> Result<ClassifierArtifact> {
        let artifact = self.to_artifact()?;
        let bytes =
            serde_json::to_vec_pretty(&artifact).map_err(|e| LandcubeError::Serialization(e.to_string()))?;
        write_atomic(path, &bytes)?;
        tracing::info!(model = %self.name, path = %path.display(), "Saved classifier artifact");
        Ok(artifact)
    }

    pub fn load(path: &Path, registry: &ClassifierRegistry) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let artifact: ClassifierArtifact = serde_json::from_slice(&bytes)
            .map_err(|e| LandcubeError::Serialization(format!("{}: {}", path.display(), e)))?;
        Self::from_artifact(artifact, registry)
    }

    pub async fn to_store(&self, store: &dyn MetadataStore) -> Result<()> {
        let artifact = self.to_artifact()?;
        store.save_classifier_artifact(&self.name, &artifact).await?;
        tracing::info!(model = %self.name, "Stored classifier artifact");
        Ok(())
    }

    pub async fn from_store(store: &dyn MetadataStore, name: &str, registry: &ClassifierRegistry) -> Result<Self> {
        let artifact = store.load_classifier_artifact(name).await?;
        Self::from_artifact(artifact, registry)
    }
}

fn check_columns(schema: &ColumnSchema, matrix: &FeatureMatrix) -> Result<()> {
    if matrix.ncols() != schema.len() {
        return Err(LandcubeError::SchemaMismatch {
            reason: format!("matrix has {} columns, schema expects {}", matrix.ncols(), schema.len()),
        });
    }
    if let Some((got, want)) =
        matrix.columns.iter().zip(&schema.columns).find(|(got, want)| **got != want.name)
    {
        return Err(LandcubeError::SchemaMismatch {
            reason: format!("column '{}' where schema expects '{}'", got, want.name),
        });
    }
    Ok(())
}

/// Mean of the non-missing values per column; 0 for all-missing columns
fn column_means(values: &Array2<f64>) -> Vec<f64> {
    values
        .axis_iter(Axis(1))
        .map(|col| {
            let (sum, n) = col.iter().filter(|v| !v.is_nan()).fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
            if n == 0 {
                0.0
            } else {
                sum / n as f64
            }
        })
        .collect()
}

fn fill_missing(values: &Array2<f64>, fill: &[f64]) -> (Array2<f64>, usize) {
    let mut out = values.clone();
    let mut filled = 0;
    for ((_, col), v) in out.indexed_iter_mut() {
        if v.is_nan() {
            *v = fill[col];
            filled += 1;
        }
    }
    (out, filled)
}
