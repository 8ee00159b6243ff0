//! Training: extract labeled rows per tile, merge, fit once, persist the artifact.

use crate::pipeline::{fetch_raster, Pipeline};
use crate::query::TileQuery;
use crate::report::RunReport;
use crate::runner::{run_blocking, TileContext, TileTask};
use crate::stage::TileStage;
use async_trait::async_trait;
use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::{ModelSummary, Polygon, Region, TemporalReducer};
use landcube_features::{extract_raw, Entities, RawTable, TableOptions};
use landcube_geo::reproject_polygons;
use landcube_model::{AccuracyReport, Model};
use landcube_store::{DataCube, MetadataStore};
use serde::Serialize;
use std::sync::Arc;

/// Fit a classifier on the training polygons of a region
#[derive(Debug, Clone)]
pub struct TrainJob {
    pub model_name: String,
    pub training_set: String,
    pub algorithm: String,
    /// `name=value` hyperparameter assignments
    pub params: Vec<String>,
    pub options: TableOptions,
    /// Temporal compositing applied to every tile before extraction
    pub recipe: Option<TemporalReducer>,
}

/// Result of a training run
#[derive(Debug, Clone, Serialize)]
pub struct TrainOutcome {
    pub report: RunReport,
    pub model: ModelSummary,
    pub training_rows: usize,
    /// Accuracy on the training rows themselves
    pub training_accuracy: AccuracyReport,
}

struct TrainTileTask {
    cube: Arc<dyn DataCube>,
    store: Arc<dyn MetadataStore>,
    training_set: String,
    options: TableOptions,
    recipe: Option<TemporalReducer>,
}

#[async_trait]
impl TileTask for TrainTileTask {
    type Output = RawTable;

    async fn run(&self, ctx: &mut TileContext) -> Result<RawTable> {
        ctx.enter(TileStage::Fetching)?;
        let raster = fetch_raster(ctx, &*self.cube, self.recipe).await?;
        let region = Region::new(ctx.tile().bbox, ctx.tile().crs.clone());
        let polygons = ctx
            .interruptible(self.store.query_training_polygons(&region, &self.training_set))
            .await?;

        ctx.enter(TileStage::Extracting)?;
        let options = self.options.clone();
        let table = run_blocking(move || {
            let labeled: Vec<Polygon> = polygons.into_iter().filter(Polygon::is_labeled).collect();
            let labeled = reproject_polygons(labeled, &raster.crs)?;
            extract_raw(Entities::Polygons(&labeled), &raster, &options)
        })
        .await?;

        tracing::debug!(rows = table.len(), "Extracted training rows");
        Ok(table)
    }
}

impl Pipeline {
    /// Train `job` over every tile of `query` and store the fitted model
    pub async fn train(&self, query: &TileQuery, job: &TrainJob) -> Result<TrainOutcome> {
        let classifier = self.classifiers.create(&job.algorithm, &job.params)?;
        let mut model = Model::new(&job.model_name, &job.training_set, classifier);
        if let Some(recipe) = job.recipe {
            model = model.with_recipe(recipe.as_str());
        }

        self.store.health_check().await?;
        let plan = self.plan(query).await?;
        tracing::info!(
            model = %job.model_name,
            algorithm = %job.algorithm,
            training_set = %job.training_set,
            "Starting training run"
        );

        let task = Arc::new(TrainTileTask {
            cube: self.cube.clone(),
            store: self.store.clone(),
            training_set: job.training_set.clone(),
            options: job.options.clone(),
            recipe: job.recipe,
        });
        let mut outcome = self.runner.run(plan.tiles(), task).await;
        outcome.check_fatal()?;
        if outcome.report.cancelled_count() > 0 {
            return Err(LandcubeError::Cancelled);
        }

        let report = outcome.report;
        let tiles = outcome.outputs.len();
        let merged = RawTable::merge(outcome.outputs.into_iter().map(|(_, table)| table))?
            .filter(|table| !table.is_empty())
            .ok_or_else(|| LandcubeError::EmptyTrainingSet {
                context: format!(
                    "no usable rows for training set '{}' in {} tiles ({} failed)",
                    job.training_set,
                    tiles,
                    report.failure_count()
                ),
            })?;

        let (model, accuracy, rows) = run_blocking(move || {
            let table = model.hot_encode_training(merged)?;
            model.fit_table(&table)?;
            let accuracy = model.score(&table.matrix, &table.labels)?;
            Ok((model, accuracy, table.labels.len()))
        })
        .await?;

        model.to_store(&*self.store).await?;
        let summary = model.to_artifact()?.summary();
        tracing::info!(
            model = %summary.name,
            rows,
            classes = summary.n_classes,
            accuracy = accuracy.accuracy,
            "Training finished"
        );

        Ok(TrainOutcome { report, model: summary, training_rows: rows, training_accuracy: accuracy })
    }
}
