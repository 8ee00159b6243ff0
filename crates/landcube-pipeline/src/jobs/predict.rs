//! Prediction: classify objects or pixels of every tile with a stored model.

use crate::pipeline::{fetch_raster, Pipeline};
use crate::query::TileQuery;
use crate::report::RunReport;
use crate::runner::{run_blocking, TileContext, TileTask};
use crate::stage::TileStage;
use async_trait::async_trait;
use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::{
    Affine, Crs, ExtractionMode, FeatureMatrix, LabelArray, Polygon, PolygonId, RasterStack, Region,
    TemporalReducer,
};
use landcube_features::{build_prediction_table, Entities};
use landcube_geo::polygonize::VALUE_ATTRIBUTE;
use landcube_geo::{polygonize, reproject_polygons, PolygonizeOptions};
use landcube_model::Model;
use landcube_segment::{Segmentation, SegmenterRegistry};
use landcube_store::{DataCube, MetadataStore};
use std::collections::HashMap;
use std::sync::Arc;

/// Attribute holding the winning class probability of an object
pub const CONFIDENCE_ATTRIBUTE: &str = "confidence";

/// Where the objects to classify come from
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectSource {
    /// Segment every tile on the fly
    Segment {
        algorithm: String,
        params: Vec<String>,
        /// Bands to segment on; all bands when empty
        bands: Vec<String>,
    },
    /// Segments of a previously stored segmentation
    Stored { segmentation: String },
    /// Every pixel, for models trained in pixel mode
    Pixels,
}

impl ObjectSource {
    fn mode(&self) -> ExtractionMode {
        match self {
            ObjectSource::Pixels => ExtractionMode::Pixel,
            _ => ExtractionMode::Zonal,
        }
    }
}

/// Classify a region with a stored model
#[derive(Debug, Clone)]
pub struct PredictJob {
    pub model_name: String,
    pub objects: ObjectSource,
    /// Name results are saved under; the model name when `None`
    pub output: Option<String>,
}

impl PredictJob {
    pub fn output_name(&self) -> &str {
        self.output.as_deref().unwrap_or(&self.model_name)
    }
}

/// Objects of one tile after extraction
enum TileObjects {
    /// Polygons keyed by the local id used as entity id
    Polygons(HashMap<PolygonId, Polygon>),
    Pixels { shape: (usize, usize), transform: Affine, crs: Crs },
}

struct PredictTileTask {
    cube: Arc<dyn DataCube>,
    store: Arc<dyn MetadataStore>,
    segmenters: Arc<SegmenterRegistry>,
    model: Arc<Model>,
    objects: ObjectSource,
    output: String,
    recipe: Option<TemporalReducer>,
    background: i64,
}

impl PredictTileTask {
    /// Segment the raster and hand it back with its polygons
    async fn segment(
        &self,
        raster: RasterStack,
        algorithm: &str,
        params: &[String],
        bands: &[String],
    ) -> Result<(RasterStack, Vec<Polygon>)> {
        let segmenter = self.segmenters.create(algorithm, params)?;
        let bands = bands.to_vec();
        run_blocking(move || {
            let mut segmentation = Segmentation::new(&raster, &bands, segmenter)?;
            segmentation.segment()?;
            let polygons = segmentation.polygonize(None)?.to_vec();
            Ok((raster, polygons))
        })
        .await
    }
}

#[async_trait]
impl TileTask for PredictTileTask {
    type Output = usize;

    async fn run(&self, ctx: &mut TileContext) -> Result<usize> {
        ctx.enter(TileStage::Fetching)?;
        let mut raster = fetch_raster(ctx, &*self.cube, self.recipe).await?;

        let polygons = match &self.objects {
            ObjectSource::Pixels => None,
            ObjectSource::Stored { segmentation } => {
                let region = Region::new(ctx.tile().bbox, ctx.tile().crs.clone());
                Some(ctx.interruptible(self.store.query_segmentation_polygons(segmentation, &region)).await?)
            }
            ObjectSource::Segment { algorithm, params, bands } => {
                ctx.enter(TileStage::Segmenting)?;
                let (kept, polygons) = self.segment(raster, algorithm, params, bands).await?;
                raster = kept;
                Some(polygons)
            }
        };

        ctx.enter(TileStage::Extracting)?;
        let model = self.model.clone();
        let background = self.background;
        let (objects, matrix) = run_blocking(move || extract(&model, raster, polygons, background)).await?;

        ctx.enter(TileStage::Modeling)?;
        let model = self.model.clone();
        let (matrix, predictions) = run_blocking(move || {
            let predictions = model.predict_confidence(&matrix)?;
            Ok((matrix, predictions))
        })
        .await?;

        ctx.enter(TileStage::Persisting)?;
        let classified = classified_polygons(objects, &matrix, &predictions, background)?;
        self.store.save_classified_polygons(&self.output, ctx.key(), &classified).await?;

        tracing::debug!(rows = matrix.nrows(), polygons = classified.len(), "Saved classified polygons");
        Ok(classified.len())
    }
}

/// Build the prediction matrix for the tile's objects
fn extract(
    model: &Model,
    raster: RasterStack,
    polygons: Option<Vec<Polygon>>,
    background: i64,
) -> Result<(TileObjects, FeatureMatrix)> {
    let schema = model.schema().ok_or(LandcubeError::ModelNotFitted)?;

    match polygons {
        Some(polygons) => {
            let polygons = reproject_polygons(polygons, &raster.crs)?;
            // Stored ids may collide across tiles or with the background label
            let first = background.max(0) as PolygonId + 1;
            let local: Vec<Polygon> = polygons
                .iter()
                .enumerate()
                .map(|(i, p)| Polygon { id: first + i as PolygonId, ..p.clone() })
                .collect();
            let matrix = build_prediction_table(Entities::Polygons(&local), &raster, schema, background)?;
            let objects = local.into_iter().zip(polygons).map(|(l, original)| (l.id, original)).collect();
            Ok((TileObjects::Polygons(objects), matrix))
        }
        None => {
            let matrix = build_prediction_table(Entities::AllPixels, &raster, schema, background)?;
            let objects =
                TileObjects::Pixels { shape: raster.shape(), transform: raster.transform, crs: raster.crs.clone() };
            Ok((objects, matrix))
        }
    }
}

/// Fill value for pixels without a prediction; never one of the predicted classes
fn uncovered_value(predictions: &[(i64, f64)], background: i64) -> i64 {
    if predictions.iter().all(|(class, _)| *class != background) {
        return background;
    }
    let lowest = predictions.iter().map(|(class, _)| *class).min().unwrap_or(background);
    lowest.min(background).saturating_sub(1)
}

/// Attach predicted classes to objects; pixels are grouped into class polygons
fn classified_polygons(
    objects: TileObjects,
    matrix: &FeatureMatrix,
    predictions: &[(i64, f64)],
    background: i64,
) -> Result<Vec<Polygon>> {
    match objects {
        TileObjects::Polygons(mut polygons) => {
            let mut classified = Vec::with_capacity(matrix.nrows());
            for (entity, (class, confidence)) in matrix.entity_ids.iter().zip(predictions) {
                if let Some(polygon) = polygons.remove(entity) {
                    classified.push(polygon.with_class(*class).with_attribute(CONFIDENCE_ATTRIBUTE, *confidence));
                }
            }
            if !polygons.is_empty() {
                tracing::debug!(objects = polygons.len(), "Objects without valid pixels left unclassified");
            }
            classified.sort_by_key(|p| p.id);
            Ok(classified)
        }
        TileObjects::Pixels { shape, transform, crs } => {
            let (rows, cols) = shape;
            let uncovered = uncovered_value(predictions, background);
            let mut classes = LabelArray::from_elem(shape, uncovered);
            for (entity, (class, _)) in matrix.entity_ids.iter().zip(predictions) {
                let idx = *entity as usize;
                if idx < rows * cols {
                    classes[[idx / cols, idx % cols]] = *class;
                }
            }
            let options = PolygonizeOptions { skip_value: Some(uncovered), first_id: 1 };
            let polygons = polygonize(&classes, &transform, &crs, &options)?;
            Ok(polygons
                .into_iter()
                .map(|p| {
                    let class = p.attribute(VALUE_ATTRIBUTE).and_then(|v| v.as_i64());
                    Polygon { class_code: class, ..p }
                })
                .collect())
        }
    }
}

impl Pipeline {
    /// Classify every tile of `query` and save the results per tile
    pub async fn predict(&self, query: &TileQuery, job: &PredictJob) -> Result<RunReport> {
        self.store.health_check().await?;
        let model = Model::from_store(&*self.store, &job.model_name, &self.classifiers).await?;
        let schema = model.schema().ok_or(LandcubeError::ModelNotFitted)?;

        if schema.mode != job.objects.mode() {
            return Err(LandcubeError::SchemaMismatch {
                reason: format!(
                    "model '{}' was trained in {:?} mode but the requested objects need {:?} mode",
                    job.model_name,
                    schema.mode,
                    job.objects.mode()
                ),
            });
        }
        if let ObjectSource::Segment { algorithm, params, .. } = &job.objects {
            // Reject bad names and parameters before any tile is fetched
            self.segmenters.create(algorithm, params)?;
        }
        let recipe = model.recipe().map(str::parse::<TemporalReducer>).transpose()?;

        let plan = self.plan(query).await?;
        tracing::info!(model = %job.model_name, output = job.output_name(), "Starting prediction run");

        let task = Arc::new(PredictTileTask {
            cube: self.cube.clone(),
            store: self.store.clone(),
            segmenters: self.segmenters.clone(),
            model: Arc::new(model),
            objects: job.objects.clone(),
            output: job.output_name().to_string(),
            recipe,
            background: self.settings.background,
        });
        let mut outcome = self.runner.run(plan.tiles(), task).await;
        outcome.check_fatal()?;

        let objects: usize = outcome.outputs.iter().map(|(_, n)| n).sum();
        tracing::info!(objects, "Prediction finished");
        Ok(outcome.report)
    }
}
