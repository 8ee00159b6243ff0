//! Pipeline entry point tying the collaborators, registries and worker pool together.

use crate::query::{TilePlan, TileQuery};
use crate::runner::{CancelHandle, ProgressFn, Runner, TileContext};
use landcube_core::config::LayeredConfig;
use landcube_core::error::Result;
use landcube_core::models::{RasterStack, TemporalReducer};
use landcube_model::ClassifierRegistry;
use landcube_segment::SegmenterRegistry;
use landcube_store::{DataCube, MetadataStore};
use std::sync::Arc;

/// Pool size, memory budget and reserved label of a pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub workers: usize,
    pub tile_memory_bytes: u64,
    pub background: i64,
}

impl PipelineSettings {
    pub fn from_config(config: &LayeredConfig) -> Self {
        Self {
            workers: config.workers.value,
            tile_memory_bytes: config.tile_memory_bytes(),
            background: config.background.value,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&LayeredConfig::with_defaults())
    }
}

/// Runs train, predict and segment jobs over tile queries
pub struct Pipeline {
    pub(crate) cube: Arc<dyn DataCube>,
    pub(crate) store: Arc<dyn MetadataStore>,
    pub(crate) classifiers: Arc<ClassifierRegistry>,
    pub(crate) segmenters: Arc<SegmenterRegistry>,
    pub(crate) settings: PipelineSettings,
    pub(crate) runner: Runner,
}

impl Pipeline {
    /// Pipeline with the built-in classifier and segmenter families
    pub fn new(cube: Arc<dyn DataCube>, store: Arc<dyn MetadataStore>, settings: PipelineSettings) -> Result<Self> {
        Self::with_registries(
            cube,
            store,
            settings,
            ClassifierRegistry::with_builtin(),
            SegmenterRegistry::with_builtin(),
        )
    }

    /// Pipeline with custom registries, validated before use
    pub fn with_registries(
        cube: Arc<dyn DataCube>,
        store: Arc<dyn MetadataStore>,
        settings: PipelineSettings,
        classifiers: ClassifierRegistry,
        segmenters: SegmenterRegistry,
    ) -> Result<Self> {
        classifiers.validate()?;
        segmenters.validate()?;
        let runner = Runner::new(settings.workers, CancelHandle::new());
        Ok(Self {
            cube,
            store,
            classifiers: Arc::new(classifiers),
            segmenters: Arc::new(segmenters),
            settings,
            runner,
        })
    }

    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.runner = self.runner.with_progress(progress);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn classifiers(&self) -> &ClassifierRegistry {
        &self.classifiers
    }

    pub fn segmenters(&self) -> &SegmenterRegistry {
        &self.segmenters
    }

    /// Handle that cancels the runs of this pipeline
    pub fn cancel_handle(&self) -> CancelHandle {
        self.runner.cancel_handle().clone()
    }

    /// Partition a query without running anything
    pub async fn plan(&self, query: &TileQuery) -> Result<TilePlan> {
        let grid = self.cube.grid(&query.product).await?;
        TilePlan::new(&grid, query, self.settings.tile_memory_bytes)
    }
}

/// Read the tile's stack, composited over time when a recipe is given
pub(crate) async fn fetch_raster(
    ctx: &TileContext,
    cube: &dyn DataCube,
    recipe: Option<TemporalReducer>,
) -> Result<RasterStack> {
    let tile = ctx.tile();
    let raster = ctx.interruptible(cube.get_raster(&tile.product, tile)).await?;
    tracing::debug!(
        bands = raster.band_count(),
        dates = raster.time_count(),
        bytes = raster.memory_bytes(),
        "Fetched raster"
    );
    Ok(match recipe {
        Some(reducer) => raster.reduce_time(reducer),
        None => raster,
    })
}
