//! Segmentation: split every tile into segments and store them as polygons.

use crate::pipeline::{fetch_raster, Pipeline};
use crate::query::TileQuery;
use crate::report::RunReport;
use crate::runner::{run_blocking, TileContext, TileTask};
use crate::stage::TileStage;
use async_trait::async_trait;
use landcube_core::error::Result;
use landcube_core::models::Crs;
use landcube_segment::{Segmentation, SegmenterRegistry};
use landcube_store::{DataCube, MetadataStore};
use std::sync::Arc;

/// Segment a region and store the result under `name`
#[derive(Debug, Clone)]
pub struct SegmentJob {
    pub name: String,
    pub datasource: String,
    pub year: i32,
    pub algorithm: String,
    pub params: Vec<String>,
    /// Bands to segment on; all bands when empty
    pub bands: Vec<String>,
    /// CRS the stored polygons are reprojected to
    pub crs_out: Option<Crs>,
}

struct SegmentTileTask {
    cube: Arc<dyn DataCube>,
    store: Arc<dyn MetadataStore>,
    segmenters: Arc<SegmenterRegistry>,
    job: SegmentJob,
}

#[async_trait]
impl TileTask for SegmentTileTask {
    type Output = usize;

    async fn run(&self, ctx: &mut TileContext) -> Result<usize> {
        ctx.enter(TileStage::Fetching)?;
        let raster = fetch_raster(ctx, &*self.cube, None).await?;

        ctx.enter(TileStage::Segmenting)?;
        let segmenter = self.segmenters.create(&self.job.algorithm, &self.job.params)?;
        let bands = self.job.bands.clone();
        let crs_out = self.job.crs_out.clone();
        let segmentation = run_blocking(move || {
            let mut segmentation = Segmentation::new(&raster, &bands, segmenter)?;
            segmentation.segment()?;
            segmentation.polygonize(crs_out.as_ref())?;
            Ok(segmentation)
        })
        .await?;

        ctx.enter(TileStage::Persisting)?;
        let result = segmentation
            .to_store(&*self.store, &self.job.name, &self.job.datasource, self.job.year, ctx.key())
            .await?;
        Ok(result.len())
    }
}

impl Pipeline {
    /// Segment every tile of `query`; each tile's polygons are saved as one unit
    pub async fn segment(&self, query: &TileQuery, job: &SegmentJob) -> Result<RunReport> {
        self.segmenters.create(&job.algorithm, &job.params)?;
        self.store.health_check().await?;

        let plan = self.plan(query).await?;
        tracing::info!(
            segmentation = %job.name,
            algorithm = %job.algorithm,
            tiles = plan.tiles().count(),
            "Starting segmentation run"
        );

        let task = Arc::new(SegmentTileTask {
            cube: self.cube.clone(),
            store: self.store.clone(),
            segmenters: self.segmenters.clone(),
            job: job.clone(),
        });
        let mut outcome = self.runner.run(plan.tiles(), task).await;
        outcome.check_fatal()?;

        let polygons: usize = outcome.outputs.iter().map(|(_, n)| n).sum();
        tracing::info!(polygons, "Segmentation finished");
        Ok(outcome.report)
    }
}
