use async_trait::async_trait;
use landcube_core::error::Result;
use landcube_core::models::{
    ClassifierArtifact, GridSpec, ModelSummary, Polygon, RasterStack, Region, SegmentationResult,
    Tile, TileKey,
};

/// Port for the raster data cube
///
/// The cube owns spatial and temporal indexing of a product; the pipeline only
/// asks for the grid layout and for the stack of one tile at a time.
#[async_trait]
pub trait DataCube: Send + Sync {
    /// Grid layout (CRS, resolution, native tile size, bands, dates) of a product
    async fn grid(&self, product: &str) -> Result<GridSpec>;

    /// Raster stack covering exactly `tile`
    ///
    /// Fails with `TileNotFound` when the cube has no data for the cell and
    /// with `DataGap` when the cell exists but not for the requested dates.
    /// Both are recoverable per tile.
    async fn get_raster(&self, product: &str, tile: &Tile) -> Result<RasterStack>;
}

/// Port for the metadata and training-label store
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Labeled training polygons of a training set intersecting `region`
    ///
    /// Polygons are returned in their stored CRS and stored order.
    async fn query_training_polygons(&self, region: &Region, training_set: &str) -> Result<Vec<Polygon>>;

    /// Replace the polygons of a training set
    async fn save_training_polygons(&self, training_set: &str, polygons: &[Polygon]) -> Result<usize>;

    /// Persist a fitted classifier under `name`, replacing any previous artifact
    async fn save_classifier_artifact(&self, name: &str, artifact: &ClassifierArtifact) -> Result<()>;

    /// Load a classifier artifact (with its column schema) by name
    async fn load_classifier_artifact(&self, name: &str) -> Result<ClassifierArtifact>;

    async fn list_models(&self) -> Result<Vec<ModelSummary>>;

    /// Persist one tile's segmentation as a unit
    async fn save_segmentation_result(&self, result: &SegmentationResult) -> Result<()>;

    /// Segments of a named segmentation intersecting `region`
    async fn query_segmentation_polygons(&self, name: &str, region: &Region) -> Result<Vec<Polygon>>;

    /// Persist one tile's classified polygons, replacing earlier output for that tile
    async fn save_classified_polygons(
        &self,
        model_name: &str,
        tile_key: &TileKey,
        polygons: &[Polygon],
    ) -> Result<()>;

    /// Classified polygons previously saved for one tile (empty if none)
    async fn load_classified_polygons(&self, model_name: &str, tile_key: &TileKey) -> Result<Vec<Polygon>>;

    /// Fails with `StoreUnavailable` when the store cannot be reached
    async fn health_check(&self) -> Result<()>;
}
