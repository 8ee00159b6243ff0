//! Filesystem adapters rooted at a data directory (default `.landcube/`).
//!
//! Layout:
//!
//! ```text
//! cube/<product>/grid.json
//! cube/<product>/tiles/<x>_<y>.json          RasterStack of one native cell
//! training/<set>.geojson
//! models/<name>.json                          ClassifierArtifact
//! segmentations/<name>/<tile>.geojson         one tile's segments + provenance
//! classified/<model>/<tile>.geojson
//! ```
//!
//! Every write goes to a temporary file in the target directory and is then
//! renamed into place, so readers never observe a partial file.

use async_trait::async_trait;
use geojson::{FeatureCollection, JsonObject};
use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::{
    ClassifierArtifact, GridSpec, ModelSummary, Polygon, RasterStack, Region, SegmentationInfo,
    SegmentationResult, Tile, TileKey,
};
use landcube_geo::models::{polygons_from_geojson, polygons_to_feature_collection};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::cube::{crop_to_tile, native_key};
use crate::memory::region_bbox_in;
use crate::ports::{DataCube, MetadataStore};

const SEGMENTATION_MEMBER: &str = "segmentation";
const TILE_MEMBER: &str = "tile";

/// Write `contents` to `path` atomically
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().ok_or_else(|| {
        LandcubeError::Store(format!("{} has no parent directory", path.display()))
    })?;
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| LandcubeError::Io(e.error))?;
    Ok(())
}

fn read_to_string_opt(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reject names that would escape their directory
fn safe_name<'a>(kind: &str, name: &'a str) -> Result<&'a str> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(LandcubeError::ConfigInvalid {
            key: kind.to_string(),
            reason: format!("'{}' is not a valid {} name", name, kind),
        });
    }
    Ok(name)
}

/// Raster cube stored as JSON-serialized native cells
#[derive(Debug, Clone)]
pub struct FsDataCube {
    root: PathBuf,
}

impl FsDataCube {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { root: data_dir.into().join("cube") }
    }

    fn product_dir(&self, product: &str) -> Result<PathBuf> {
        Ok(self.root.join(safe_name("product", product)?))
    }

    /// Register a product grid
    pub fn write_grid(&self, product: &str, grid: &GridSpec) -> Result<()> {
        grid.validate()?;
        let path = self.product_dir(product)?.join("grid.json");
        write_atomic(&path, &serde_json::to_vec_pretty(grid)?)
    }

    /// Store the stack of native cell (x, y)
    pub fn write_cell(&self, product: &str, x: i64, y: i64, stack: &RasterStack) -> Result<()> {
        let path = self.product_dir(product)?.join("tiles").join(format!("{}.json", TileKey::new(x, y).cell_id()));
        write_atomic(&path, &serde_json::to_vec(stack)?)
    }
}

#[async_trait]
impl DataCube for FsDataCube {
    async fn grid(&self, product: &str) -> Result<GridSpec> {
        let path = self.product_dir(product)?.join("grid.json");
        let content = read_to_string_opt(&path)?.ok_or_else(|| LandcubeError::TileNotFound {
            product: product.to_string(),
            tile: "*".to_string(),
        })?;
        let grid: GridSpec = serde_json::from_str(&content)?;
        grid.validate()?;
        Ok(grid)
    }

    async fn get_raster(&self, product: &str, tile: &Tile) -> Result<RasterStack> {
        let grid = self.grid(product).await?;
        let key = native_key(&grid, tile);
        let path = self.product_dir(product)?.join("tiles").join(format!("{}.json", key.cell_id()));
        let tile = tile.clone();
        let product = product.to_string();

        // Cells can be large; parse off the async workers
        tokio::task::spawn_blocking(move || {
            let content = read_to_string_opt(&path)?.ok_or_else(|| LandcubeError::TileNotFound {
                product: product.clone(),
                tile: tile.key.to_string(),
            })?;
            let native: RasterStack = serde_json::from_str(&content)?;
            native.validate()?;
            crop_to_tile(&native, &tile)
        })
        .await
        .map_err(|e| LandcubeError::Store(format!("raster read task failed: {}", e)))?
    }
}

/// Metadata store backed by JSON and GeoJSON files
#[derive(Debug, Clone)]
pub struct FsMetadataStore {
    root: PathBuf,
}

impl FsMetadataStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { root: data_dir.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn training_path(&self, training_set: &str) -> Result<PathBuf> {
        Ok(self.root.join("training").join(format!("{}.geojson", safe_name("training set", training_set)?)))
    }

    fn model_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join("models").join(format!("{}.json", safe_name("model", name)?)))
    }

    fn segmentation_dir(&self, name: &str) -> Result<PathBuf> {
        Ok(self.root.join("segmentations").join(safe_name("segmentation", name)?))
    }

    fn classified_path(&self, model_name: &str, tile_key: &TileKey) -> Result<PathBuf> {
        Ok(self
            .root
            .join("classified")
            .join(safe_name("model", model_name)?)
            .join(format!("{}.geojson", tile_key)))
    }

    fn write_polygons(path: &Path, polygons: &[Polygon], extra: Option<JsonObject>) -> Result<()> {
        let mut collection: FeatureCollection = polygons_to_feature_collection(polygons)?;
        if let Some(extra) = extra {
            collection.foreign_members.get_or_insert_with(JsonObject::new).extend(extra);
        }
        let content = serde_json::to_vec(&collection)?;
        write_atomic(path, &content)
    }

    fn read_polygons(path: &Path) -> Result<Vec<Polygon>> {
        match read_to_string_opt(path)? {
            Some(content) => polygons_from_geojson(&content),
            None => Ok(Vec::new()),
        }
    }

    fn geojson_files(dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "geojson" || ext == "json"))
            .collect();
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl MetadataStore for FsMetadataStore {
    async fn query_training_polygons(&self, region: &Region, training_set: &str) -> Result<Vec<Polygon>> {
        let path = self.training_path(training_set)?;
        let polygons = Self::read_polygons(&path)?;
        if polygons.is_empty() {
            tracing::warn!(training_set, path = %path.display(), "Training set is empty or missing");
            return Ok(polygons);
        }

        // One file holds one CRS
        let bbox = region_bbox_in(region, &polygons[0].crs)?;
        Ok(polygons.into_iter().filter(|p| p.bbox().is_some_and(|b| b.intersects(&bbox))).collect())
    }

    async fn save_training_polygons(&self, training_set: &str, polygons: &[Polygon]) -> Result<usize> {
        Self::write_polygons(&self.training_path(training_set)?, polygons, None)?;
        Ok(polygons.len())
    }

    async fn save_classifier_artifact(&self, name: &str, artifact: &ClassifierArtifact) -> Result<()> {
        let path = self.model_path(name)?;
        write_atomic(&path, &serde_json::to_vec_pretty(artifact)?)?;
        tracing::debug!(model = name, path = %path.display(), "Saved classifier artifact");
        Ok(())
    }

    async fn load_classifier_artifact(&self, name: &str) -> Result<ClassifierArtifact> {
        let content = read_to_string_opt(&self.model_path(name)?)?
            .ok_or_else(|| LandcubeError::ModelNotFound { name: name.to_string() })?;
        Ok(serde_json::from_str(&content)?)
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>> {
        let mut summaries = Vec::new();
        for path in Self::geojson_files(&self.root.join("models"))? {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<ClassifierArtifact>(&content) {
                Ok(artifact) => summaries.push(artifact.summary()),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable model file"),
            }
        }
        Ok(summaries)
    }

    async fn save_segmentation_result(&self, result: &SegmentationResult) -> Result<()> {
        let path = self.segmentation_dir(&result.info.name)?.join(format!("{}.geojson", result.tile_key));
        let mut extra = JsonObject::new();
        extra.insert(SEGMENTATION_MEMBER.to_string(), serde_json::to_value(&result.info)?);
        extra.insert(TILE_MEMBER.to_string(), serde_json::to_value(&result.tile_key)?);
        Self::write_polygons(&path, &result.polygons, Some(extra))
    }

    async fn query_segmentation_polygons(&self, name: &str, region: &Region) -> Result<Vec<Polygon>> {
        let mut polygons = Vec::new();
        for path in Self::geojson_files(&self.segmentation_dir(name)?)? {
            let tile_polygons = Self::read_polygons(&path)?;
            let Some(first) = tile_polygons.first() else { continue };
            let bbox = region_bbox_in(region, &first.crs)?;
            polygons.extend(tile_polygons.into_iter().filter(|p| p.bbox().is_some_and(|b| b.intersects(&bbox))));
        }
        Ok(polygons)
    }

    async fn save_classified_polygons(
        &self,
        model_name: &str,
        tile_key: &TileKey,
        polygons: &[Polygon],
    ) -> Result<()> {
        Self::write_polygons(&self.classified_path(model_name, tile_key)?, polygons, None)
    }

    async fn load_classified_polygons(&self, model_name: &str, tile_key: &TileKey) -> Result<Vec<Polygon>> {
        Self::read_polygons(&self.classified_path(model_name, tile_key)?)
    }

    async fn health_check(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root).map_err(|e| LandcubeError::StoreUnavailable {
            reason: format!("{}: {}", self.root.display(), e),
        })?;
        let marker = self.root.join(".health");
        write_atomic(&marker, b"ok").map_err(|e| LandcubeError::StoreUnavailable { reason: e.to_string() })?;
        let _ = std::fs::remove_file(marker);
        Ok(())
    }
}

/// Provenance stored alongside a segmentation tile file
pub fn read_segmentation_info(path: &Path) -> Result<Option<SegmentationInfo>> {
    let Some(content) = read_to_string_opt(path)? else {
        return Ok(None);
    };
    let value: serde_json::Value = serde_json::from_str(&content)?;
    value
        .get(SEGMENTATION_MEMBER)
        .map(|info| serde_json::from_value(info.clone()).map_err(LandcubeError::from))
        .transpose()
}
