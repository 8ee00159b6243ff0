//! In-memory adapters for development and testing.
//!
//! Training polygons are indexed with an R-tree per training set and CRS.
//! `MemoryDataCube` supports injecting data gaps and outages so pipeline
//! failure handling can be exercised without real imagery.

use async_trait::async_trait;
use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::{
    BoundingBox, ClassifierArtifact, Crs, GridSpec, ModelSummary, Polygon, RasterStack, Region,
    SegmentationResult, Tile, TileKey,
};
use landcube_geo::Reprojector;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::cube::{crop_to_tile, native_key};
use crate::ports::{DataCube, MetadataStore};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| LandcubeError::Store("memory store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| LandcubeError::Store("memory store lock poisoned".to_string()))
}

/// Region bounds expressed in `crs`
pub(crate) fn region_bbox_in(region: &Region, crs: &Crs) -> Result<BoundingBox> {
    Reprojector::new(&region.crs, crs)?.bbox(&region.bbox)
}

/// In-memory raster data cube holding native grid cells
#[derive(Debug, Clone, Default)]
pub struct MemoryDataCube {
    grids: Arc<RwLock<HashMap<String, GridSpec>>>,
    cells: Arc<RwLock<HashMap<(String, TileKey), RasterStack>>>,
    gaps: Arc<RwLock<HashSet<(String, String)>>>,
}

impl MemoryDataCube {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_product(&self, product: &str, grid: GridSpec) -> Result<()> {
        grid.validate()?;
        write(&self.grids)?.insert(product.to_string(), grid);
        Ok(())
    }

    /// Store the stack of native cell (x, y)
    pub fn insert_cell(&self, product: &str, x: i64, y: i64, stack: RasterStack) -> Result<()> {
        write(&self.cells)?.insert((product.to_string(), TileKey::new(x, y)), stack);
        Ok(())
    }

    /// Make every request for a tile with this cell id fail with `DataGap`
    pub fn inject_gap(&self, product: &str, cell_id: &str) -> Result<()> {
        write(&self.gaps)?.insert((product.to_string(), cell_id.to_string()));
        Ok(())
    }
}

#[async_trait]
impl DataCube for MemoryDataCube {
    async fn grid(&self, product: &str) -> Result<GridSpec> {
        read(&self.grids)?.get(product).cloned().ok_or_else(|| LandcubeError::TileNotFound {
            product: product.to_string(),
            tile: "*".to_string(),
        })
    }

    async fn get_raster(&self, product: &str, tile: &Tile) -> Result<RasterStack> {
        if read(&self.gaps)?.contains(&(product.to_string(), tile.key.cell_id())) {
            return Err(LandcubeError::DataGap {
                product: product.to_string(),
                tile: tile.key.to_string(),
                reason: "no acquisitions recorded for this cell".to_string(),
            });
        }

        let grid = self.grid(product).await?;
        let key = native_key(&grid, tile);
        let cells = read(&self.cells)?;
        let native = cells.get(&(product.to_string(), key)).ok_or_else(|| LandcubeError::TileNotFound {
            product: product.to_string(),
            tile: tile.key.to_string(),
        })?;
        crop_to_tile(native, tile)
    }
}

type IndexedBox = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// Polygons indexed by bounding box, grouped by CRS
#[derive(Debug, Default)]
struct PolygonIndex {
    polygons: Vec<Polygon>,
    trees: Vec<(Crs, RTree<IndexedBox>)>,
}

impl PolygonIndex {
    fn build(polygons: Vec<Polygon>) -> Self {
        let mut groups: Vec<(Crs, Vec<IndexedBox>)> = Vec::new();
        for (idx, polygon) in polygons.iter().enumerate() {
            let Some(bbox) = polygon.bbox() else { continue };
            let entry = GeomWithData::new(
                Rectangle::from_corners([bbox.min_x, bbox.min_y], [bbox.max_x, bbox.max_y]),
                idx,
            );
            match groups.iter_mut().find(|(crs, _)| crs == &polygon.crs) {
                Some((_, items)) => items.push(entry),
                None => groups.push((polygon.crs.clone(), vec![entry])),
            }
        }

        let trees = groups.into_iter().map(|(crs, items)| (crs, RTree::bulk_load(items))).collect();
        Self { polygons, trees }
    }

    fn query(&self, region: &Region) -> Result<Vec<Polygon>> {
        let mut hits: Vec<usize> = Vec::new();
        for (crs, tree) in &self.trees {
            let bbox = region_bbox_in(region, crs)?;
            let envelope = AABB::from_corners([bbox.min_x, bbox.min_y], [bbox.max_x, bbox.max_y]);
            hits.extend(
                tree.locate_in_envelope_intersecting(&envelope)
                    .map(|item| item.data)
                    .filter(|idx| self.polygons[*idx].bbox().is_some_and(|b| b.intersects(&bbox))),
            );
        }
        hits.sort_unstable();
        Ok(hits.into_iter().map(|idx| self.polygons[idx].clone()).collect())
    }
}

/// In-memory metadata store
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadataStore {
    training: Arc<RwLock<HashMap<String, PolygonIndex>>>,
    models: Arc<RwLock<BTreeMap<String, ClassifierArtifact>>>,
    segmentations: Arc<RwLock<HashMap<String, Vec<SegmentationResult>>>>,
    classified: Arc<RwLock<HashMap<(String, TileKey), Vec<Polygon>>>>,
    outage: Arc<RwLock<Option<String>>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable store; every call fails with `StoreUnavailable`
    pub fn set_unavailable(&self, reason: Option<&str>) -> Result<()> {
        *write(&self.outage)? = reason.map(str::to_string);
        Ok(())
    }

    fn ensure_available(&self) -> Result<()> {
        match read(&self.outage)?.as_ref() {
            Some(reason) => Err(LandcubeError::StoreUnavailable { reason: reason.clone() }),
            None => Ok(()),
        }
    }

    /// Tiles with saved classified output for a model
    pub fn classified_tiles(&self, model_name: &str) -> Result<Vec<TileKey>> {
        let mut keys: Vec<TileKey> = read(&self.classified)?
            .keys()
            .filter(|(model, _)| model == model_name)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn query_training_polygons(&self, region: &Region, training_set: &str) -> Result<Vec<Polygon>> {
        self.ensure_available()?;
        match read(&self.training)?.get(training_set) {
            Some(index) => index.query(region),
            None => Ok(Vec::new()),
        }
    }

    async fn save_training_polygons(&self, training_set: &str, polygons: &[Polygon]) -> Result<usize> {
        self.ensure_available()?;
        let index = PolygonIndex::build(polygons.to_vec());
        write(&self.training)?.insert(training_set.to_string(), index);
        Ok(polygons.len())
    }

    async fn save_classifier_artifact(&self, name: &str, artifact: &ClassifierArtifact) -> Result<()> {
        self.ensure_available()?;
        write(&self.models)?.insert(name.to_string(), artifact.clone());
        Ok(())
    }

    async fn load_classifier_artifact(&self, name: &str) -> Result<ClassifierArtifact> {
        self.ensure_available()?;
        read(&self.models)?
            .get(name)
            .cloned()
            .ok_or_else(|| LandcubeError::ModelNotFound { name: name.to_string() })
    }

    async fn list_models(&self) -> Result<Vec<ModelSummary>> {
        self.ensure_available()?;
        Ok(read(&self.models)?.values().map(|a| a.summary()).collect())
    }

    async fn save_segmentation_result(&self, result: &SegmentationResult) -> Result<()> {
        self.ensure_available()?;
        let mut segmentations = write(&self.segmentations)?;
        let tiles = segmentations.entry(result.info.name.clone()).or_default();
        tiles.retain(|r| r.tile_key != result.tile_key);
        tiles.push(result.clone());
        Ok(())
    }

    async fn query_segmentation_polygons(&self, name: &str, region: &Region) -> Result<Vec<Polygon>> {
        self.ensure_available()?;
        let segmentations = read(&self.segmentations)?;
        let Some(tiles) = segmentations.get(name) else {
            return Ok(Vec::new());
        };

        let mut polygons = Vec::new();
        for result in tiles {
            let crs = match result.polygons.first() {
                Some(p) => p.crs.clone(),
                None => continue,
            };
            let bbox = region_bbox_in(region, &crs)?;
            polygons.extend(
                result
                    .polygons
                    .iter()
                    .filter(|p| p.bbox().is_some_and(|b| b.intersects(&bbox)))
                    .cloned(),
            );
        }
        Ok(polygons)
    }

    async fn save_classified_polygons(
        &self,
        model_name: &str,
        tile_key: &TileKey,
        polygons: &[Polygon],
    ) -> Result<()> {
        self.ensure_available()?;
        write(&self.classified)?.insert((model_name.to_string(), tile_key.clone()), polygons.to_vec());
        Ok(())
    }

    async fn load_classified_polygons(&self, model_name: &str, tile_key: &TileKey) -> Result<Vec<Polygon>> {
        self.ensure_available()?;
        Ok(read(&self.classified)?
            .get(&(model_name.to_string(), tile_key.clone()))
            .cloned()
            .unwrap_or_default())
    }

    async fn health_check(&self) -> Result<()> {
        self.ensure_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landcube_core::models::Geometry;

    fn square(id: u64, x: f64, y: f64) -> Polygon {
        Polygon::new(
            id,
            Geometry::polygon(vec![vec![[x, y], [x + 10.0, y], [x + 10.0, y + 10.0], [x, y + 10.0], [x, y]]]),
            Crs::epsg(32614),
        )
        .with_class(1)
    }

    #[tokio::test]
    async fn test_training_query_uses_region() {
        let store = MemoryMetadataStore::new();
        store
            .save_training_polygons("samples", &[square(1, 0.0, 0.0), square(2, 100.0, 100.0), square(3, 5.0, 5.0)])
            .await
            .unwrap();

        let region = Region::new(BoundingBox::new(0.0, 0.0, 20.0, 20.0), Crs::epsg(32614));
        let hits = store.query_training_polygons(&region, "samples").await.unwrap();
        let ids: Vec<u64> = hits.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 3]);

        assert!(store.query_training_polygons(&region, "other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_model_and_outage() {
        let store = MemoryMetadataStore::new();
        let err = store.load_classifier_artifact("nope").await.unwrap_err();
        assert!(matches!(err, LandcubeError::ModelNotFound { .. }));

        store.set_unavailable(Some("maintenance")).unwrap();
        let err = store.health_check().await.unwrap_err();
        assert!(err.is_fatal_to_run());
    }

    #[tokio::test]
    async fn test_classified_output_replaced_per_tile() {
        let store = MemoryMetadataStore::new();
        let key = TileKey::new(0, 0);
        store.save_classified_polygons("m", &key, &[square(1, 0.0, 0.0)]).await.unwrap();
        store.save_classified_polygons("m", &key, &[square(2, 0.0, 0.0), square(3, 0.0, 0.0)]).await.unwrap();

        assert_eq!(store.load_classified_polygons("m", &key).await.unwrap().len(), 2);
        assert_eq!(store.classified_tiles("m").unwrap(), vec![key]);
    }
}
