//! Segmentation lifecycle: construct, segment, polygonize, persist.

use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::{
    is_nodata, Crs, LabelArray, Polygon, RasterStack, SegmentationInfo, SegmentationResult, TileKey,
};
use landcube_geo::{polygonize, reproject_polygons, PolygonizeOptions};
use landcube_store::MetadataStore;
use ndarray::{Array2, Array3};

/// Pixel values handed to a segmentation algorithm
///
/// `values` is (layer, row, col) over every band x date slice of the tile. A
/// pixel is valid when no layer holds nodata there.
#[derive(Debug, Clone)]
pub struct SegmentInput {
    pub values: Array3<f64>,
    pub valid: Array2<bool>,
}

impl SegmentInput {
    pub fn from_raster(raster: &RasterStack) -> Self {
        let layers = raster.layers();
        let (rows, cols) = raster.shape();
        let mut values = Array3::<f64>::zeros((layers.len(), rows, cols));
        let mut valid = Array2::from_elem((rows, cols), true);

        for (i, layer) in layers.iter().enumerate() {
            for ((r, c), v) in layer.values.indexed_iter() {
                values[[i, r, c]] = *v;
                if is_nodata(*v, layer.nodata) {
                    valid[[r, c]] = false;
                }
            }
        }
        Self { values, valid }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.valid.dim()
    }

    pub fn n_layers(&self) -> usize {
        self.values.shape()[0]
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }
}

/// Capability set of one segmentation family
pub trait Segmenter: Send + Sync + std::fmt::Debug {
    /// Registry name of the family
    fn algorithm(&self) -> &'static str;

    /// Parameters as a JSON object, recorded as segmentation provenance
    fn parameters(&self) -> serde_json::Value;

    /// Label every valid pixel with a segment id from 1 upward
    ///
    /// Invalid pixels get 0. Segments are 4-connected and numbered in
    /// raster-scan order of their first pixel; the result depends only on the
    /// input and the parameters.
    fn segment(&self, input: &SegmentInput) -> Result<LabelArray>;
}

/// One tile going through construct, segment, polygonize
#[derive(Debug)]
pub struct Segmentation {
    raster: RasterStack,
    segmenter: Box<dyn Segmenter>,
    labels: Option<LabelArray>,
    polygons: Option<Vec<Polygon>>,
}

impl Segmentation {
    /// Prepare a tile for segmentation on `bands` (all bands when empty)
    pub fn new(raster: &RasterStack, bands: &[String], segmenter: Box<dyn Segmenter>) -> Result<Self> {
        let raster = if bands.is_empty() { raster.clone() } else { raster.select_bands(bands)? };
        Ok(Self { raster, segmenter, labels: None, polygons: None })
    }

    pub fn algorithm(&self) -> &'static str {
        self.segmenter.algorithm()
    }

    pub fn labels(&self) -> Option<&LabelArray> {
        self.labels.as_ref()
    }

    pub fn segment(&mut self) -> Result<&LabelArray> {
        let input = SegmentInput::from_raster(&self.raster);
        let labels = self.segmenter.segment(&input)?;
        let n = labels.iter().copied().max().unwrap_or(0);
        tracing::debug!(algorithm = self.algorithm(), segments = n, "Segmented tile");

        self.polygons = None;
        Ok(self.labels.insert(labels))
    }

    /// Trace segments into polygons, optionally reprojected to `crs_out`
    pub fn polygonize(&mut self, crs_out: Option<&Crs>) -> Result<&[Polygon]> {
        let labels = self.labels.as_ref().ok_or_else(|| LandcubeError::NotSegmented {
            algorithm: self.segmenter.algorithm().to_string(),
        })?;

        let mut polygons =
            polygonize(labels, &self.raster.transform, &self.raster.crs, &PolygonizeOptions::default())?;
        if let Some(crs) = crs_out {
            polygons = reproject_polygons(polygons, crs)?;
        }
        Ok(self.polygons.insert(polygons).as_slice())
    }

    pub fn polygons(&self) -> Option<&[Polygon]> {
        self.polygons.as_deref()
    }

    /// Package the polygons with their provenance
    pub fn result(&self, name: &str, datasource: &str, year: i32, tile_key: &TileKey) -> Result<SegmentationResult> {
        let polygons = self.polygons.as_ref().ok_or_else(|| LandcubeError::NotSegmented {
            algorithm: self.segmenter.algorithm().to_string(),
        })?;
        Ok(SegmentationResult {
            info: SegmentationInfo {
                name: name.to_string(),
                datasource: datasource.to_string(),
                year,
                algorithm: self.segmenter.algorithm().to_string(),
                parameters: self.segmenter.parameters(),
            },
            tile_key: tile_key.clone(),
            polygons: polygons.clone(),
        })
    }

    /// Persist this tile's polygons as one unit
    pub async fn to_store(
        &self,
        store: &dyn MetadataStore,
        name: &str,
        datasource: &str,
        year: i32,
        tile_key: &TileKey,
    ) -> Result<SegmentationResult> {
        let result = self.result(name, datasource, year, tile_key)?;
        store.save_segmentation_result(&result).await?;
        tracing::info!(
            segmentation = name,
            tile = %tile_key,
            polygons = result.len(),
            "Stored segmentation"
        );
        Ok(result)
    }
}

/// Renumber a label grid 1..n in raster-scan order of first appearance; 0 stays 0
pub(crate) fn renumber(labels: &mut LabelArray) {
    let mut mapping = std::collections::HashMap::new();
    for v in labels.iter_mut() {
        if *v == 0 {
            continue;
        }
        let next = mapping.len() as i64 + 1;
        *v = *mapping.entry(*v).or_insert(next);
    }
}
