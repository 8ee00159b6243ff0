//! Feature table builders.
//!
//! Extraction happens in two steps. `extract_raw` turns one raster and its
//! entities into a `RawTable` holding numeric values and raw category strings.
//! Raw tables from several tiles can be merged before encoding, so category
//! dictionaries are learned once over the whole training set. Encoding then
//! either learns a `ColumnSchema` (training) or replays a stored one
//! (prediction).

use crate::encoding::{learn_categories, one_hot};
use crate::zonal::{zonal_statistics, ZonalStatistics};
use landcube_core::config::default_statistics;
use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::raster::is_nodata;
use landcube_core::models::{
    CategoricalSchema, CategorySource, ColumnSchema, EntityId, ExtractionMode, FeatureMatrix,
    LabelArray, Polygon, PolygonId, RasterLayer, RasterStack, Statistic,
};
use landcube_geo::{rasterize, validate_polygons, RasterizeOptions};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// A categorical input column and where its values come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalColumn {
    pub name: String,
    pub source: CategorySource,
}

impl CategoricalColumn {
    /// Column read from the entity attribute of the same name
    pub fn attribute(name: impl Into<String>) -> Self {
        Self { name: name.into(), source: CategorySource::Attribute }
    }

    /// Column read from a raster layer (majority per zone, value per pixel)
    pub fn layer(name: impl Into<String>, layer: impl Into<String>) -> Self {
        Self { name: name.into(), source: CategorySource::Layer(layer.into()) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableOptions {
    pub mode: ExtractionMode,
    pub stats: Vec<Statistic>,
    pub categorical: Vec<CategoricalColumn>,
    /// Numeric layers to use; all non-categorical layers when `None`
    pub layers: Option<Vec<String>>,
    /// Reserved label of uncovered pixels
    pub background: i64,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::Zonal,
            stats: default_statistics(),
            categorical: Vec::new(),
            layers: None,
            background: 0,
        }
    }
}

impl TableOptions {
    /// Options that reproduce the layout of a stored schema
    pub fn from_schema(schema: &ColumnSchema, background: i64) -> Self {
        Self {
            mode: schema.mode,
            stats: schema.stats.clone(),
            categorical: schema
                .categorical
                .iter()
                .map(|c| CategoricalColumn { name: c.column.clone(), source: c.source.clone() })
                .collect(),
            layers: Some(schema.layers.clone()),
            background,
        }
    }
}

/// Which entities become rows
#[derive(Debug, Clone, Copy)]
pub enum Entities<'a> {
    Polygons(&'a [Polygon]),
    /// Every pixel of the tile (pixel mode only)
    AllPixels,
}

/// Extracted rows before categorical encoding
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub mode: ExtractionMode,
    pub stats: Vec<Statistic>,
    pub layers: Vec<String>,
    pub categorical: Vec<CategoricalColumn>,
    pub entity_ids: Vec<EntityId>,
    /// Row-major numeric values, NaN where missing
    pub numeric: Vec<f64>,
    /// Raw category per row and categorical column
    pub categories: Vec<Vec<Option<String>>>,
    pub labels: Vec<Option<i64>>,
}

/// Encoded training rows with the schema learned from them
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingTable {
    pub matrix: FeatureMatrix,
    pub labels: Vec<i64>,
    pub schema: ColumnSchema,
}

impl RawTable {
    fn empty(mode: ExtractionMode, stats: Vec<Statistic>, layers: Vec<String>, categorical: Vec<CategoricalColumn>) -> Self {
        Self {
            mode,
            stats,
            layers,
            categorical,
            entity_ids: Vec::new(),
            numeric: Vec::new(),
            categories: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entity_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_ids.is_empty()
    }

    /// Numeric values per row
    pub fn numeric_width(&self) -> usize {
        match self.mode {
            ExtractionMode::Zonal => self.layers.len() * self.stats.len(),
            ExtractionMode::Pixel => self.layers.len(),
        }
    }

    fn same_layout(&self, other: &RawTable) -> bool {
        self.mode == other.mode
            && self.stats == other.stats
            && self.layers == other.layers
            && self.categorical == other.categorical
    }

    /// Concatenate tables in the order given
    ///
    /// Returns `None` for an empty input. Tables must share one column layout.
    pub fn merge(tables: impl IntoIterator<Item = RawTable>) -> Result<Option<RawTable>> {
        let mut iter = tables.into_iter();
        let Some(mut merged) = iter.next() else {
            return Ok(None);
        };

        for table in iter {
            if !merged.same_layout(&table) {
                return Err(LandcubeError::SchemaMismatch {
                    reason: format!(
                        "cannot merge tables with layers [{}] and [{}]",
                        merged.layers.join(", "),
                        table.layers.join(", ")
                    ),
                });
            }
            merged.entity_ids.extend(table.entity_ids);
            merged.numeric.extend(table.numeric);
            merged.categories.extend(table.categories);
            merged.labels.extend(table.labels);
        }

        Ok(Some(merged))
    }

    /// Learn category dictionaries and the column layout from these rows
    pub fn learn_schema(&self) -> ColumnSchema {
        let categorical: Vec<CategoricalSchema> = self
            .categorical
            .iter()
            .enumerate()
            .map(|(i, col)| {
                learn_categories(
                    &col.name,
                    col.source.clone(),
                    self.categories.iter().map(|row| row[i].as_deref()),
                )
            })
            .collect();

        let columns =
            ColumnSchema::expand_columns(self.mode, &self.layers, &self.stats, &categorical);
        ColumnSchema {
            mode: self.mode,
            stats: self.stats.clone(),
            layers: self.layers.clone(),
            categorical,
            columns,
        }
    }

    /// Encode rows with a given schema; unseen categories become all-zero columns
    pub fn encode(&self, schema: &ColumnSchema) -> Result<FeatureMatrix> {
        if self.mode != schema.mode || self.stats != schema.stats || self.layers != schema.layers {
            return Err(LandcubeError::SchemaMismatch {
                reason: format!(
                    "extracted numeric columns ({:?}, [{}]) differ from schema ({:?}, [{}])",
                    self.mode,
                    self.layers.join(", "),
                    schema.mode,
                    schema.layers.join(", ")
                ),
            });
        }

        let width = self.numeric_width();
        let mut values = Array2::<f64>::zeros((self.len(), schema.len()));

        for row in 0..self.len() {
            let numeric = &self.numeric[row * width..(row + 1) * width];
            let mut col = 0;
            for v in numeric {
                values[[row, col]] = *v;
                col += 1;
            }
            for cat in &schema.categorical {
                // Columns absent from this table encode as "no category"
                let raw = self
                    .categorical
                    .iter()
                    .position(|c| c.name == cat.column)
                    .and_then(|i| self.categories[row][i].as_deref());
                for v in one_hot(cat, raw) {
                    values[[row, col]] = v;
                    col += 1;
                }
            }
        }

        FeatureMatrix::new(self.entity_ids.clone(), schema.column_names(), values)
    }

    /// Keep labeled rows, learn the schema and encode
    pub fn into_training(self) -> Result<TrainingTable> {
        let unlabeled = self.labels.iter().filter(|l| l.is_none()).count();
        if unlabeled > 0 {
            tracing::warn!(rows = unlabeled, "Dropping training rows without a class code");
        }

        let width = self.numeric_width();
        let mut kept = RawTable::empty(self.mode, self.stats.clone(), self.layers.clone(), self.categorical.clone());
        for (row, label) in self.labels.iter().enumerate() {
            if label.is_some() {
                kept.entity_ids.push(self.entity_ids[row]);
                kept.numeric.extend_from_slice(&self.numeric[row * width..(row + 1) * width]);
                kept.categories.push(self.categories[row].clone());
                kept.labels.push(*label);
            }
        }

        if kept.is_empty() {
            return Err(LandcubeError::EmptyTrainingSet {
                context: "no labeled entity has a valid pixel in the raster".to_string(),
            });
        }

        let schema = kept.learn_schema();
        let matrix = kept.encode(&schema)?;
        let labels = kept.labels.into_iter().flatten().collect();
        Ok(TrainingTable { matrix, labels, schema })
    }
}

/// Resolve numeric and categorical layers, failing on missing ones
fn resolve_layers(raster: &RasterStack, options: &TableOptions) -> Result<Vec<String>> {
    let available = raster.layer_names();
    let categorical_layers: Vec<&str> = options
        .categorical
        .iter()
        .filter_map(|c| match &c.source {
            CategorySource::Layer(name) => Some(name.as_str()),
            CategorySource::Attribute => None,
        })
        .collect();

    let numeric = match &options.layers {
        Some(layers) => layers.clone(),
        None => available
            .iter()
            .filter(|l| !categorical_layers.contains(&l.as_str()))
            .cloned()
            .collect(),
    };

    for name in numeric.iter().map(String::as_str).chain(categorical_layers.iter().copied()) {
        if !available.iter().any(|a| a == name) {
            return Err(LandcubeError::SchemaMismatch {
                reason: format!(
                    "raster is missing layer '{}' (available: {})",
                    name,
                    available.join(", ")
                ),
            });
        }
    }

    Ok(numeric)
}

fn select_layers<'a>(all: &[RasterLayer<'a>], names: &[String]) -> Vec<RasterLayer<'a>> {
    names.iter().filter_map(|n| all.iter().find(|l| &l.name == n).cloned()).collect()
}

fn render_category(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn attribute_category(polygon: &Polygon, column: &str) -> Option<String> {
    polygon.attribute(column).map(|v| v.as_category())
}

/// Extract raw rows for one raster
///
/// Polygons must already be in the raster CRS. Invalid polygons are skipped
/// with a warning; entities without any valid pixel produce no row.
pub fn extract_raw(entities: Entities<'_>, raster: &RasterStack, options: &TableOptions) -> Result<RawTable> {
    let layers = resolve_layers(raster, options)?;
    let mut table = RawTable::empty(options.mode, options.stats.clone(), layers, options.categorical.clone());

    let all_layers = raster.layers();
    let numeric_layers = select_layers(&all_layers, &table.layers);

    match (options.mode, entities) {
        (ExtractionMode::Zonal, Entities::Polygons(polygons)) => {
            extract_zonal(&mut table, polygons, raster, &all_layers, &numeric_layers, options)?
        }
        (ExtractionMode::Zonal, Entities::AllPixels) => {
            return Err(LandcubeError::SchemaMismatch {
                reason: "zonal extraction requires polygons".to_string(),
            })
        }
        (ExtractionMode::Pixel, entities) => {
            extract_pixels(&mut table, entities, raster, &all_layers, &numeric_layers, options)?
        }
    }

    Ok(table)
}

/// Valid polygons burned under positional labels
///
/// Stored ids are not trusted as burn values: they may be zero, equal the
/// background or repeat. Polygon `i` is burned as `first + i` instead.
struct Burned {
    polygons: Vec<Polygon>,
    labels: LabelArray,
    first: i64,
}

impl Burned {
    fn label(&self, index: usize) -> i64 {
        self.first + index as i64
    }

    fn owner(&self, label: i64) -> Option<&Polygon> {
        usize::try_from(label - self.first).ok().and_then(|i| self.polygons.get(i))
    }
}

fn burn_polygons(polygons: &[Polygon], raster: &RasterStack, background: i64) -> Result<Burned> {
    let (valid, _) = validate_polygons(polygons.to_vec());
    let first = background.max(0) + 1;
    let positional: Vec<Polygon> = valid
        .iter()
        .enumerate()
        .map(|(i, p)| Polygon { id: (first + i as i64) as PolygonId, ..p.clone() })
        .collect();
    let labels = rasterize(
        &positional,
        raster.shape(),
        &raster.transform,
        &raster.crs,
        &RasterizeOptions { background, ..Default::default() },
    )?;
    Ok(Burned { polygons: valid, labels, first })
}

fn extract_zonal(
    table: &mut RawTable,
    polygons: &[Polygon],
    raster: &RasterStack,
    all_layers: &[RasterLayer<'_>],
    numeric_layers: &[RasterLayer<'_>],
    options: &TableOptions,
) -> Result<()> {
    let burned = burn_polygons(polygons, raster, options.background)?;
    let labels = &burned.labels;
    let background = Some(options.background);

    let zonal = zonal_statistics(labels, numeric_layers, &options.stats, background)?;

    let category_layers: Vec<String> = options
        .categorical
        .iter()
        .filter_map(|c| match &c.source {
            CategorySource::Layer(name) => Some(name.clone()),
            CategorySource::Attribute => None,
        })
        .collect();
    let category_zonal: ZonalStatistics = if category_layers.is_empty() {
        ZonalStatistics::default()
    } else {
        zonal_statistics(labels, &select_layers(all_layers, &category_layers), &[Statistic::Mode], background)?
    };

    let mut excluded = 0usize;

    for (index, polygon) in burned.polygons.iter().enumerate() {
        let label = burned.label(index);
        let has_rows = match zonal.zone(label) {
            Some(zone) if numeric_layers.is_empty() => zone.pixel_count > 0,
            Some(zone) => zone.has_valid_pixels(),
            None => false,
        };
        if !has_rows {
            excluded += 1;
            continue;
        }

        let zone = zonal.zone(label);
        for layer in &table.layers {
            for stat in &table.stats {
                let value = zone.and_then(|z| z.get(layer, *stat)).unwrap_or(f64::NAN);
                table.numeric.push(value);
            }
        }

        let row: Vec<Option<String>> = options
            .categorical
            .iter()
            .map(|col| match &col.source {
                CategorySource::Attribute => attribute_category(polygon, &col.name),
                CategorySource::Layer(layer) => {
                    category_zonal.get(label, layer, Statistic::Mode).map(render_category)
                }
            })
            .collect();

        table.entity_ids.push(polygon.id);
        table.categories.push(row);
        table.labels.push(polygon.class_code);
    }

    if excluded > 0 {
        tracing::debug!(excluded, "Polygons without valid pixels contribute no rows");
    }
    Ok(())
}

fn extract_pixels(
    table: &mut RawTable,
    entities: Entities<'_>,
    raster: &RasterStack,
    all_layers: &[RasterLayer<'_>],
    numeric_layers: &[RasterLayer<'_>],
    options: &TableOptions,
) -> Result<()> {
    let (rows, cols) = raster.shape();

    let burned = match entities {
        Entities::Polygons(polygons) => Some(burn_polygons(polygons, raster, options.background)?),
        Entities::AllPixels => None,
    };

    let category_layers: Vec<Option<RasterLayer<'_>>> = options
        .categorical
        .iter()
        .map(|c| match &c.source {
            CategorySource::Layer(name) => all_layers.iter().find(|l| &l.name == name).cloned(),
            CategorySource::Attribute => None,
        })
        .collect();

    let mut values = Vec::with_capacity(numeric_layers.len());
    for r in 0..rows {
        for c in 0..cols {
            let owner = match &burned {
                Some(burned) => {
                    let label = burned.labels[[r, c]];
                    if label == options.background {
                        continue;
                    }
                    burned.owner(label)
                }
                None => None,
            };

            values.clear();
            values.extend(numeric_layers.iter().map(|layer| {
                let v = layer.values[[r, c]];
                if is_nodata(v, layer.nodata) {
                    f64::NAN
                } else {
                    v
                }
            }));
            if !values.is_empty() && values.iter().all(|v| v.is_nan()) {
                continue;
            }

            let row: Vec<Option<String>> = options
                .categorical
                .iter()
                .zip(&category_layers)
                .map(|(col, layer)| match (&col.source, layer) {
                    (CategorySource::Attribute, _) => owner.and_then(|p| attribute_category(p, &col.name)),
                    (CategorySource::Layer(_), Some(layer)) => {
                        let v = layer.values[[r, c]];
                        (!is_nodata(v, layer.nodata)).then(|| render_category(v))
                    }
                    (CategorySource::Layer(_), None) => None,
                })
                .collect();

            table.entity_ids.push((r * cols + c) as EntityId);
            table.numeric.extend_from_slice(&values);
            table.categories.push(row);
            table.labels.push(owner.and_then(|p| p.class_code));
        }
    }

    Ok(())
}

/// Build the training matrix, label vector and column schema for one raster
pub fn build_training_table(
    polygons: &[Polygon],
    raster: &RasterStack,
    options: &TableOptions,
) -> Result<TrainingTable> {
    if polygons.is_empty() {
        return Err(LandcubeError::EmptyTrainingSet { context: "no training polygons".to_string() });
    }
    extract_raw(Entities::Polygons(polygons), raster, options)?.into_training()
}

/// Build a prediction matrix whose columns match `schema` exactly
pub fn build_prediction_table(
    entities: Entities<'_>,
    raster: &RasterStack,
    schema: &ColumnSchema,
    background: i64,
) -> Result<FeatureMatrix> {
    let options = TableOptions::from_schema(schema, background);
    extract_raw(entities, raster, &options)?.encode(schema)
}
