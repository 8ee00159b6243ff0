//! Feature table types shared by extraction and classifiers.

use crate::error::{LandcubeError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Row identifier: a polygon id in zonal mode, a flat pixel index in pixel mode
pub type EntityId = u64;

/// Aggregate computed per (label, layer) in zonal mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Statistic {
    Mean,
    Std,
    Min,
    Max,
    Median,
    Sum,
    Variance,
    Count,
    /// Majority value, ties resolved toward the smallest value
    Mode,
}

impl Statistic {
    pub const ALL: [Statistic; 9] = [
        Statistic::Mean,
        Statistic::Std,
        Statistic::Min,
        Statistic::Max,
        Statistic::Median,
        Statistic::Sum,
        Statistic::Variance,
        Statistic::Count,
        Statistic::Mode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Statistic::Mean => "mean",
            Statistic::Std => "std",
            Statistic::Min => "min",
            Statistic::Max => "max",
            Statistic::Median => "median",
            Statistic::Sum => "sum",
            Statistic::Variance => "variance",
            Statistic::Count => "count",
            Statistic::Mode => "mode",
        }
    }
}

impl FromStr for Statistic {
    type Err = LandcubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mean" | "avg" => Ok(Statistic::Mean),
            "std" | "stddev" | "standard_deviation" => Ok(Statistic::Std),
            "min" | "minimum" => Ok(Statistic::Min),
            "max" | "maximum" => Ok(Statistic::Max),
            "median" => Ok(Statistic::Median),
            "sum" => Ok(Statistic::Sum),
            "var" | "variance" => Ok(Statistic::Variance),
            "count" => Ok(Statistic::Count),
            "mode" | "majority" => Ok(Statistic::Mode),
            other => Err(LandcubeError::ConfigInvalid {
                key: "statistics".to_string(),
                reason: format!(
                    "Unknown statistic '{}'. Use one of: {}",
                    other,
                    Statistic::ALL.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                ),
            }),
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per polygon or one row per pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMode {
    Zonal,
    Pixel,
}

impl FromStr for ExtractionMode {
    type Err = LandcubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "zonal" | "object" | "polygon" => Ok(ExtractionMode::Zonal),
            "pixel" => Ok(ExtractionMode::Pixel),
            other => Err(LandcubeError::ConfigInvalid {
                key: "mode".to_string(),
                reason: format!("Unknown extraction mode '{}'. Use zonal or pixel", other),
            }),
        }
    }
}

/// Where a categorical column takes its values from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", content = "name", rename_all = "lowercase")]
pub enum CategorySource {
    /// Entity attribute with the column's name
    Attribute,
    /// Raster layer; majority value per zone, pixel value in pixel mode
    Layer(String),
}

/// Category dictionary captured at training time, in first-seen order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoricalSchema {
    pub column: String,
    pub source: CategorySource,
    pub categories: Vec<String>,
}

impl CategoricalSchema {
    pub fn code_of(&self, category: &str) -> Option<usize> {
        self.categories.iter().position(|c| c == category)
    }

    pub fn column_names(&self) -> impl Iterator<Item = String> + '_ {
        self.categories.iter().map(move |c| format!("{}_{}", self.column, c))
    }
}

/// Meaning of one matrix column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnKind {
    Statistic { layer: String, stat: Statistic },
    PixelValue { layer: String },
    OneHot { column: String, category: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn statistic(layer: &str, stat: Statistic) -> Self {
        Self {
            name: format!("{}_{}", layer, stat),
            kind: ColumnKind::Statistic { layer: layer.to_string(), stat },
        }
    }

    pub fn pixel(layer: &str) -> Self {
        Self { name: layer.to_string(), kind: ColumnKind::PixelValue { layer: layer.to_string() } }
    }

    pub fn one_hot(column: &str, category: &str) -> Self {
        Self {
            name: format!("{}_{}", column, category),
            kind: ColumnKind::OneHot { column: column.to_string(), category: category.to_string() },
        }
    }

    /// Raster layer this column reads, if any
    pub fn layer(&self) -> Option<&str> {
        match &self.kind {
            ColumnKind::Statistic { layer, .. } | ColumnKind::PixelValue { layer } => Some(layer),
            ColumnKind::OneHot { .. } => None,
        }
    }
}

/// Ordered column layout fixed at training time and replayed at prediction time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub mode: ExtractionMode,
    pub stats: Vec<Statistic>,
    /// Numeric layers in column order
    pub layers: Vec<String>,
    pub categorical: Vec<CategoricalSchema>,
    pub columns: Vec<ColumnSpec>,
}

impl ColumnSchema {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Every raster layer the schema reads, numeric and categorical
    pub fn required_layers(&self) -> Vec<String> {
        let mut layers = self.layers.clone();
        for cat in &self.categorical {
            if let CategorySource::Layer(name) = &cat.source {
                if !layers.contains(name) {
                    layers.push(name.clone());
                }
            }
        }
        layers
    }

    /// Rebuild the column list from layers, stats and category dictionaries
    pub fn expand_columns(
        mode: ExtractionMode,
        layers: &[String],
        stats: &[Statistic],
        categorical: &[CategoricalSchema],
    ) -> Vec<ColumnSpec> {
        let mut columns = Vec::new();
        for layer in layers {
            match mode {
                ExtractionMode::Zonal => {
                    columns.extend(stats.iter().map(|s| ColumnSpec::statistic(layer, *s)))
                }
                ExtractionMode::Pixel => columns.push(ColumnSpec::pixel(layer)),
            }
        }
        for cat in categorical {
            columns.extend(cat.categories.iter().map(|c| ColumnSpec::one_hot(&cat.column, c)));
        }
        columns
    }
}

/// Dense feature table; missing values are NaN
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    pub entity_ids: Vec<EntityId>,
    pub columns: Vec<String>,
    pub values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(entity_ids: Vec<EntityId>, columns: Vec<String>, values: Array2<f64>) -> Result<Self> {
        if values.nrows() != entity_ids.len() || values.ncols() != columns.len() {
            return Err(LandcubeError::SchemaMismatch {
                reason: format!(
                    "matrix shape {:?} does not match {} ids x {} columns",
                    values.dim(),
                    entity_ids.len(),
                    columns.len()
                ),
            });
        }
        Ok(Self { entity_ids, columns, values })
    }

    pub fn empty(columns: Vec<String>) -> Self {
        let ncols = columns.len();
        Self { entity_ids: Vec::new(), columns, values: Array2::zeros((0, ncols)) }
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.nrows() == 0
    }

    /// Number of missing (NaN) cells
    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_statistic_parsing() {
        assert_eq!("MEAN".parse::<Statistic>().unwrap(), Statistic::Mean);
        assert_eq!("standard_deviation".parse::<Statistic>().unwrap(), Statistic::Std);
        assert!("kurtosis".parse::<Statistic>().is_err());
    }

    #[test]
    fn test_expand_columns_order() {
        let cat = CategoricalSchema {
            column: "landcover_type".into(),
            source: CategorySource::Attribute,
            categories: vec!["forest".into(), "water".into()],
        };
        let columns = ColumnSchema::expand_columns(
            ExtractionMode::Zonal,
            &["red".into(), "nir".into()],
            &[Statistic::Mean, Statistic::Count],
            &[cat],
        );
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "red_mean",
                "red_count",
                "nir_mean",
                "nir_count",
                "landcover_type_forest",
                "landcover_type_water"
            ]
        );
    }

    #[test]
    fn test_feature_matrix_shape_check() {
        let ok = FeatureMatrix::new(vec![1, 2], vec!["a".into()], array![[1.0], [f64::NAN]]).unwrap();
        assert_eq!(ok.missing_count(), 1);
        assert!(FeatureMatrix::new(vec![1], vec!["a".into()], array![[1.0], [2.0]]).is_err());
    }

    #[test]
    fn test_column_spec_serde_flattened() {
        let spec = ColumnSpec::statistic("nir_t1", Statistic::Median);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["name"], "nir_t1_median");
        assert_eq!(json["kind"], "statistic");
        let back: ColumnSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }
}
