//! In-memory multi-band, multi-date raster arrays.

use super::affine::Affine;
use super::geometry::{BoundingBox, Crs};
use crate::error::{LandcubeError, Result};
use chrono::NaiveDate;
use ndarray::{s, Array2, Array4, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Integer label grid produced by rasterize / segment
pub type LabelArray = Array2<i64>;

/// True when a cell should be excluded from every aggregate
pub fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
    value.is_nan() || nodata.is_some_and(|nd| value == nd)
}

/// Reduction applied along the time axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalReducer {
    Mean,
    Median,
    /// First valid observation in time order
    First,
    /// Last valid observation in time order
    Last,
}

impl TemporalReducer {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemporalReducer::Mean => "mean",
            TemporalReducer::Median => "median",
            TemporalReducer::First => "first",
            TemporalReducer::Last => "last",
        }
    }
}

impl FromStr for TemporalReducer {
    type Err = LandcubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(TemporalReducer::Mean),
            "median" => Ok(TemporalReducer::Median),
            "first" => Ok(TemporalReducer::First),
            "last" => Ok(TemporalReducer::Last),
            other => Err(LandcubeError::ConfigInvalid {
                key: "recipe".to_string(),
                reason: format!("Unknown temporal reducer '{}'. Use mean, median, first, or last", other),
            }),
        }
    }
}

impl fmt::Display for TemporalReducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One band x date slice of a stack
#[derive(Debug, Clone)]
pub struct RasterLayer<'a> {
    pub name: String,
    pub band: usize,
    pub time: usize,
    pub values: ArrayView2<'a, f64>,
    pub nodata: Option<f64>,
}

/// Multi-band, multi-date array for one tile
///
/// `data` is laid out as (band, time, y, x). Nodata cells either equal the
/// band's sentinel or are NaN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterStack {
    pub data: Array4<f64>,
    pub band_names: Vec<String>,
    pub times: Vec<NaiveDate>,
    pub transform: Affine,
    pub crs: Crs,
    pub nodata: Vec<Option<f64>>,
}

impl RasterStack {
    pub fn new(
        data: Array4<f64>,
        band_names: Vec<String>,
        times: Vec<NaiveDate>,
        transform: Affine,
        crs: Crs,
        nodata: Vec<Option<f64>>,
    ) -> Result<Self> {
        let stack = Self { data, band_names, times, transform, crs, nodata };
        stack.validate()?;
        Ok(stack)
    }

    /// Single-date stack from a (band, y, x) array
    pub fn single_date(
        data: ndarray::Array3<f64>,
        band_names: Vec<String>,
        date: NaiveDate,
        transform: Affine,
        crs: Crs,
        nodata: Vec<Option<f64>>,
    ) -> Result<Self> {
        let data = data.insert_axis(Axis(1));
        Self::new(data, band_names, vec![date], transform, crs, nodata)
    }

    /// Check the shape invariants between the array and its metadata
    pub fn validate(&self) -> Result<()> {
        let (bands, times, rows, cols) = self.data.dim();
        let invalid = |reason: String| Err(LandcubeError::InvalidRaster { reason });

        if self.band_names.len() != bands {
            return invalid(format!(
                "{} band names for {} bands",
                self.band_names.len(),
                bands
            ));
        }
        if self.nodata.len() != bands {
            return invalid(format!("{} nodata values for {} bands", self.nodata.len(), bands));
        }
        if self.times.len() != times {
            return invalid(format!("{} dates for {} time steps", self.times.len(), times));
        }
        if rows == 0 || cols == 0 {
            return invalid("raster has an empty spatial extent".to_string());
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = self.band_names.iter().find(|n| !seen.insert(n.as_str())) {
            return invalid(format!("duplicate band name '{}'", dup));
        }
        if !self.transform.is_invertible() {
            return invalid("affine transform is not invertible".to_string());
        }
        self.crs.validate()?;
        Ok(())
    }

    pub fn band_count(&self) -> usize {
        self.data.dim().0
    }

    pub fn time_count(&self) -> usize {
        self.data.dim().1
    }

    /// Spatial shape as (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        let (_, _, rows, cols) = self.data.dim();
        (rows, cols)
    }

    pub fn bounds(&self) -> BoundingBox {
        self.transform.bounds(self.shape())
    }

    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.band_names.iter().position(|b| b == name)
    }

    /// Layer name of a band x date slice
    pub fn layer_name(&self, band: usize, time: usize) -> String {
        if self.time_count() == 1 {
            self.band_names[band].clone()
        } else {
            format!("{}_t{}", self.band_names[band], time)
        }
    }

    /// Every band x date slice, band-major
    pub fn layers(&self) -> Vec<RasterLayer<'_>> {
        let (bands, times, _, _) = self.data.dim();
        let mut layers = Vec::with_capacity(bands * times);
        for band in 0..bands {
            for time in 0..times {
                layers.push(RasterLayer {
                    name: self.layer_name(band, time),
                    band,
                    time,
                    values: self.data.slice(s![band, time, .., ..]),
                    nodata: self.nodata[band],
                });
            }
        }
        layers
    }

    pub fn layer_names(&self) -> Vec<String> {
        self.layers().into_iter().map(|l| l.name).collect()
    }

    pub fn layer(&self, name: &str) -> Option<RasterLayer<'_>> {
        self.layers().into_iter().find(|l| l.name == name)
    }

    /// Sub-stack restricted to the named bands, in the order given
    pub fn select_bands(&self, names: &[String]) -> Result<RasterStack> {
        let indices = names
            .iter()
            .map(|name| {
                self.band_index(name).ok_or_else(|| LandcubeError::SchemaMismatch {
                    reason: format!(
                        "band '{}' not present in raster (available: {})",
                        name,
                        self.band_names.join(", ")
                    ),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let data = self.data.select(Axis(0), &indices);
        let nodata = indices.iter().map(|&i| self.nodata[i]).collect();
        RasterStack::new(
            data,
            names.to_vec(),
            self.times.clone(),
            self.transform,
            self.crs.clone(),
            nodata,
        )
    }

    /// Collapse the time axis with a nodata-aware reducer
    ///
    /// Pixels without any valid observation keep the band's nodata sentinel
    /// (NaN when the band has none).
    pub fn reduce_time(&self, reducer: TemporalReducer) -> RasterStack {
        let (bands, times, rows, cols) = self.data.dim();
        let mut out = Array4::<f64>::zeros((bands, 1, rows, cols));
        let mut buf = Vec::with_capacity(times);

        for b in 0..bands {
            let nodata = self.nodata[b];
            let fill = nodata.unwrap_or(f64::NAN);
            for r in 0..rows {
                for c in 0..cols {
                    buf.clear();
                    buf.extend(
                        (0..times).map(|t| self.data[[b, t, r, c]]).filter(|v| !is_nodata(*v, nodata)),
                    );
                    out[[b, 0, r, c]] = reduce_values(&mut buf, reducer).unwrap_or(fill);
                }
            }
        }

        let date = match reducer {
            TemporalReducer::Last => self.times.last().copied(),
            _ => self.times.first().copied(),
        };

        RasterStack {
            data: out,
            band_names: self.band_names.clone(),
            times: date.into_iter().collect(),
            transform: self.transform,
            crs: self.crs.clone(),
            nodata: self.nodata.clone(),
        }
    }

    /// Size of the array in bytes
    pub fn memory_bytes(&self) -> u64 {
        Self::estimate_bytes(self.band_count(), self.time_count(), self.shape())
    }

    /// Size of an f64 stack with the given dimensions
    pub fn estimate_bytes(bands: usize, times: usize, shape: (usize, usize)) -> u64 {
        (bands as u64)
            .saturating_mul(times as u64)
            .saturating_mul(shape.0 as u64)
            .saturating_mul(shape.1 as u64)
            .saturating_mul(std::mem::size_of::<f64>() as u64)
    }
}

fn reduce_values(values: &mut [f64], reducer: TemporalReducer) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(match reducer {
        TemporalReducer::Mean => values.iter().sum::<f64>() / values.len() as f64,
        TemporalReducer::Median => {
            values.sort_by(|a, b| a.total_cmp(b));
            let mid = values.len() / 2;
            if values.len() % 2 == 0 {
                (values[mid - 1] + values[mid]) / 2.0
            } else {
                values[mid]
            }
        }
        TemporalReducer::First => values[0],
        TemporalReducer::Last => values[values.len() - 1],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 1, d).unwrap()
    }

    fn two_date_stack() -> RasterStack {
        let mut data = Array4::<f64>::zeros((2, 2, 2, 2));
        data.slice_mut(s![0, 0, .., ..]).fill(1.0);
        data.slice_mut(s![0, 1, .., ..]).fill(3.0);
        data.slice_mut(s![1, 0, .., ..]).fill(-9999.0);
        data.slice_mut(s![1, 1, .., ..]).fill(7.0);
        data[[1, 1, 0, 0]] = -9999.0;
        RasterStack::new(
            data,
            vec!["red".into(), "nir".into()],
            vec![date(1), date(17)],
            Affine::from_origin(0.0, 20.0, 10.0, 10.0),
            Crs::epsg(32614),
            vec![None, Some(-9999.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_layer_names() {
        let stack = two_date_stack();
        assert_eq!(stack.layer_names(), vec!["red_t0", "red_t1", "nir_t0", "nir_t1"]);

        let reduced = stack.reduce_time(TemporalReducer::Mean);
        assert_eq!(reduced.layer_names(), vec!["red", "nir"]);
    }

    #[test]
    fn test_reduce_time_is_nodata_aware() {
        let reduced = two_date_stack().reduce_time(TemporalReducer::Mean);
        assert_eq!(reduced.data[[0, 0, 1, 1]], 2.0);
        assert_eq!(reduced.data[[1, 0, 1, 1]], 7.0);
        // no valid observation left: keep the sentinel
        assert_eq!(reduced.data[[1, 0, 0, 0]], -9999.0);

        let last = two_date_stack().reduce_time(TemporalReducer::Last);
        assert_eq!(last.times, vec![date(17)]);
        assert_eq!(last.data[[0, 0, 0, 0]], 3.0);
    }

    #[test]
    fn test_validate_rejects_mismatched_metadata() {
        let data = Array4::<f64>::zeros((2, 1, 3, 3));
        let err = RasterStack::new(
            data,
            vec!["red".into()],
            vec![date(1)],
            Affine::default(),
            Crs::wgs84(),
            vec![None, None],
        )
        .unwrap_err();
        assert!(matches!(err, LandcubeError::InvalidRaster { .. }));
    }

    #[test]
    fn test_select_bands_missing() {
        let stack = two_date_stack();
        let nir = stack.select_bands(&["nir".to_string()]).unwrap();
        assert_eq!(nir.band_count(), 1);
        assert_eq!(nir.nodata, vec![Some(-9999.0)]);

        let err = stack.select_bands(&["swir".to_string()]).unwrap_err();
        assert!(matches!(err, LandcubeError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_memory_estimate() {
        let stack = two_date_stack();
        assert_eq!(stack.memory_bytes(), 2 * 2 * 2 * 2 * 8);
    }
}
