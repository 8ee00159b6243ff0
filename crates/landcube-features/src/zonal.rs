//! Nodata-aware zonal statistics.
//!
//! Pixels equal to a layer's nodata sentinel, or NaN, are excluded from every
//! aggregate. A (label, layer) pair without any valid pixel is reported as
//! missing rather than zero.

use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::raster::is_nodata;
use landcube_core::models::{LabelArray, RasterLayer, Statistic};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Statistics of one zone (label)
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZoneStats {
    /// Pixels carrying the label, valid or not
    pub pixel_count: usize,
    /// Per layer: valid pixel count and statistics (`None` when no pixel was valid)
    pub layers: BTreeMap<String, (usize, Option<BTreeMap<Statistic, f64>>)>,
}

impl ZoneStats {
    pub fn get(&self, layer: &str, stat: Statistic) -> Option<f64> {
        self.layers.get(layer)?.1.as_ref()?.get(&stat).copied()
    }

    /// Valid pixels in `layer`
    pub fn valid_count(&self, layer: &str) -> usize {
        self.layers.get(layer).map_or(0, |(count, _)| *count)
    }

    /// True when at least one layer has a valid pixel
    pub fn has_valid_pixels(&self) -> bool {
        self.layers.values().any(|(count, _)| *count > 0)
    }
}

/// Result of `zonal_statistics`, keyed by label in ascending order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ZonalStatistics {
    pub zones: BTreeMap<i64, ZoneStats>,
}

impl ZonalStatistics {
    pub fn zone(&self, label: i64) -> Option<&ZoneStats> {
        self.zones.get(&label)
    }

    pub fn get(&self, label: i64, layer: &str, stat: Statistic) -> Option<f64> {
        self.zones.get(&label)?.get(layer, stat)
    }

    pub fn labels(&self) -> impl Iterator<Item = i64> + '_ {
        self.zones.keys().copied()
    }
}

/// Compute per-label, per-layer statistics
///
/// `background`, when given, is not treated as a zone. Layers are processed
/// in parallel.
pub fn zonal_statistics(
    labels: &LabelArray,
    layers: &[RasterLayer<'_>],
    stats: &[Statistic],
    background: Option<i64>,
) -> Result<ZonalStatistics> {
    for layer in layers {
        if layer.values.dim() != labels.dim() {
            return Err(LandcubeError::InvalidRaster {
                reason: format!(
                    "layer '{}' has shape {:?}, label grid has {:?}",
                    layer.name,
                    layer.values.dim(),
                    labels.dim()
                ),
            });
        }
    }

    // Pixel positions per zone, in scan order
    let mut positions: BTreeMap<i64, Vec<(usize, usize)>> = BTreeMap::new();
    for ((r, c), label) in labels.indexed_iter() {
        if Some(*label) != background {
            positions.entry(*label).or_default().push((r, c));
        }
    }

    let per_layer: Vec<(String, BTreeMap<i64, (usize, Option<BTreeMap<Statistic, f64>>)>)> = layers
        .par_iter()
        .map(|layer| {
            let mut buf = Vec::new();
            let by_label = positions
                .iter()
                .map(|(label, pixels)| {
                    buf.clear();
                    buf.extend(
                        pixels
                            .iter()
                            .map(|&(r, c)| layer.values[[r, c]])
                            .filter(|v| !is_nodata(*v, layer.nodata)),
                    );
                    let count = buf.len();
                    (*label, (count, compute_stats(&mut buf, stats)))
                })
                .collect();
            (layer.name.clone(), by_label)
        })
        .collect();

    let mut zones: BTreeMap<i64, ZoneStats> = positions
        .iter()
        .map(|(label, pixels)| {
            (*label, ZoneStats { pixel_count: pixels.len(), layers: BTreeMap::new() })
        })
        .collect();

    for (layer_name, by_label) in per_layer {
        for (label, entry) in by_label {
            if let Some(zone) = zones.get_mut(&label) {
                zone.layers.insert(layer_name.clone(), entry);
            }
        }
    }

    Ok(ZonalStatistics { zones })
}

/// Aggregate valid values; `None` when there are none
pub fn compute_stats(values: &mut [f64], stats: &[Statistic]) -> Option<BTreeMap<Statistic, f64>> {
    if values.is_empty() {
        return None;
    }

    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    let mean = sum / n;
    // Population variance (ddof = 0)
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    let result = stats
        .iter()
        .map(|stat| {
            let value = match stat {
                Statistic::Mean => mean,
                Statistic::Std => variance.sqrt(),
                Statistic::Variance => variance,
                Statistic::Min => values[0],
                Statistic::Max => values[values.len() - 1],
                Statistic::Median => median_sorted(values),
                Statistic::Sum => sum,
                Statistic::Count => n,
                Statistic::Mode => mode_sorted(values),
            };
            (*stat, value)
        })
        .collect();

    Some(result)
}

fn median_sorted(values: &[f64]) -> f64 {
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Most frequent value; ties go to the smallest value
fn mode_sorted(values: &[f64]) -> f64 {
    let mut best = values[0];
    let mut best_run = 0;
    let mut i = 0;
    while i < values.len() {
        let mut j = i;
        while j < values.len() && values[j] == values[i] {
            j += 1;
        }
        if j - i > best_run {
            best_run = j - i;
            best = values[i];
        }
        i = j;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn layer<'a>(name: &str, values: &'a Array2<f64>, nodata: Option<f64>) -> RasterLayer<'a> {
        RasterLayer { name: name.to_string(), band: 0, time: 0, values: values.view(), nodata }
    }

    #[test]
    fn test_two_zone_means() {
        let labels = array![[1, 1, 2], [1, 2, 2]];
        let values = array![[5.0, 5.0, 10.0], [5.0, 10.0, 10.0]];
        let zonal = zonal_statistics(
            &labels,
            &[layer("b1", &values, None)],
            &[Statistic::Mean, Statistic::Count],
            Some(0),
        )
        .unwrap();

        assert_eq!(zonal.get(1, "b1", Statistic::Mean), Some(5.0));
        assert_eq!(zonal.get(1, "b1", Statistic::Count), Some(3.0));
        assert_eq!(zonal.get(2, "b1", Statistic::Mean), Some(10.0));
        assert_eq!(zonal.get(2, "b1", Statistic::Count), Some(3.0));
    }

    #[test]
    fn test_nodata_excluded_and_all_nodata_missing() {
        let labels = array![[1, 1, 2], [1, 2, 0]];
        let values = array![[-1.0, 4.0, -1.0], [f64::NAN, -1.0, 99.0]];
        let zonal = zonal_statistics(
            &labels,
            &[layer("b1", &values, Some(-1.0))],
            &[Statistic::Mean, Statistic::Count],
            Some(0),
        )
        .unwrap();

        let zone1 = zonal.zone(1).unwrap();
        assert_eq!(zone1.pixel_count, 3);
        assert_eq!(zone1.valid_count("b1"), 1);
        assert_eq!(zone1.get("b1", Statistic::Mean), Some(4.0));

        let zone2 = zonal.zone(2).unwrap();
        assert_eq!(zone2.get("b1", Statistic::Mean), None);
        assert!(!zone2.has_valid_pixels());

        // background is not a zone
        assert!(zonal.zone(0).is_none());
    }

    #[test]
    fn test_statistic_definitions() {
        let mut values = vec![4.0, 1.0, 3.0, 3.0, 2.0, 1.0];
        let stats = compute_stats(&mut values, &Statistic::ALL).unwrap();
        assert_eq!(stats[&Statistic::Min], 1.0);
        assert_eq!(stats[&Statistic::Max], 4.0);
        assert_eq!(stats[&Statistic::Sum], 14.0);
        assert_eq!(stats[&Statistic::Median], 2.5);
        // 1.0 and 3.0 both occur twice
        assert_eq!(stats[&Statistic::Mode], 1.0);
        let mean = 14.0 / 6.0;
        let var = [4.0, 1.0, 3.0, 3.0, 2.0, 1.0].iter().map(|v: &f64| (v - mean).powi(2)).sum::<f64>() / 6.0;
        assert!((stats[&Statistic::Variance] - var).abs() < 1e-12);
        assert!((stats[&Statistic::Std] - var.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let labels = array![[1, 1]];
        let values = array![[1.0], [2.0]];
        assert!(zonal_statistics(&labels, &[layer("b1", &values, None)], &[Statistic::Mean], None)
            .is_err());
    }
}
