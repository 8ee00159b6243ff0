//! Burning polygons into integer label grids.
//!
//! A pixel is covered when its centre falls inside the polygon (even-odd
//! rule, so holes are left untouched). Edges are half-open, so a centre lying
//! exactly on a boundary shared by two polygons is claimed by only one.

use crate::models::{Crs, Polygon};
use crate::transform::check_crs_match;
use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::{Affine, LabelArray};

/// Value written for each polygon
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BurnValue {
    /// The polygon id
    #[default]
    Id,
    /// The polygon's class code
    ClassCode,
    /// A numeric attribute
    Attribute(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RasterizeOptions {
    /// Value of uncovered pixels; burn values must differ from it
    pub background: i64,
    pub burn: BurnValue,
}

impl RasterizeOptions {
    pub fn burn_attribute(name: impl Into<String>) -> Self {
        Self { burn: BurnValue::Attribute(name.into()), ..Default::default() }
    }
}

/// Rasterize polygons onto a grid of `shape` (rows, cols)
///
/// Polygons are burned in input order; where they overlap, the last one wins.
/// Every polygon must already be in the grid CRS.
pub fn rasterize(
    polygons: &[Polygon],
    shape: (usize, usize),
    transform: &Affine,
    crs: &Crs,
    options: &RasterizeOptions,
) -> Result<LabelArray> {
    let mut labels = LabelArray::from_elem(shape, options.background);
    let inverse = transform.inverse()?;

    for polygon in polygons {
        check_crs_match(crs, &polygon.crs)?;
        let value = burn_value(polygon, options)?;

        for rings in polygon.geometry.polygons() {
            let pixel_rings: Vec<Vec<(f64, f64)>> = rings
                .iter()
                .map(|ring| ring.iter().map(|c| inverse.apply(c[0], c[1])).collect())
                .collect();
            fill_rings(&mut labels, &pixel_rings, value);
        }
    }

    Ok(labels)
}

fn burn_value(polygon: &Polygon, options: &RasterizeOptions) -> Result<i64> {
    let invalid = |reason: String| LandcubeError::InvalidGeometry {
        entity: format!("polygon {}", polygon.id),
        reason,
    };

    let value = match &options.burn {
        BurnValue::Id => i64::try_from(polygon.id)
            .map_err(|_| invalid(format!("id {} does not fit a label grid", polygon.id)))?,
        BurnValue::ClassCode => {
            polygon.class_code.ok_or_else(|| invalid("polygon has no class code".to_string()))?
        }
        BurnValue::Attribute(name) => polygon
            .attribute(name)
            .and_then(|v| v.as_i64())
            .ok_or_else(|| invalid(format!("attribute '{}' is missing or not an integer", name)))?,
    };

    if value == options.background {
        return Err(invalid(format!(
            "burn value {} equals the reserved background value",
            value
        )));
    }
    Ok(value)
}

/// Scanline fill of one polygon's rings (pixel coordinates, even-odd)
fn fill_rings(labels: &mut LabelArray, rings: &[Vec<(f64, f64)>], value: i64) {
    let (rows, cols) = labels.dim();

    let (min_y, max_y) = rings
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| (lo.min(p.1), hi.max(p.1)));
    if !min_y.is_finite() || !max_y.is_finite() {
        return;
    }

    let first_row = (min_y - 0.5).ceil().max(0.0) as usize;
    let last_row = ((max_y - 0.5).floor().min(rows as f64 - 1.0)).max(-1.0);
    if last_row < 0.0 {
        return;
    }
    let last_row = last_row as usize;

    let mut crossings: Vec<f64> = Vec::new();
    for row in first_row..=last_row {
        let yc = row as f64 + 0.5;
        crossings.clear();

        for ring in rings {
            if ring.len() < 2 {
                continue;
            }
            for window in ring.windows(2) {
                let (x0, y0) = window[0];
                let (x1, y1) = window[1];
                // Half-open in y: an edge covers [min, max)
                if (y0 <= yc) != (y1 <= yc) {
                    crossings.push(x0 + (yc - y0) * (x1 - x0) / (y1 - y0));
                }
            }
        }

        crossings.sort_by(|a, b| a.total_cmp(b));
        for pair in crossings.chunks_exact(2) {
            let start = (pair[0] - 0.5).ceil().max(0.0);
            let end = (pair[1] - 0.5).ceil().min(cols as f64);
            if end <= start {
                continue;
            }
            for col in start as usize..end as usize {
                labels[[row, col]] = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Geometry;
    use ndarray::array;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<[f64; 2]> {
        vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]
    }

    fn grid() -> (Affine, Crs) {
        // 4x4 grid of 10m pixels, upper-left at (0, 40)
        (Affine::from_origin(0.0, 40.0, 10.0, 10.0), Crs::epsg(32614))
    }

    #[test]
    fn test_burns_polygon_ids() {
        let (transform, crs) = grid();
        let polygons = vec![
            Polygon::new(1, Geometry::polygon(vec![rect(0.0, 20.0, 20.0, 40.0)]), crs.clone()),
            Polygon::new(2, Geometry::polygon(vec![rect(20.0, 0.0, 40.0, 20.0)]), crs.clone()),
        ];
        let labels =
            rasterize(&polygons, (4, 4), &transform, &crs, &RasterizeOptions::default()).unwrap();
        assert_eq!(
            labels,
            array![[1, 1, 0, 0], [1, 1, 0, 0], [0, 0, 2, 2], [0, 0, 2, 2]]
        );
    }

    #[test]
    fn test_overlap_last_write_wins() {
        let (transform, crs) = grid();
        let polygons = vec![
            Polygon::new(5, Geometry::polygon(vec![rect(0.0, 0.0, 40.0, 40.0)]), crs.clone()),
            Polygon::new(9, Geometry::polygon(vec![rect(10.0, 10.0, 30.0, 30.0)]), crs.clone()),
        ];
        let labels =
            rasterize(&polygons, (4, 4), &transform, &crs, &RasterizeOptions::default()).unwrap();
        assert_eq!(labels[[1, 1]], 9);
        assert_eq!(labels[[0, 0]], 5);

        let reversed: Vec<_> = polygons.into_iter().rev().collect();
        let labels =
            rasterize(&reversed, (4, 4), &transform, &crs, &RasterizeOptions::default()).unwrap();
        assert_eq!(labels[[1, 1]], 5);
    }

    #[test]
    fn test_hole_is_not_burned() {
        let (transform, crs) = grid();
        let polygon = Polygon::new(
            3,
            Geometry::polygon(vec![rect(0.0, 0.0, 40.0, 40.0), rect(10.0, 10.0, 30.0, 30.0)]),
            crs.clone(),
        );
        let labels =
            rasterize(&[polygon], (4, 4), &transform, &crs, &RasterizeOptions::default()).unwrap();
        assert_eq!(labels.iter().filter(|v| **v == 3).count(), 12);
        assert_eq!(labels[[1, 2]], 0);
    }

    #[test]
    fn test_crs_mismatch_is_hard_failure() {
        let (transform, crs) = grid();
        let polygon = Polygon::new(1, Geometry::polygon(vec![rect(0.0, 0.0, 10.0, 10.0)]), Crs::wgs84());
        let err = rasterize(&[polygon], (4, 4), &transform, &crs, &RasterizeOptions::default())
            .unwrap_err();
        assert!(matches!(err, LandcubeError::Crs(landcube_core::CrsError::Mismatch { .. })));
    }

    #[test]
    fn test_burn_value_equal_to_background_rejected() {
        let (transform, crs) = grid();
        let polygon = Polygon::new(0, Geometry::polygon(vec![rect(0.0, 0.0, 10.0, 10.0)]), crs.clone());
        assert!(rasterize(&[polygon], (4, 4), &transform, &crs, &RasterizeOptions::default()).is_err());
    }

    #[test]
    fn test_burn_attribute() {
        let (transform, crs) = grid();
        let polygon = Polygon::new(1, Geometry::polygon(vec![rect(0.0, 30.0, 10.0, 40.0)]), crs.clone())
            .with_attribute("class", 42i64);
        let labels = rasterize(
            &[polygon],
            (4, 4),
            &transform,
            &crs,
            &RasterizeOptions::burn_attribute("class"),
        )
        .unwrap();
        assert_eq!(labels[[0, 0]], 42);
        assert_eq!(labels.iter().filter(|v| **v != 0).count(), 1);
    }

    #[test]
    fn test_partially_outside_polygon_is_clipped() {
        let (transform, crs) = grid();
        let polygon =
            Polygon::new(4, Geometry::polygon(vec![rect(-50.0, -50.0, 14.0, 14.0)]), crs.clone());
        let labels =
            rasterize(&[polygon], (4, 4), &transform, &crs, &RasterizeOptions::default()).unwrap();
        assert_eq!(labels[[3, 0]], 4);
        assert_eq!(labels[[2, 0]], 0);
        assert_eq!(labels.iter().filter(|v| **v == 4).count(), 1);
    }
}
