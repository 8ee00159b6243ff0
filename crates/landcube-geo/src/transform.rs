//! CRS transformation of polygons and rasters

use crate::models::{BoundingBox, Crs, Geometry, Polygon};
use landcube_core::error::{CrsError, Result};
use landcube_core::models::RasterStack;
use landcube_core::models::Affine;
use ndarray::Array4;
use proj::Proj;
use std::collections::HashMap;

/// Points sampled per bounding-box edge when projecting a box
const BBOX_EDGE_SAMPLES: usize = 21;

/// Fail with `CrsError::Mismatch` unless both CRS are the same
pub fn check_crs_match(expected: &Crs, found: &Crs) -> std::result::Result<(), CrsError> {
    if expected != found {
        return Err(CrsError::Mismatch { expected: expected.to_string(), found: found.to_string() });
    }
    Ok(())
}

/// Coordinate transform between two CRS; identity when they match
pub struct Reprojector {
    from: Crs,
    to: Crs,
    proj: Option<Proj>,
}

impl Reprojector {
    pub fn new(from: &Crs, to: &Crs) -> Result<Self> {
        // Normalise through parse so malformed definitions fail early
        let from = Crs::parse(from.definition())?;
        let to = Crs::parse(to.definition())?;

        if from == to {
            return Ok(Self { from, to, proj: None });
        }

        let proj = Proj::new_known_crs(from.definition(), to.definition(), None).map_err(|e| {
            CrsError::Transform {
                from: from.to_string(),
                to: to.to_string(),
                reason: format!("Failed to create projection: {}", e),
            }
        })?;

        Ok(Self { from, to, proj: Some(proj) })
    }

    pub fn is_identity(&self) -> bool {
        self.proj.is_none()
    }

    pub fn target(&self) -> &Crs {
        &self.to
    }

    fn transform_error(&self, reason: String) -> CrsError {
        CrsError::Transform { from: self.from.to_string(), to: self.to.to_string(), reason }
    }

    /// Transform a single coordinate
    pub fn convert(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some(proj) = &self.proj else {
            return Ok((x, y));
        };

        let (tx, ty) = proj
            .convert((x, y))
            .map_err(|e| self.transform_error(format!("Projection failed at ({}, {}): {}", x, y, e)))?;

        if !tx.is_finite() || !ty.is_finite() {
            return Err(self
                .transform_error(format!("Projection of ({}, {}) is not finite", x, y))
                .into());
        }
        Ok((tx, ty))
    }

    pub fn geometry(&self, geometry: &Geometry) -> Result<Geometry> {
        if self.is_identity() {
            return Ok(geometry.clone());
        }
        geometry.try_map_coords(|c| self.convert(c[0], c[1]).map(|(x, y)| [x, y]))
    }

    /// Bounding box of a projected box, sampled along its edges
    pub fn bbox(&self, bbox: &BoundingBox) -> Result<BoundingBox> {
        if self.is_identity() {
            return Ok(*bbox);
        }

        let mut points = Vec::with_capacity(BBOX_EDGE_SAMPLES * 4);
        for i in 0..BBOX_EDGE_SAMPLES {
            let t = i as f64 / (BBOX_EDGE_SAMPLES - 1) as f64;
            let x = bbox.min_x + t * bbox.width();
            let y = bbox.min_y + t * bbox.height();
            for (px, py) in [(x, bbox.min_y), (x, bbox.max_y), (bbox.min_x, y), (bbox.max_x, y)] {
                let (tx, ty) = self.convert(px, py)?;
                points.push([tx, ty]);
            }
        }

        BoundingBox::from_coords(points.iter())
            .ok_or_else(|| self.transform_error("empty bounding box".to_string()).into())
    }
}

/// Reproject a polygon into `to`, keeping id, attributes and class code
pub fn reproject_polygon(polygon: &Polygon, to: &Crs) -> Result<Polygon> {
    let reprojector = Reprojector::new(&polygon.crs, to)?;
    Ok(Polygon {
        geometry: reprojector.geometry(&polygon.geometry)?,
        crs: reprojector.target().clone(),
        ..polygon.clone()
    })
}

/// Reproject a polygon collection, building one transform per source CRS
pub fn reproject_polygons(polygons: Vec<Polygon>, to: &Crs) -> Result<Vec<Polygon>> {
    let mut reprojectors: HashMap<String, Reprojector> = HashMap::new();
    let mut out = Vec::with_capacity(polygons.len());

    for mut polygon in polygons {
        let key = polygon.crs.definition().to_string();
        if !reprojectors.contains_key(&key) {
            reprojectors.insert(key.clone(), Reprojector::new(&polygon.crs, to)?);
        }
        let reprojector = &reprojectors[&key];
        if !reprojector.is_identity() {
            polygon.geometry = reprojector.geometry(&polygon.geometry)?;
        }
        polygon.crs = reprojector.target().clone();
        out.push(polygon);
    }

    Ok(out)
}

/// Warp a raster stack into another CRS with nearest-neighbour sampling
///
/// The output grid covers the projected bounds with the same number of rows
/// and columns as the input. Cells that fall outside the source grid take the
/// band's nodata value (NaN when the band has none).
pub fn reproject_raster(stack: &RasterStack, to: &Crs) -> Result<RasterStack> {
    let forward = Reprojector::new(&stack.crs, to)?;
    if forward.is_identity() {
        return Ok(stack.clone());
    }
    let inverse = Reprojector::new(to, &stack.crs)?;

    let (bands, times, rows, cols) = stack.data.dim();
    let dst_bounds = forward.bbox(&stack.bounds())?;
    let dst_transform = Affine::from_origin(
        dst_bounds.min_x,
        dst_bounds.max_y,
        dst_bounds.width() / cols as f64,
        dst_bounds.height() / rows as f64,
    );
    let src_inverse = stack.transform.inverse()?;

    let mut data = Array4::<f64>::zeros((bands, times, rows, cols));
    for b in 0..bands {
        let fill = stack.nodata[b].unwrap_or(f64::NAN);
        data.slice_mut(ndarray::s![b, .., .., ..]).fill(fill);
    }

    for row in 0..rows {
        for col in 0..cols {
            let (x, y) = dst_transform.pixel_to_world(col, row);
            let Ok((sx, sy)) = inverse.convert(x, y) else {
                continue;
            };
            let (fc, fr) = src_inverse.apply(sx, sy);
            if fc < 0.0 || fr < 0.0 {
                continue;
            }
            let (sc, sr) = (fc.floor() as usize, fr.floor() as usize);
            if sc >= cols || sr >= rows {
                continue;
            }
            for b in 0..bands {
                for t in 0..times {
                    data[[b, t, row, col]] = stack.data[[b, t, sr, sc]];
                }
            }
        }
    }

    tracing::debug!(from = %stack.crs, to = %to, rows, cols, "Reprojected raster");

    RasterStack::new(
        data,
        stack.band_names.clone(),
        stack.times.clone(),
        dst_transform,
        forward.target().clone(),
        stack.nodata.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use landcube_core::error::LandcubeError;

    #[test]
    fn test_identity_reprojection_keeps_geometry() {
        let polygon = Polygon::new(
            7,
            Geometry::polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]),
            Crs::epsg(32614),
        );
        let out = reproject_polygon(&polygon, &Crs::parse("EPSG:32614").unwrap()).unwrap();
        assert_eq!(out, polygon);
    }

    #[test]
    fn test_check_crs_match() {
        assert!(check_crs_match(&Crs::epsg(4326), &Crs::wgs84()).is_ok());
        let err = check_crs_match(&Crs::epsg(32614), &Crs::wgs84()).unwrap_err();
        assert!(matches!(err, CrsError::Mismatch { .. }));
    }

    #[test]
    fn test_unparsable_crs_rejected() {
        let err = Reprojector::new(&Crs::wgs84(), &Crs::parse("EPSG:32614").unwrap());
        assert!(err.is_ok());

        let bogus: Crs = serde_json::from_str("\"somewhere\"").unwrap();
        let err = Reprojector::new(&bogus, &Crs::wgs84()).err().unwrap();
        assert!(matches!(err, LandcubeError::Crs(CrsError::Unparsable { .. })));
    }

    #[test]
    fn test_wgs84_to_utm() {
        let r = Reprojector::new(&Crs::wgs84(), &Crs::epsg(32614)).unwrap();
        // Central meridian of UTM zone 14N maps to the false easting
        let (x, y) = r.convert(-99.0, 0.0).unwrap();
        assert!((x - 500_000.0).abs() < 1e-3);
        assert!(y.abs() < 1e-3);
    }
}
