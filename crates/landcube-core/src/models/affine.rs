//! Affine pixel-to-world transforms.

use super::geometry::BoundingBox;
use crate::error::{LandcubeError, Result};
use serde::{Deserialize, Serialize};

/// Affine transform mapping (col, row) pixel coordinates to world coordinates
///
/// Coefficients follow the rasterio/GDAL ordering:
/// `x = a * col + b * row + c`, `y = d * col + e * row + f`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform from the upper-left corner and pixel size
    pub fn from_origin(west: f64, north: f64, x_size: f64, y_size: f64) -> Self {
        Self::new(x_size, 0.0, west, 0.0, -y_size, north)
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    pub fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() > f64::EPSILON * 1e-6
    }

    /// Inverse transform (world to pixel)
    pub fn inverse(&self) -> Result<Affine> {
        if !self.is_invertible() {
            return Err(LandcubeError::InvalidRaster {
                reason: format!("affine transform {:?} is not invertible", self),
            });
        }
        let det = self.determinant();
        let ia = self.e / det;
        let ib = -self.b / det;
        let id = -self.d / det;
        let ie = self.a / det;
        Ok(Affine::new(
            ia,
            ib,
            -ia * self.c - ib * self.f,
            id,
            ie,
            -id * self.c - ie * self.f,
        ))
    }

    /// Apply the transform to a (col, row) pair
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (self.a * col + self.b * row + self.c, self.d * col + self.e * row + self.f)
    }

    /// World coordinate of a pixel centre
    pub fn pixel_to_world(&self, col: usize, row: usize) -> (f64, f64) {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Fractional pixel coordinate (col, row) of a world coordinate
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        Ok(self.inverse()?.apply(x, y))
    }

    /// Pixel width and height in CRS units
    pub fn resolution(&self) -> (f64, f64) {
        ((self.a * self.a + self.d * self.d).sqrt(), (self.b * self.b + self.e * self.e).sqrt())
    }

    /// Transform of the window starting at (col_off, row_off)
    pub fn window(&self, col_off: usize, row_off: usize) -> Affine {
        let (c, f) = self.apply(col_off as f64, row_off as f64);
        Affine { c, f, ..*self }
    }

    /// World bounding box of a grid with `(rows, cols)` shape
    pub fn bounds(&self, shape: (usize, usize)) -> BoundingBox {
        let (rows, cols) = (shape.0 as f64, shape.1 as f64);
        let corners =
            [self.apply(0.0, 0.0), self.apply(cols, 0.0), self.apply(0.0, rows), self.apply(cols, rows)];
        let coords: Vec<[f64; 2]> = corners.iter().map(|(x, y)| [*x, *y]).collect();
        // Four corners always produce a box
        BoundingBox::from_coords(coords.iter()).unwrap_or(BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }
}

impl Default for Affine {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_origin_pixel_centres() {
        let t = Affine::from_origin(100.0, 200.0, 10.0, 10.0);
        assert_eq!(t.pixel_to_world(0, 0), (105.0, 195.0));
        assert_eq!(t.pixel_to_world(2, 1), (125.0, 185.0));
    }

    #[test]
    fn test_inverse_round_trip() {
        let t = Affine::new(30.0, 2.0, 500_000.0, -1.5, -30.0, 4_000_000.0);
        let inv = t.inverse().unwrap();
        let (x, y) = t.apply(12.25, 7.5);
        let (col, row) = inv.apply(x, y);
        assert!((col - 12.25).abs() < 1e-9);
        assert!((row - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_singular_transform_rejected() {
        let t = Affine::new(0.0, 0.0, 1.0, 0.0, 0.0, 1.0);
        assert!(t.inverse().is_err());
    }

    #[test]
    fn test_bounds_and_window() {
        let t = Affine::from_origin(0.0, 100.0, 10.0, 10.0);
        let bounds = t.bounds((10, 5));
        assert_eq!(bounds, BoundingBox::new(0.0, 0.0, 50.0, 100.0));

        let w = t.window(2, 3);
        assert_eq!(w.c, 20.0);
        assert_eq!(w.f, 70.0);
        assert_eq!(w.resolution(), (10.0, 10.0));
    }
}
