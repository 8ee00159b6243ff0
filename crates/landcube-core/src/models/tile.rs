use super::affine::Affine;
use super::geometry::{BoundingBox, Crs};
use crate::error::{LandcubeError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive date interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end < start {
            return Err(LandcubeError::ConfigInvalid {
                key: "time_range".to_string(),
                reason: format!("end {} is before start {}", end, start),
            });
        }
        Ok(Self { start, end })
    }

    /// Range covering a full calendar year
    pub fn year(year: i32) -> Option<Self> {
        Some(Self {
            start: NaiveDate::from_ymd_opt(year, 1, 1)?,
            end: NaiveDate::from_ymd_opt(year, 12, 31)?,
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start.format("%Y%m%d"), self.end.format("%Y%m%d"))
    }
}

/// Deterministic tile identity: grid cell plus optional time window
///
/// `level` counts memory-driven subdivisions below the native grid; cell
/// coordinates are expressed at that level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub x: i64,
    pub y: i64,
    #[serde(default)]
    pub level: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimeRange>,
}

impl TileKey {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y, level: 0, window: None }
    }

    pub fn with_window(mut self, window: TimeRange) -> Self {
        self.window = Some(window);
        self
    }

    /// Cell coordinates as a filesystem / database friendly string
    pub fn cell_id(&self) -> String {
        if self.level == 0 {
            format!("{}_{}", self.x, self.y)
        } else {
            format!("{}_{}_l{}", self.x, self.y, self.level)
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cell_id())?;
        if let Some(window) = &self.window {
            write!(f, "_{}", window)?;
        }
        Ok(())
    }
}

/// Independent unit of work: a spatial cell of one product over a time range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tile {
    pub key: TileKey,
    pub product: String,
    pub bbox: BoundingBox,
    pub crs: Crs,
    pub time_range: Option<TimeRange>,
    /// Transform of the tile's top-left pixel
    pub transform: Affine,
    /// Pixel shape as (rows, cols)
    pub shape: (usize, usize),
}

impl Tile {
    /// Pixel window of this tile inside a product grid (row_off, col_off)
    pub fn pixel_offset(&self, grid: &GridSpec) -> (i64, i64) {
        let (rx, ry) = (grid.resolution, grid.resolution);
        let col = ((self.bbox.min_x - grid.origin[0]) / rx).round() as i64;
        let row = ((grid.origin[1] - self.bbox.max_y) / ry).round() as i64;
        (row, col)
    }
}

/// Regular product grid as exposed by the data cube
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub crs: Crs,
    /// Square pixel size in CRS units
    pub resolution: f64,
    /// Native tile size in pixels (rows, cols)
    pub tile_size: (usize, usize),
    /// Upper-left corner of cell (0, 0)
    pub origin: [f64; 2],
    pub band_names: Vec<String>,
    #[serde(default)]
    pub time_steps: Vec<NaiveDate>,
}

impl GridSpec {
    /// Size of a native tile in CRS units (width, height)
    pub fn tile_extent(&self) -> (f64, f64) {
        (self.tile_size.1 as f64 * self.resolution, self.tile_size.0 as f64 * self.resolution)
    }

    /// Bounds of native cell (x, y); y grows downwards from the origin
    pub fn cell_bbox(&self, x: i64, y: i64) -> BoundingBox {
        let (w, h) = self.tile_extent();
        let min_x = self.origin[0] + x as f64 * w;
        let max_y = self.origin[1] - y as f64 * h;
        BoundingBox::new(min_x, max_y - h, min_x + w, max_y)
    }

    /// Native cell containing a world coordinate
    pub fn cell_at(&self, x: f64, y: f64) -> (i64, i64) {
        let (w, h) = self.tile_extent();
        (((x - self.origin[0]) / w).floor() as i64, ((self.origin[1] - y) / h).floor() as i64)
    }

    /// Level-0 tile for native cell (x, y)
    pub fn native_tile(&self, product: &str, x: i64, y: i64, time_range: Option<TimeRange>) -> Tile {
        let bbox = self.cell_bbox(x, y);
        let mut key = TileKey::new(x, y);
        key.window = time_range;
        Tile {
            key,
            product: product.to_string(),
            bbox,
            crs: self.crs.clone(),
            time_range,
            transform: Affine::from_origin(bbox.min_x, bbox.max_y, self.resolution, self.resolution),
            shape: self.tile_size,
        }
    }

    /// Dates inside an optional time range
    pub fn dates_in(&self, range: Option<&TimeRange>) -> Vec<NaiveDate> {
        self.time_steps.iter().copied().filter(|d| range.map_or(true, |r| r.contains(*d))).collect()
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(LandcubeError::InvalidRaster {
                reason: format!("grid resolution must be positive, got {}", self.resolution),
            });
        }
        if self.tile_size.0 == 0 || self.tile_size.1 == 0 {
            return Err(LandcubeError::InvalidRaster {
                reason: "grid tile size must be non-zero".to_string(),
            });
        }
        self.crs.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_key_display() {
        let window = TimeRange::year(2020).unwrap();
        let key = TileKey::new(3, -2).with_window(window);
        assert_eq!(key.to_string(), "3_-2_20200101-20201231");
        assert_eq!(key.cell_id(), "3_-2");

        let sub = TileKey { level: 2, ..TileKey::new(7, 1) };
        assert_eq!(sub.to_string(), "7_1_l2");
    }

    #[test]
    fn test_time_range_rejects_inverted() {
        let a = NaiveDate::from_ymd_opt(2021, 5, 1).unwrap();
        let b = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        assert!(TimeRange::new(a, b).is_err());
        assert!(TimeRange::new(b, a).unwrap().contains(NaiveDate::from_ymd_opt(2021, 3, 3).unwrap()));
    }

    #[test]
    fn test_cell_geometry() {
        let grid = GridSpec {
            crs: Crs::epsg(32614),
            resolution: 10.0,
            tile_size: (10, 20),
            origin: [1000.0, 5000.0],
            band_names: vec!["red".into()],
            time_steps: vec![],
        };
        let bbox = grid.cell_bbox(1, 2);
        assert_eq!(bbox, BoundingBox::new(1200.0, 4700.0, 1400.0, 4800.0));
        assert_eq!(grid.cell_at(1205.0, 4795.0), (1, 2));
        assert_eq!(grid.cell_at(999.0, 5001.0), (-1, -1));

        let tile = grid.native_tile("s2", 1, 2, None);
        assert_eq!(tile.shape, (10, 20));
        assert_eq!(tile.transform.bounds(tile.shape), bbox);
        assert_eq!(tile.pixel_offset(&grid), (20, 20));
    }

    #[test]
    fn test_grid_dates_in_range() {
        let grid = GridSpec {
            crs: Crs::epsg(32614),
            resolution: 10.0,
            tile_size: (100, 100),
            origin: [0.0, 0.0],
            band_names: vec!["red".into()],
            time_steps: vec![
                NaiveDate::from_ymd_opt(2019, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(),
            ],
        };
        let range = TimeRange::year(2020).unwrap();
        assert_eq!(grid.dates_in(Some(&range)).len(), 1);
        assert_eq!(grid.dates_in(None).len(), 2);
        assert_eq!(grid.tile_extent(), (1000.0, 1000.0));
    }
}
