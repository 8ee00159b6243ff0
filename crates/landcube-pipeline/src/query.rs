//! Tile queries and the partitioning of a region into tiles.
//!
//! The data cube owns the product grid; this module decides how the cells
//! touched by a query become units of work. A native cell whose stack would
//! not fit the per-tile memory budget is split into `2^level x 2^level`
//! sub-tiles, and tiles are produced lazily in row-major order.

use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::{Affine, BoundingBox, GridSpec, RasterStack, Region, Tile, TileKey, TimeRange};
use landcube_geo::Reprojector;
use landcube_store::DataCube;
use serde::{Deserialize, Serialize};

/// Deepest subdivision tried before giving up on the memory budget
const MAX_LEVEL: u8 = 16;

/// Product, region and optional time range of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileQuery {
    pub product: String,
    pub region: Region,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
}

impl TileQuery {
    pub fn new(product: impl Into<String>, region: Region) -> Self {
        Self { product: product.into(), region, time_range: None }
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = Some(time_range);
        self
    }
}

/// Partition of one query over a product grid
#[derive(Debug, Clone)]
pub struct TilePlan {
    product: String,
    grid: GridSpec,
    time_range: Option<TimeRange>,
    /// Query region in the grid CRS
    bounds: BoundingBox,
    level: u8,
    /// Inclusive tile coordinate ranges at `level`
    x_range: (i64, i64),
    y_range: (i64, i64),
}

impl TilePlan {
    /// Partition `query` over `grid` so that no tile stack exceeds `memory_budget` bytes
    pub fn new(grid: &GridSpec, query: &TileQuery, memory_budget: u64) -> Result<Self> {
        grid.validate()?;
        let bounds = Reprojector::new(&query.region.crs, &grid.crs)?.bbox(&query.region.bbox)?;

        let bands = grid.band_names.len();
        let times = grid.dates_in(query.time_range.as_ref()).len().max(1);
        let level = subdivision_level(grid.tile_size, bands, times, memory_budget)?;

        let (w, h) = grid.tile_extent();
        let (ox, oy) = (grid.origin[0], grid.origin[1]);
        let x0 = ((bounds.min_x - ox) / w).floor() as i64;
        let x1 = (((bounds.max_x - ox) / w).ceil() as i64 - 1).max(x0);
        let y0 = ((oy - bounds.max_y) / h).floor() as i64;
        let y1 = (((oy - bounds.min_y) / h).ceil() as i64 - 1).max(y0);

        let n = 1i64 << level;
        let plan = Self {
            product: query.product.clone(),
            grid: grid.clone(),
            time_range: query.time_range,
            bounds,
            level,
            x_range: (x0 * n, x1 * n + n - 1),
            y_range: (y0 * n, y1 * n + n - 1),
        };

        tracing::debug!(
            product = %plan.product,
            level,
            cells = (x1 - x0 + 1) * (y1 - y0 + 1),
            tile_bytes = plan.max_tile_bytes(),
            "Planned tile partition"
        );
        Ok(plan)
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Query region in the grid CRS
    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    /// Number of subdivisions below the native grid
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Size of the largest tile stack in bytes
    pub fn max_tile_bytes(&self) -> u64 {
        let parts = 1usize << self.level;
        let (rows, cols) = self.grid.tile_size;
        let times = self.grid.dates_in(self.time_range.as_ref()).len().max(1);
        RasterStack::estimate_bytes(
            self.grid.band_names.len(),
            times,
            (rows.div_ceil(parts), cols.div_ceil(parts)),
        )
    }

    /// Fresh lazy pass over the tiles; every call restarts from the first tile
    pub fn tiles(&self) -> TileIter {
        TileIter { plan: self.clone(), cursor: Some((self.x_range.0, self.y_range.0)) }
    }

    fn advance(&self, x: i64, y: i64) -> Option<(i64, i64)> {
        if x < self.x_range.1 {
            Some((x + 1, y))
        } else if y < self.y_range.1 {
            Some((self.x_range.0, y + 1))
        } else {
            None
        }
    }

    /// Number of tiles `tiles()` yields; columns and rows are checked independently
    pub fn tile_count(&self) -> usize {
        let columns = (self.x_range.0..=self.x_range.1).filter(|&x| self.column(x).is_some()).count();
        let rows = (self.y_range.0..=self.y_range.1).filter(|&y| self.row(y).is_some()).count();
        columns * rows
    }

    /// Tile at level coordinates (x, y), if it is non-empty and touches the region
    fn tile_at(&self, x: i64, y: i64) -> Option<Tile> {
        let column = self.column(x)?;
        let row = self.row(y)?;
        let res = self.grid.resolution;

        Some(Tile {
            key: TileKey { x, y, level: self.level, window: self.time_range },
            product: self.product.clone(),
            bbox: BoundingBox::new(column.lo, row.lo, column.hi, row.hi),
            crs: self.grid.crs.clone(),
            time_range: self.time_range,
            transform: Affine::from_origin(column.lo, row.hi, res, res),
            shape: (row.end - row.start, column.end - column.start),
        })
    }

    /// Pixel columns of sub-tile column `x`, if non-empty and inside the region
    fn column(&self, x: i64) -> Option<Span> {
        let n = 1i64 << self.level;
        let (w, _) = self.grid.tile_extent();
        let (start, end) = split(self.grid.tile_size.1, n, x.rem_euclid(n));
        if start == end {
            return None;
        }
        let res = self.grid.resolution;
        let lo = self.grid.origin[0] + x.div_euclid(n) as f64 * w + start as f64 * res;
        let span = Span { start, end, lo, hi: lo + (end - start) as f64 * res };
        self.touches(span.lo, span.hi, self.bounds.min_x, self.bounds.max_x).then_some(span)
    }

    /// Pixel rows of sub-tile row `y`, if non-empty and inside the region
    fn row(&self, y: i64) -> Option<Span> {
        let n = 1i64 << self.level;
        let (_, h) = self.grid.tile_extent();
        let (start, end) = split(self.grid.tile_size.0, n, y.rem_euclid(n));
        if start == end {
            return None;
        }
        let res = self.grid.resolution;
        let hi = self.grid.origin[1] - y.div_euclid(n) as f64 * h - start as f64 * res;
        let span = Span { start, end, lo: hi - (end - start) as f64 * res, hi };
        self.touches(span.lo, span.hi, self.bounds.min_y, self.bounds.max_y).then_some(span)
    }

    /// Area overlap with the region along one axis; inclusive when the region has no area
    fn touches(&self, lo: f64, hi: f64, region_lo: f64, region_hi: f64) -> bool {
        if self.bounds.width() > 0.0 && self.bounds.height() > 0.0 {
            lo < region_hi && hi > region_lo
        } else {
            lo <= region_hi && hi >= region_lo
        }
    }
}

/// Pixel window of a sub-tile along one axis and its world extent
#[derive(Debug, Clone, Copy)]
struct Span {
    start: usize,
    end: usize,
    lo: f64,
    hi: f64,
}

/// Pixel bounds of part `i` when `len` pixels are split into `n` parts
fn split(len: usize, n: i64, i: i64) -> (usize, usize) {
    let (n, i) = (n as usize, i as usize);
    (i * len / n, (i + 1) * len / n)
}

/// Lazy, row-major sequence of the tiles of a plan
#[derive(Debug, Clone)]
pub struct TileIter {
    plan: TilePlan,
    cursor: Option<(i64, i64)>,
}

impl Iterator for TileIter {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        loop {
            let (x, y) = self.cursor?;
            self.cursor = self.plan.advance(x, y);
            if let Some(tile) = self.plan.tile_at(x, y) {
                return Some(tile);
            }
        }
    }
}

/// Resolve the product grid and lazily enumerate the tiles of `query`
pub async fn enumerate_tiles(cube: &dyn DataCube, query: &TileQuery, memory_budget: u64) -> Result<TileIter> {
    let grid = cube.grid(&query.product).await?;
    Ok(TilePlan::new(&grid, query, memory_budget)?.tiles())
}

/// Smallest subdivision level whose largest tile fits the budget
fn subdivision_level(tile_size: (usize, usize), bands: usize, times: usize, budget: u64) -> Result<u8> {
    let mut level = 0u8;
    loop {
        let parts = 1usize << level;
        let shape = (tile_size.0.div_ceil(parts), tile_size.1.div_ceil(parts));
        let bytes = RasterStack::estimate_bytes(bands, times, shape);
        if bytes <= budget {
            return Ok(level);
        }
        if (shape.0 == 1 && shape.1 == 1) || level >= MAX_LEVEL {
            return Err(LandcubeError::ConfigInvalid {
                key: "tile_memory_mb".to_string(),
                reason: format!(
                    "a {}x{} tile with {} bands and {} dates needs {} bytes, budget is {}",
                    shape.0, shape.1, bands, times, bytes, budget
                ),
            });
        }
        level += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use landcube_core::models::Crs;
    use std::collections::HashSet;

    fn grid(tile_size: (usize, usize)) -> GridSpec {
        GridSpec {
            crs: Crs::epsg(32614),
            resolution: 10.0,
            tile_size,
            origin: [0.0, 1000.0],
            band_names: vec!["red".into(), "nir".into()],
            time_steps: vec![
                NaiveDate::from_ymd_opt(2020, 3, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 9, 1).unwrap(),
            ],
        }
    }

    fn query(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> TileQuery {
        TileQuery::new("s2", Region::new(BoundingBox::new(min_x, min_y, max_x, max_y), Crs::epsg(32614)))
    }

    const UNLIMITED: u64 = u64::MAX;

    #[test]
    fn test_two_by_two_region() {
        let grid = grid((10, 10));
        let plan = TilePlan::new(&grid, &query(0.0, 800.0, 200.0, 1000.0), UNLIMITED).unwrap();
        let keys: Vec<(i64, i64)> = plan.tiles().map(|t| (t.key.x, t.key.y)).collect();
        assert_eq!(keys, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);

        let tile = plan.tiles().nth(3).unwrap();
        assert_eq!(tile, grid.native_tile("s2", 1, 1, None));
    }

    #[test]
    fn test_region_edges() {
        let grid = grid((10, 10));
        // Touches the cell edge at x = 100 but does not enter cell 1
        let plan = TilePlan::new(&grid, &query(50.0, 950.0, 100.0, 990.0), UNLIMITED).unwrap();
        assert_eq!(plan.tiles().count(), 1);

        // Crosses into a third column by one metre
        let plan = TilePlan::new(&grid, &query(50.0, 950.0, 201.0, 990.0), UNLIMITED).unwrap();
        assert_eq!(plan.tiles().count(), 3);
    }

    #[test]
    fn test_time_window_in_keys() {
        let grid = grid((10, 10));
        let q = query(0.0, 900.0, 100.0, 1000.0).with_time_range(TimeRange::year(2020).unwrap());
        let tile = TilePlan::new(&grid, &q, UNLIMITED).unwrap().tiles().next().unwrap();
        assert_eq!(tile.key.to_string(), "0_0_20200101-20201231");
        assert_eq!(tile.time_range, q.time_range);
    }

    #[test]
    fn test_subdivision_fits_budget() {
        let grid = grid((5, 5));
        // One 5x5 tile with 2 bands x 2 dates is 800 bytes
        let plan = TilePlan::new(&grid, &query(0.0, 950.0, 50.0, 1000.0), 300).unwrap();
        assert_eq!(plan.level(), 1);
        assert!(plan.max_tile_bytes() <= 300);

        let tiles: Vec<Tile> = plan.tiles().collect();
        assert_eq!(tiles.len(), 4);
        let keys: HashSet<TileKey> = tiles.iter().map(|t| t.key.clone()).collect();
        assert_eq!(keys.len(), 4);
        assert!(tiles.iter().all(|t| t.key.level == 1));

        let shapes: Vec<(usize, usize)> = tiles.iter().map(|t| t.shape).collect();
        assert_eq!(shapes, vec![(2, 2), (2, 3), (3, 2), (3, 3)]);
        let pixels: usize = shapes.iter().map(|(r, c)| r * c).sum();
        assert_eq!(pixels, 25);

        // Sub-tiles stay aligned with the pixel grid of the native cell
        assert_eq!(tiles[3].bbox, BoundingBox::new(20.0, 950.0, 50.0, 980.0));
        assert_eq!(tiles[3].transform.bounds(tiles[3].shape), tiles[3].bbox);
    }

    #[test]
    fn test_budget_too_small() {
        let err = TilePlan::new(&grid((4, 4)), &query(0.0, 960.0, 40.0, 1000.0), 8).unwrap_err();
        assert!(matches!(err, LandcubeError::ConfigInvalid { .. }));
    }

    #[test]
    fn test_restartable() {
        let plan = TilePlan::new(&grid((10, 10)), &query(-150.0, 750.0, 150.0, 1000.0), UNLIMITED).unwrap();
        let first: Vec<TileKey> = plan.tiles().map(|t| t.key).collect();
        let second: Vec<TileKey> = plan.tiles().map(|t| t.key).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 12);
        assert_eq!(first[0], TileKey::new(-2, 0));
    }

    #[test]
    fn test_tile_count_matches_enumeration() {
        let cases = [
            (grid((10, 10)), query(-150.0, 750.0, 150.0, 1000.0), UNLIMITED),
            (grid((10, 10)), query(50.0, 950.0, 100.0, 990.0), UNLIMITED),
            (grid((10, 10)), query(150.0, 950.0, 150.0, 950.0), UNLIMITED),
            (grid((5, 5)), query(0.0, 950.0, 50.0, 1000.0), 300),
            // Three pixels split four ways leaves empty sub-tiles
            (grid((3, 3)), query(0.0, 970.0, 30.0, 1000.0), 32),
        ];
        for (grid, query, budget) in cases {
            let plan = TilePlan::new(&grid, &query, budget).unwrap();
            assert_eq!(plan.tile_count(), plan.tiles().count());
        }
    }

    #[test]
    fn test_point_region() {
        let plan = TilePlan::new(&grid((10, 10)), &query(150.0, 950.0, 150.0, 950.0), UNLIMITED).unwrap();
        let keys: Vec<TileKey> = plan.tiles().map(|t| t.key).collect();
        assert_eq!(keys, vec![TileKey::new(1, 0)]);
    }
}
