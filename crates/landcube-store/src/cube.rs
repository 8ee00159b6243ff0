//! Helpers shared by data cube adapters.
//!
//! Adapters keep whole native grid cells; a requested tile may be a
//! memory-driven subdivision of a cell and carries a time window, so the
//! native stack is cropped and filtered before it is handed out.

use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::{GridSpec, RasterStack, Tile, TileKey};
use landcube_geo::check_crs_match;
use ndarray::{s, Axis};

/// Native (level 0) cell containing the tile's upper-left pixel
pub fn native_key(grid: &GridSpec, tile: &Tile) -> TileKey {
    let half = grid.resolution / 2.0;
    let (x, y) = grid.cell_at(tile.bbox.min_x + half, tile.bbox.max_y - half);
    TileKey::new(x, y)
}

/// Cut `tile` out of the native stack that contains it
///
/// Fails with `DataGap` when no acquisition falls inside the tile's time
/// range or when every cell of the window is nodata.
pub fn crop_to_tile(native: &RasterStack, tile: &Tile) -> Result<RasterStack> {
    check_crs_match(&native.crs, &tile.crs)?;

    let (rows, cols) = native.shape();
    let (col, row) = native.transform.world_to_pixel(tile.bbox.min_x, tile.bbox.max_y)?;
    let (c0, r0) = (col.round() as i64, row.round() as i64);
    let (h, w) = tile.shape;

    if c0 < 0 || r0 < 0 || c0 as usize + w > cols || r0 as usize + h > rows {
        return Err(LandcubeError::InvalidRaster {
            reason: format!(
                "tile {} window ({}, {}) + {:?} exceeds the stored {}x{} cell",
                tile.key, r0, c0, tile.shape, rows, cols
            ),
        });
    }
    let (r0, c0) = (r0 as usize, c0 as usize);

    let times: Vec<usize> = native
        .times
        .iter()
        .enumerate()
        .filter(|(_, d)| tile.time_range.map_or(true, |range| range.contains(**d)))
        .map(|(i, _)| i)
        .collect();
    if times.is_empty() {
        return Err(data_gap(tile, "no acquisition inside the requested time range"));
    }

    let data = native.data.slice(s![.., .., r0..r0 + h, c0..c0 + w]).select(Axis(1), &times);
    let stack = RasterStack::new(
        data,
        native.band_names.clone(),
        times.iter().map(|&i| native.times[i]).collect(),
        native.transform.window(c0, r0),
        native.crs.clone(),
        native.nodata.clone(),
    )?;

    let any_valid = stack
        .layers()
        .iter()
        .any(|layer| layer.values.iter().any(|v| !landcube_core::models::is_nodata(*v, layer.nodata)));
    if !any_valid {
        return Err(data_gap(tile, "every pixel is nodata"));
    }

    Ok(stack)
}

fn data_gap(tile: &Tile, reason: &str) -> LandcubeError {
    LandcubeError::DataGap {
        product: tile.product.clone(),
        tile: tile.key.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use landcube_core::models::{Affine, Crs, TimeRange};
    use ndarray::Array4;

    fn grid() -> GridSpec {
        GridSpec {
            crs: Crs::epsg(32614),
            resolution: 10.0,
            tile_size: (4, 4),
            origin: [0.0, 80.0],
            band_names: vec!["red".into()],
            time_steps: vec![
                NaiveDate::from_ymd_opt(2019, 5, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 5, 1).unwrap(),
            ],
        }
    }

    fn native(grid: &GridSpec, x: i64, y: i64) -> RasterStack {
        let bbox = grid.cell_bbox(x, y);
        let data = Array4::from_shape_fn((1, 2, 4, 4), |(_, t, r, c)| (t * 100 + r * 4 + c) as f64);
        RasterStack::new(
            data,
            grid.band_names.clone(),
            grid.time_steps.clone(),
            Affine::from_origin(bbox.min_x, bbox.max_y, 10.0, 10.0),
            grid.crs.clone(),
            vec![None],
        )
        .unwrap()
    }

    #[test]
    fn test_crop_subtile_and_window() {
        let grid = grid();
        let stack = native(&grid, 1, 0);

        // lower-right quarter of cell (1, 0), 2020 only
        let mut tile = grid.native_tile("s2", 1, 0, TimeRange::year(2020));
        tile.bbox = landcube_core::models::BoundingBox::new(60.0, 40.0, 80.0, 60.0);
        tile.shape = (2, 2);
        tile.transform = Affine::from_origin(60.0, 60.0, 10.0, 10.0);
        tile.key.level = 1;

        assert_eq!(native_key(&grid, &tile), TileKey::new(1, 0));
        let cropped = crop_to_tile(&stack, &tile).unwrap();
        assert_eq!(cropped.shape(), (2, 2));
        assert_eq!(cropped.times.len(), 1);
        assert_eq!(cropped.data[[0, 0, 0, 0]], 110.0);
        assert_eq!(cropped.transform, tile.transform);
    }

    #[test]
    fn test_empty_window_is_data_gap() {
        let grid = grid();
        let stack = native(&grid, 0, 0);
        let tile = grid.native_tile("s2", 0, 0, TimeRange::year(2018));
        let err = crop_to_tile(&stack, &tile).unwrap_err();
        assert!(matches!(err, LandcubeError::DataGap { .. }));
    }
}
