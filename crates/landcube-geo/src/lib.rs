//! Landcube Geo - CRS handling and raster/vector conversion
//!
//! This crate handles the geometric side of the pipeline: geometry validation,
//! reprojection of polygons and rasters, burning polygons into label grids and
//! tracing label grids back into polygons.

pub mod models;
pub mod polygonize;
pub mod rasterize;
pub mod transform;
pub mod validation;

pub use polygonize::{polygonize, PolygonizeOptions};
pub use rasterize::{rasterize, BurnValue, RasterizeOptions};
pub use transform::{check_crs_match, reproject_polygon, reproject_polygons, reproject_raster, Reprojector};
pub use validation::{validate_geometry, validate_polygons, ValidationResult};
