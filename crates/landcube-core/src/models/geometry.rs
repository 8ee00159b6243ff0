//! Canonical geometry types used across all landcube crates.
//!
//! These types provide a bridge between GeoJSON serialization and the
//! computational geo crate types.

use crate::error::CrsError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate Reference System identified by its textual definition
///
/// Accepted forms are `EPSG:<code>`, PROJ strings (`+proj=...`) and WKT.
#[derive(Debug, Clone, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Crs {
    definition: String,
}

impl Crs {
    /// Parse and validate a CRS definition
    pub fn parse(definition: &str) -> Result<Self, CrsError> {
        let trimmed = definition.trim();
        let unparsable = || CrsError::Unparsable { definition: definition.to_string() };

        if trimmed.is_empty() {
            return Err(unparsable());
        }

        let upper = trimmed.to_ascii_uppercase();
        if let Some(code) = upper.strip_prefix("EPSG:") {
            let code: u32 = code.trim().parse().map_err(|_| unparsable())?;
            return Ok(Self::epsg(code));
        }

        if trimmed.starts_with("+proj=") || trimmed.starts_with("+init=") {
            return Ok(Self { definition: trimmed.to_string() });
        }

        const WKT_ROOTS: [&str; 6] =
            ["PROJCS[", "GEOGCS[", "PROJCRS[", "GEOGCRS[", "GEODCRS[", "COMPOUNDCRS["];
        if WKT_ROOTS.iter().any(|root| upper.starts_with(root)) && trimmed.ends_with(']') {
            return Ok(Self { definition: trimmed.to_string() });
        }

        Err(unparsable())
    }

    /// CRS from an EPSG code
    pub fn epsg(code: u32) -> Self {
        Self { definition: format!("EPSG:{}", code) }
    }

    /// WGS 84 (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::epsg(4326)
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    /// EPSG code when the definition is an authority code
    pub fn epsg_code(&self) -> Option<u32> {
        self.definition.to_ascii_uppercase().strip_prefix("EPSG:")?.trim().parse().ok()
    }

    /// Re-validate a definition that was deserialized without going through `parse`
    pub fn validate(&self) -> Result<(), CrsError> {
        Self::parse(&self.definition).map(|_| ())
    }

    fn normalized(&self) -> String {
        self.definition.split_whitespace().collect::<Vec<_>>().join(" ").to_ascii_lowercase()
    }
}

impl PartialEq for Crs {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Default for Crs {
    fn default() -> Self {
        Self::wgs84()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.definition)
    }
}

/// Axis-aligned bounding box in CRS units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if two boxes overlap (touching edges do not count)
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Corner coordinates, counter-clockwise starting at the lower-left corner
    pub fn corners(&self) -> [[f64; 2]; 4] {
        [
            [self.min_x, self.min_y],
            [self.max_x, self.min_y],
            [self.max_x, self.max_y],
            [self.min_x, self.max_y],
        ]
    }

    /// Smallest box containing every given coordinate
    pub fn from_coords<'a>(coords: impl IntoIterator<Item = &'a [f64; 2]>) -> Option<Self> {
        let mut iter = coords.into_iter();
        let first = iter.next()?;
        let mut bbox = BoundingBox {
            min_x: first[0],
            min_y: first[1],
            max_x: first[0],
            max_y: first[1],
        };
        for c in iter {
            bbox.min_x = bbox.min_x.min(c[0]);
            bbox.min_y = bbox.min_y.min(c[1]);
            bbox.max_x = bbox.max_x.max(c[0]);
            bbox.max_y = bbox.max_y.max(c[1]);
        }
        Some(bbox)
    }

    pub fn to_geometry(&self) -> Geometry {
        let c = self.corners();
        Geometry::polygon(vec![vec![c[0], c[1], c[2], c[3], c[0]]])
    }
}

/// Query region: a bounding box in its own CRS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub bbox: BoundingBox,
    pub crs: Crs,
}

impl Region {
    pub fn new(bbox: BoundingBox, crs: Crs) -> Self {
        Self { bbox, crs }
    }
}

/// Geometry type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeometryType {
    Polygon,
    MultiPolygon,
}

/// GeoJSON-compatible areal geometry
///
/// Rings are lists of `[x, y]` coordinates; the first ring of a polygon is the
/// exterior, following rings are holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
    MultiPolygon { coordinates: Vec<Vec<Vec<[f64; 2]>>> },
}

impl Geometry {
    /// Create a Polygon geometry
    pub fn polygon(rings: Vec<Vec<[f64; 2]>>) -> Self {
        Geometry::Polygon { coordinates: rings }
    }

    /// Create a MultiPolygon geometry
    pub fn multi_polygon(polygons: Vec<Vec<Vec<[f64; 2]>>>) -> Self {
        Geometry::MultiPolygon { coordinates: polygons }
    }

    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Polygon { .. } => GeometryType::Polygon,
            Geometry::MultiPolygon { .. } => GeometryType::MultiPolygon,
        }
    }

    /// Ring sets of every member polygon
    pub fn polygons(&self) -> Vec<&Vec<Vec<[f64; 2]>>> {
        match self {
            Geometry::Polygon { coordinates } => vec![coordinates],
            Geometry::MultiPolygon { coordinates } => coordinates.iter().collect(),
        }
    }

    /// Apply a coordinate mapping to every vertex
    pub fn try_map_coords<E>(
        &self,
        mut f: impl FnMut([f64; 2]) -> Result<[f64; 2], E>,
    ) -> Result<Geometry, E> {
        let mut map_rings = |rings: &Vec<Vec<[f64; 2]>>| -> Result<Vec<Vec<[f64; 2]>>, E> {
            rings
                .iter()
                .map(|ring| ring.iter().map(|c| f(*c)).collect::<Result<Vec<_>, E>>())
                .collect()
        };
        Ok(match self {
            Geometry::Polygon { coordinates } => Geometry::Polygon { coordinates: map_rings(coordinates)? },
            Geometry::MultiPolygon { coordinates } => Geometry::MultiPolygon {
                coordinates: coordinates.iter().map(&mut map_rings).collect::<Result<_, E>>()?,
            },
        })
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        BoundingBox::from_coords(
            self.polygons().into_iter().flat_map(|rings| rings.iter().flatten()),
        )
    }

    /// Try to parse from a serde_json::Value (GeoJSON)
    pub fn from_geojson(value: &serde_json::Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }

    /// Convert to serde_json::Value (GeoJSON)
    pub fn to_geojson(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crs_parse_epsg() {
        let crs = Crs::parse("epsg:32614").unwrap();
        assert_eq!(crs.epsg_code(), Some(32614));
        assert_eq!(crs, Crs::epsg(32614));
    }

    #[test]
    fn test_crs_parse_proj_string() {
        let crs = Crs::parse("+proj=longlat +datum=WGS84 +no_defs").unwrap();
        assert_eq!(crs.epsg_code(), None);
        assert_eq!(crs, Crs::parse("+proj=longlat  +datum=WGS84 +no_defs").unwrap());
    }

    #[test]
    fn test_crs_parse_rejects_garbage() {
        assert!(matches!(Crs::parse("not a crs"), Err(CrsError::Unparsable { .. })));
        assert!(Crs::parse("EPSG:abc").is_err());
        assert!(Crs::parse("").is_err());
    }

    #[test]
    fn test_geometry_serialization() {
        let polygon = Geometry::polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]);
        let json = serde_json::to_string(&polygon).unwrap();
        assert!(json.contains("Polygon"));

        let parsed: Geometry = serde_json::from_str(&json).unwrap();
        assert_eq!(polygon, parsed);
    }

    #[test]
    fn test_bbox_of_multipolygon() {
        let geom = Geometry::multi_polygon(vec![
            vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]],
            vec![vec![[5.0, 5.0], [6.0, 5.0], [6.0, 7.0], [5.0, 5.0]]],
        ]);
        let bbox = geom.bbox().unwrap();
        assert_eq!(bbox, BoundingBox::new(0.0, 0.0, 6.0, 7.0));
    }

    #[test]
    fn test_bbox_intersects_excludes_touching() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
        let c = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&c));
    }
}
