//! Geometry conversions for landcube-geo.
//!
//! This module re-exports canonical types from `landcube-core` and provides
//! conversions to/from the `geo` crate and GeoJSON feature collections.

use geo::Geometry as GeoGeometry;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use landcube_core::error::{LandcubeError, Result};

// Re-export canonical types from landcube-core
pub use landcube_core::models::{AttributeValue, BoundingBox, Crs, Geometry, Polygon};

/// Property key holding the class code of labeled samples
pub const CLASS_CODE_PROPERTY: &str = "class_code";

fn to_line_string(ring: &[[f64; 2]]) -> geo::LineString {
    geo::LineString::new(ring.iter().map(|c| geo::Coord { x: c[0], y: c[1] }).collect())
}

fn to_geo_polygon(rings: &[Vec<[f64; 2]>]) -> geo::Polygon {
    match rings.split_first() {
        Some((exterior, interiors)) => geo::Polygon::new(
            to_line_string(exterior),
            interiors.iter().map(|r| to_line_string(r)).collect(),
        ),
        None => geo::Polygon::new(geo::LineString::new(vec![]), vec![]),
    }
}

fn from_geo_polygon(p: &geo::Polygon) -> Vec<Vec<[f64; 2]>> {
    let mut rings = vec![p.exterior().coords().map(|c| [c.x, c.y]).collect::<Vec<_>>()];
    for interior in p.interiors() {
        rings.push(interior.coords().map(|c| [c.x, c.y]).collect());
    }
    rings
}

/// Convert a canonical Geometry to a geo::Geometry
pub fn to_geo_geometry(geom: &Geometry) -> GeoGeometry {
    match geom {
        Geometry::Polygon { coordinates } => GeoGeometry::Polygon(to_geo_polygon(coordinates)),
        Geometry::MultiPolygon { coordinates } => GeoGeometry::MultiPolygon(geo::MultiPolygon::new(
            coordinates.iter().map(|p| to_geo_polygon(p)).collect(),
        )),
    }
}

/// Convert an areal geo::Geometry to a canonical Geometry
///
/// Returns `None` for non-areal geometries.
pub fn from_geo_geometry(geom: &GeoGeometry) -> Option<Geometry> {
    match geom {
        GeoGeometry::Polygon(p) => Some(Geometry::polygon(from_geo_polygon(p))),
        GeoGeometry::MultiPolygon(mp) => {
            Some(Geometry::multi_polygon(mp.iter().map(from_geo_polygon).collect()))
        }
        GeoGeometry::Rect(r) => from_geo_geometry(&GeoGeometry::Polygon(r.to_polygon())),
        GeoGeometry::Triangle(t) => from_geo_geometry(&GeoGeometry::Polygon(t.to_polygon())),
        _ => None,
    }
}

/// Extension trait for Geometry with geo-crate operations
pub trait GeometryExt {
    /// Convert to geo::Geometry
    fn to_geo(&self) -> GeoGeometry;

    /// Unsigned area in CRS units
    fn area(&self) -> f64;

    /// Get the centroid as coordinates
    fn centroid_coords(&self) -> Option<[f64; 2]>;
}

impl GeometryExt for Geometry {
    fn to_geo(&self) -> GeoGeometry {
        to_geo_geometry(self)
    }

    fn area(&self) -> f64 {
        use geo::Area;
        self.to_geo().unsigned_area()
    }

    fn centroid_coords(&self) -> Option<[f64; 2]> {
        use geo::Centroid;
        self.to_geo().centroid().map(|p| [p.x(), p.y()])
    }
}

/// Serialize polygons sharing one CRS into a GeoJSON FeatureCollection
///
/// The CRS is written as a named `crs` foreign member.
pub fn polygons_to_feature_collection(polygons: &[Polygon]) -> Result<FeatureCollection> {
    let crs = polygons.first().map(|p| p.crs.clone());
    if let Some(crs) = &crs {
        if let Some(other) = polygons.iter().find(|p| &p.crs != crs) {
            return Err(landcube_core::CrsError::Mismatch {
                expected: crs.to_string(),
                found: other.crs.to_string(),
            }
            .into());
        }
    }

    let features = polygons
        .iter()
        .map(|polygon| {
            let geometry = geojson::Geometry::from_json_value(polygon.geometry.to_geojson())
                .map_err(|e| LandcubeError::Serialization(e.to_string()))?;

            let mut properties = JsonObject::new();
            for (key, value) in &polygon.attributes {
                properties.insert(key.clone(), serde_json::to_value(value)?);
            }
            if let Some(code) = polygon.class_code {
                properties.insert(CLASS_CODE_PROPERTY.to_string(), code.into());
            }

            Ok(Feature {
                bbox: None,
                geometry: Some(geometry),
                id: Some(geojson::feature::Id::Number(polygon.id.into())),
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let foreign_members = crs.map(|crs| {
        let mut members = JsonObject::new();
        members.insert(
            "crs".to_string(),
            serde_json::json!({ "type": "name", "properties": { "name": crs.definition() } }),
        );
        members
    });

    Ok(FeatureCollection { bbox: None, features, foreign_members })
}

/// Parse a GeoJSON FeatureCollection into polygons
///
/// Features without an id are numbered by position (starting at 1). The CRS
/// comes from the `crs` foreign member, defaulting to WGS 84.
pub fn polygons_from_geojson(content: &str) -> Result<Vec<Polygon>> {
    let geojson: GeoJson = content
        .parse()
        .map_err(|e| LandcubeError::Serialization(format!("Failed to parse GeoJSON: {}", e)))?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        GeoJson::Feature(feature) => {
            FeatureCollection { bbox: None, features: vec![feature], foreign_members: None }
        }
        GeoJson::Geometry(_) => {
            return Err(LandcubeError::Serialization(
                "Expected a Feature or FeatureCollection, found a bare geometry".to_string(),
            ))
        }
    };

    let crs = match collection
        .foreign_members
        .as_ref()
        .and_then(|fm| fm.get("crs"))
        .and_then(|crs| crs.pointer("/properties/name"))
        .and_then(|name| name.as_str())
    {
        Some(name) => Crs::parse(name)?,
        None => Crs::wgs84(),
    };

    collection
        .features
        .iter()
        .enumerate()
        .map(|(idx, feature)| convert_feature(feature, idx, &crs))
        .collect()
}

fn convert_feature(feature: &Feature, idx: usize, crs: &Crs) -> Result<Polygon> {
    let id = match &feature.id {
        Some(geojson::feature::Id::Number(n)) => n.as_u64(),
        Some(geojson::feature::Id::String(s)) => s.parse().ok(),
        None => None,
    }
    .unwrap_or(idx as u64 + 1);

    let geometry = feature
        .geometry
        .as_ref()
        .and_then(|g| serde_json::to_value(g).ok())
        .and_then(|v| Geometry::from_geojson(&v))
        .ok_or_else(|| LandcubeError::InvalidGeometry {
            entity: format!("feature {}", id),
            reason: "feature has no Polygon or MultiPolygon geometry".to_string(),
        })?;

    let mut polygon = Polygon::new(id, geometry, crs.clone());
    if let Some(properties) = &feature.properties {
        for (key, value) in properties {
            if key == CLASS_CODE_PROPERTY {
                polygon.class_code = value.as_i64();
                continue;
            }
            match serde_json::from_value::<AttributeValue>(value.clone()) {
                Ok(attr) => {
                    polygon.attributes.insert(key.clone(), attr);
                }
                Err(_) => tracing::debug!("Skipping non-scalar property '{}' on feature {}", key, id),
            }
        }
    }

    Ok(polygon)
}
