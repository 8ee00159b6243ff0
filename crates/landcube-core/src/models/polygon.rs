use super::geometry::{BoundingBox, Crs, Geometry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Polygon identifier; non-zero so it can be burned next to the background value
pub type PolygonId = u64;

/// Attribute value attached to a polygon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    /// Numeric view, used when burning an attribute instead of the id
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Integer(v) => Some(*v as f64),
            AttributeValue::Number(v) => Some(*v),
            AttributeValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            AttributeValue::Text(s) => s.trim().parse().ok(),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(v) => Some(*v),
            AttributeValue::Number(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            AttributeValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Canonical category string used by one-hot encoding
    pub fn as_category(&self) -> String {
        match self {
            AttributeValue::Bool(b) => b.to_string(),
            AttributeValue::Integer(v) => v.to_string(),
            AttributeValue::Number(v) if v.fract() == 0.0 && v.is_finite() => {
                format!("{}", *v as i64)
            }
            AttributeValue::Number(v) => v.to_string(),
            AttributeValue::Text(s) => s.clone(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_category())
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::Text(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::Text(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Integer(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Number(v)
    }
}

/// A ring-set geometry with CRS, attributes and an optional class code
///
/// Training samples carry `class_code`; segmentation objects do not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub id: PolygonId,
    pub geometry: Geometry,
    pub crs: Crs,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_code: Option<i64>,
}

impl Polygon {
    pub fn new(id: PolygonId, geometry: Geometry, crs: Crs) -> Self {
        Self { id, geometry, crs, attributes: BTreeMap::new(), class_code: None }
    }

    /// Builder-style class code for labeled samples
    pub fn with_class(mut self, code: i64) -> Self {
        self.class_code = Some(code);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    pub fn is_labeled(&self) -> bool {
        self.class_code.is_some()
    }

    pub fn bbox(&self) -> Option<BoundingBox> {
        self.geometry.bbox()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_rendering() {
        assert_eq!(AttributeValue::from("forest").as_category(), "forest");
        assert_eq!(AttributeValue::Number(3.0).as_category(), "3");
        assert_eq!(AttributeValue::Number(2.5).as_category(), "2.5");
        assert_eq!(AttributeValue::Integer(7).as_category(), "7");
    }

    #[test]
    fn test_polygon_serde_untagged_attributes() {
        let poly = Polygon::new(
            4,
            Geometry::polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]),
            Crs::epsg(32614),
        )
        .with_class(12)
        .with_attribute("landcover_type", "forest")
        .with_attribute("elevation", 1200.5);

        let json = serde_json::to_value(&poly).unwrap();
        assert_eq!(json["attributes"]["landcover_type"], "forest");
        assert_eq!(json["crs"], "EPSG:32614");

        let back: Polygon = serde_json::from_value(json).unwrap();
        assert_eq!(back, poly);
        assert!(back.is_labeled());
    }
}
