use crate::models::{Geometry, Polygon};

/// Validation result with details
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

/// Validation error with location details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub location: String,
    pub reason: String,
}

impl ValidationResult {
    /// Create a valid result
    pub fn valid() -> Self {
        Self { is_valid: true, errors: Vec::new() }
    }

    /// Add an error to the result
    pub fn add_error(&mut self, location: String, reason: String) {
        self.is_valid = false;
        self.errors.push(ValidationError { location, reason });
    }

    /// First error reason, for one-line log messages
    pub fn first_reason(&self) -> Option<&str> {
        self.errors.first().map(|e| e.reason.as_str())
    }
}

/// Validate an areal geometry: finite coordinates, closed rings of at least 4 points
pub fn validate_geometry(geometry: &Geometry) -> ValidationResult {
    match geometry {
        Geometry::Polygon { coordinates } => validate_rings(coordinates, "Polygon"),
        Geometry::MultiPolygon { coordinates } => {
            let mut result = ValidationResult::valid();
            if coordinates.is_empty() {
                result.add_error("MultiPolygon".to_string(), "MultiPolygon has no members".to_string());
            }
            for (i, rings) in coordinates.iter().enumerate() {
                let member = validate_rings(rings, "Polygon");
                for error in member.errors {
                    result.add_error(format!("MultiPolygon[{}].{}", i, error.location), error.reason);
                }
            }
            result
        }
    }
}

fn validate_rings(rings: &[Vec<[f64; 2]>], label: &str) -> ValidationResult {
    let mut result = ValidationResult::valid();

    if rings.is_empty() {
        result.add_error(label.to_string(), "Polygon has no exterior ring".to_string());
        return result;
    }

    for (i, ring) in rings.iter().enumerate() {
        let location = if i == 0 {
            format!("{} exterior", label)
        } else {
            format!("{} interior[{}]", label, i - 1)
        };

        if ring.len() < 4 {
            result.add_error(
                location.clone(),
                format!("Ring must have at least 4 points, found {}", ring.len()),
            );
        }

        // Check if closed
        if let (Some(first), Some(last)) = (ring.first(), ring.last()) {
            if first != last {
                result.add_error(
                    location.clone(),
                    "Ring must be closed (first point == last point)".to_string(),
                );
            }
        }

        if ring.iter().any(|c| !c[0].is_finite() || !c[1].is_finite()) {
            result.add_error(location, "Coordinates must be finite".to_string());
        }
    }

    result
}

/// Split polygons into valid ones and skipped ones, logging each skip
pub fn validate_polygons(polygons: Vec<Polygon>) -> (Vec<Polygon>, usize) {
    let mut valid = Vec::with_capacity(polygons.len());
    let mut skipped = 0;

    for polygon in polygons {
        let result = validate_geometry(&polygon.geometry);
        if result.is_valid {
            valid.push(polygon);
        } else {
            skipped += 1;
            tracing::warn!(
                polygon_id = polygon.id,
                "Skipping invalid polygon: {}",
                result.first_reason().unwrap_or("invalid geometry")
            );
        }
    }

    (valid, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use landcube_core::models::Crs;

    #[test]
    fn test_valid_polygon() {
        let geom = Geometry::polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]);
        assert!(validate_geometry(&geom).is_valid);
    }

    #[test]
    fn test_open_ring_and_nan() {
        let geom = Geometry::polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, f64::NAN], [0.0, 1.0]]]);
        let result = validate_geometry(&geom);
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 2);
    }

    #[test]
    fn test_multipolygon_member_location() {
        let geom = Geometry::multi_polygon(vec![
            vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]],
            vec![vec![[0.0, 0.0], [1.0, 0.0], [0.0, 0.0]]],
        ]);
        let result = validate_geometry(&geom);
        assert!(!result.is_valid);
        assert!(result.errors[0].location.starts_with("MultiPolygon[1]"));
    }

    #[test]
    fn test_validate_polygons_skips_invalid() {
        let good = Polygon::new(
            1,
            Geometry::polygon(vec![vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]),
            Crs::wgs84(),
        );
        let bad = Polygon::new(2, Geometry::polygon(vec![]), Crs::wgs84());
        let (valid, skipped) = validate_polygons(vec![good, bad]);
        assert_eq!(valid.len(), 1);
        assert_eq!(skipped, 1);
    }
}
