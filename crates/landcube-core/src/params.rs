//! Declarative hyperparameter definitions.
//!
//! Algorithm families describe their parameters with `ParamDef`s. User input
//! arrives as `key=value` strings (CLI `--param`) and is parsed, range checked
//! and merged with defaults into a JSON object, which each family then
//! deserializes into its own typed parameter struct.

use crate::error::{LandcubeError, Result};
use serde_json::{Map, Value};
use std::fmt;

/// Type and range of one parameter
#[derive(Debug, Clone, PartialEq)]
pub enum ParamKind {
    Int { default: i64, min: i64, max: i64 },
    Float { default: f64, min: f64, max: f64 },
    /// Integer that may be left unset with `none`
    OptionalInt { default: Option<i64>, min: i64, max: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: ParamKind,
}

impl ParamDef {
    pub const fn int(name: &'static str, default: i64, min: i64, max: i64, description: &'static str) -> Self {
        Self { name, description, kind: ParamKind::Int { default, min, max } }
    }

    pub const fn float(name: &'static str, default: f64, min: f64, max: f64, description: &'static str) -> Self {
        Self { name, description, kind: ParamKind::Float { default, min, max } }
    }

    pub const fn optional_int(
        name: &'static str,
        default: Option<i64>,
        min: i64,
        max: i64,
        description: &'static str,
    ) -> Self {
        Self { name, description, kind: ParamKind::OptionalInt { default, min, max } }
    }

    pub fn default_value(&self) -> Value {
        match &self.kind {
            ParamKind::Int { default, .. } => Value::from(*default),
            ParamKind::Float { default, .. } => Value::from(*default),
            ParamKind::OptionalInt { default, .. } => default.map_or(Value::Null, Value::from),
        }
    }

    /// Human readable default, e.g. for `landcube algorithms`
    pub fn default_display(&self) -> String {
        match &self.kind {
            ParamKind::Int { default, .. } => default.to_string(),
            ParamKind::Float { default, .. } => default.to_string(),
            ParamKind::OptionalInt { default, .. } => {
                default.map_or_else(|| "none".to_string(), |v| v.to_string())
            }
        }
    }

    fn parse(&self, algorithm: &str, raw: &str) -> Result<Value> {
        let invalid = |reason: String| LandcubeError::InvalidHyperparameter {
            algorithm: algorithm.to_string(),
            reason,
        };
        let raw = raw.trim();

        match &self.kind {
            ParamKind::Int { min, max, .. } => {
                let v: i64 = raw
                    .parse()
                    .map_err(|_| invalid(format!("{} expects an integer, got '{}'", self.name, raw)))?;
                check_range(self.name, v as f64, *min as f64, *max as f64).map_err(invalid)?;
                Ok(Value::from(v))
            }
            ParamKind::Float { min, max, .. } => {
                let v: f64 = raw
                    .parse()
                    .map_err(|_| invalid(format!("{} expects a number, got '{}'", self.name, raw)))?;
                if !v.is_finite() {
                    return Err(invalid(format!("{} must be finite", self.name)));
                }
                check_range(self.name, v, *min, *max).map_err(invalid)?;
                Ok(Value::from(v))
            }
            ParamKind::OptionalInt { min, max, .. } => {
                if raw.eq_ignore_ascii_case("none") {
                    return Ok(Value::Null);
                }
                let v: i64 = raw.parse().map_err(|_| {
                    invalid(format!("{} expects an integer or 'none', got '{}'", self.name, raw))
                })?;
                check_range(self.name, v as f64, *min as f64, *max as f64).map_err(invalid)?;
                Ok(Value::from(v))
            }
        }
    }
}

impl fmt::Display for ParamDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.default_display())
    }
}

fn check_range(name: &str, v: f64, min: f64, max: f64) -> std::result::Result<(), String> {
    if v < min || v > max {
        return Err(format!("{} must be within [{}, {}], got {}", name, min, max, v));
    }
    Ok(())
}

/// Parse `key=value` assignments against a parameter table
///
/// Every defined parameter appears in the result, with its default when not
/// assigned. Unknown keys and repeated keys are rejected.
pub fn parse_assignments(algorithm: &str, defs: &[ParamDef], assignments: &[String]) -> Result<Map<String, Value>> {
    let invalid = |reason: String| LandcubeError::InvalidHyperparameter {
        algorithm: algorithm.to_string(),
        reason,
    };

    let mut values: Map<String, Value> =
        defs.iter().map(|d| (d.name.to_string(), d.default_value())).collect();
    let mut assigned: Vec<&str> = Vec::new();

    for assignment in assignments {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| invalid(format!("expected key=value, got '{}'", assignment)))?;
        let key = key.trim();

        let def = defs.iter().find(|d| d.name == key).ok_or_else(|| {
            let known: Vec<&str> = defs.iter().map(|d| d.name).collect();
            invalid(format!("unknown parameter '{}' (known: {})", key, known.join(", ")))
        })?;
        if assigned.contains(&def.name) {
            return Err(invalid(format!("parameter '{}' given more than once", key)));
        }
        assigned.push(def.name);

        values.insert(def.name.to_string(), def.parse(algorithm, raw)?);
    }

    Ok(values)
}

/// Deserialize a parameter object into a family's typed parameters
pub fn typed_params<T: serde::de::DeserializeOwned>(algorithm: &str, value: &Value) -> Result<T> {
    serde_json::from_value(value.clone()).map_err(|e| LandcubeError::InvalidHyperparameter {
        algorithm: algorithm.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFS: &[ParamDef] = &[
        ParamDef::int("n_estimators", 100, 1, 10_000, "trees"),
        ParamDef::float("learning_rate", 0.1, 1e-6, 1.0, "shrinkage"),
        ParamDef::optional_int("max_depth", None, 1, 64, "depth limit"),
    ];

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_defaults_filled() {
        let values = parse_assignments("gbt", DEFS, &[]).unwrap();
        assert_eq!(values["n_estimators"], 100);
        assert_eq!(values["learning_rate"], 0.1);
        assert!(values["max_depth"].is_null());
    }

    #[test]
    fn test_assignments_override() {
        let values =
            parse_assignments("gbt", DEFS, &args(&["n_estimators=5", "max_depth = 3"])).unwrap();
        assert_eq!(values["n_estimators"], 5);
        assert_eq!(values["max_depth"], 3);

        let values = parse_assignments("gbt", DEFS, &args(&["max_depth=None"])).unwrap();
        assert!(values["max_depth"].is_null());
    }

    #[test]
    fn test_rejections() {
        for bad in [
            "unknown=1",
            "n_estimators",
            "n_estimators=abc",
            "n_estimators=0",
            "learning_rate=2",
            "learning_rate=NaN",
        ] {
            let err = parse_assignments("gbt", DEFS, &args(&[bad])).unwrap_err();
            assert!(matches!(err, LandcubeError::InvalidHyperparameter { .. }), "{}", bad);
        }
        assert!(parse_assignments("gbt", DEFS, &args(&["n_estimators=1", "n_estimators=2"])).is_err());
    }
}
