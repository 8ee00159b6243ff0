//! Name to constructor mapping for segmentation families.

use crate::bis::{self, Bis};
use crate::segmentation::Segmenter;
use crate::slic::{self, Slic};
use landcube_core::error::{LandcubeError, Result};
use landcube_core::params::{parse_assignments, ParamDef};
use serde_json::Value;

type Constructor = fn(&Value) -> Result<Box<dyn Segmenter>>;

#[derive(Clone)]
pub struct SegmenterEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamDef],
    construct: Constructor,
}

impl SegmenterEntry {
    pub fn new(
        name: &'static str,
        description: &'static str,
        params: &'static [ParamDef],
        construct: Constructor,
    ) -> Self {
        Self { name, description, params, construct }
    }
}

impl std::fmt::Debug for SegmenterEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmenterEntry").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SegmenterRegistry {
    entries: Vec<SegmenterEntry>,
}

impl SegmenterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `slic` and `bis`
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(SegmenterEntry::new(
            slic::NAME,
            "SLIC superpixels on a regular seed grid",
            slic::PARAMS,
            |v| Slic::from_value(v).map(|s| Box::new(s) as Box<dyn Segmenter>),
        ));
        registry.register(SegmenterEntry::new(
            bis::NAME,
            "Region merging by colour and shape heterogeneity",
            bis::PARAMS,
            |v| Bis::from_value(v).map(|s| Box::new(s) as Box<dyn Segmenter>),
        ));
        registry
    }

    pub fn register(&mut self, entry: SegmenterEntry) {
        self.entries.retain(|e| e.name != entry.name);
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[SegmenterEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Result<&SegmenterEntry> {
        self.entries.iter().find(|e| e.name == name).ok_or_else(|| LandcubeError::UnknownAlgorithm {
            kind: "segmentation".to_string(),
            name: name.to_string(),
            available: self.entries.iter().map(|e| e.name).collect::<Vec<_>>().join(", "),
        })
    }

    pub fn validate(&self) -> Result<()> {
        for entry in &self.entries {
            let defaults = parse_assignments(entry.name, entry.params, &[])?;
            (entry.construct)(&Value::Object(defaults))?;
        }
        Ok(())
    }

    pub fn create(&self, name: &str, assignments: &[String]) -> Result<Box<dyn Segmenter>> {
        let entry = self.get(name)?;
        let params = parse_assignments(entry.name, entry.params, assignments)?;
        (entry.construct)(&Value::Object(params))
    }
}
