//! Name to constructor mapping for classifier families.

use crate::boosting::{self, GradientBoosting, HistogramBoosting};
use crate::classifier::Classifier;
use crate::forest::{self, RandomForest};
use landcube_core::error::{LandcubeError, Result};
use landcube_core::params::{parse_assignments, ParamDef};
use serde_json::Value;

type Constructor = fn(&Value) -> Result<Box<dyn Classifier>>;

/// One registered classifier family
#[derive(Clone)]
pub struct ClassifierEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamDef],
    construct: Constructor,
}

impl ClassifierEntry {
    pub fn new(
        name: &'static str,
        description: &'static str,
        params: &'static [ParamDef],
        construct: Constructor,
    ) -> Self {
        Self { name, description, params, construct }
    }
}

impl std::fmt::Debug for ClassifierEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassifierEntry").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClassifierRegistry {
    entries: Vec<ClassifierEntry>,
}

impl ClassifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `rf`, `gbt` and `lgb`
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ClassifierEntry::new(
            forest::NAME,
            "Random forest of bootstrap-aggregated CART trees",
            forest::PARAMS,
            |v| RandomForest::from_value(v).map(|c| Box::new(c) as Box<dyn Classifier>),
        ));
        registry.register(ClassifierEntry::new(
            boosting::GBT_NAME,
            "Gradient boosted trees with exact split search",
            boosting::GBT_PARAMS,
            |v| GradientBoosting::from_value(v).map(|c| Box::new(c) as Box<dyn Classifier>),
        ));
        registry.register(ClassifierEntry::new(
            boosting::LGB_NAME,
            "Histogram gradient boosting over quantile-binned features",
            boosting::LGB_PARAMS,
            |v| HistogramBoosting::from_value(v).map(|c| Box::new(c) as Box<dyn Classifier>),
        ));
        registry
    }

    /// Add a family; a later entry with the same name replaces the earlier one
    pub fn register(&mut self, entry: ClassifierEntry) {
        self.entries.retain(|e| e.name != entry.name);
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ClassifierEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Result<&ClassifierEntry> {
        self.entries.iter().find(|e| e.name == name).ok_or_else(|| LandcubeError::UnknownAlgorithm {
            kind: "classifier".to_string(),
            name: name.to_string(),
            available: self.entries.iter().map(|e| e.name).collect::<Vec<_>>().join(", "),
        })
    }

    /// Construct every family with its defaults, so broken entries fail at startup
    pub fn validate(&self) -> Result<()> {
        for entry in &self.entries {
            let defaults = parse_assignments(entry.name, entry.params, &[])?;
            (entry.construct)(&Value::Object(defaults))?;
        }
        Ok(())
    }

    /// Build an unfitted classifier from `key=value` assignments
    pub fn create(&self, name: &str, assignments: &[String]) -> Result<Box<dyn Classifier>> {
        let entry = self.get(name)?;
        let params = parse_assignments(entry.name, entry.params, assignments)?;
        (entry.construct)(&Value::Object(params))
    }

    /// Build an unfitted classifier from stored hyperparameters
    pub fn restore(&self, name: &str, hyperparameters: &Value) -> Result<Box<dyn Classifier>> {
        let entry = self.get(name)?;
        (entry.construct)(hyperparameters)
    }
}
