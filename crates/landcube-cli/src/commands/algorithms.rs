//! Algorithms command implementation

use crate::output::OutputWriter;
use crate::output_types::{AlgorithmInfo, AlgorithmsOutput, ParamRow};
use anyhow::Result;
use landcube_core::params::ParamDef;
use landcube_model::ClassifierRegistry;
use landcube_segment::SegmenterRegistry;

fn info(name: &str, description: &str, params: &[ParamDef]) -> AlgorithmInfo {
    AlgorithmInfo {
        name: name.to_string(),
        description: description.to_string(),
        params: params
            .iter()
            .map(|p| ParamRow {
                algorithm: name.to_string(),
                name: p.name.to_string(),
                default: p.default_display(),
                description: p.description.to_string(),
            })
            .collect(),
    }
}

fn collect() -> AlgorithmsOutput {
    let classifiers = ClassifierRegistry::with_builtin();
    let segmenters = SegmenterRegistry::with_builtin();
    AlgorithmsOutput {
        classifiers: classifiers.entries().iter().map(|e| info(e.name, e.description, e.params)).collect(),
        segmenters: segmenters.entries().iter().map(|e| info(e.name, e.description, e.params)).collect(),
    }
}

pub fn execute(output: &OutputWriter) -> Result<()> {
    let algorithms = collect();
    if output.is_json() {
        return output.result(algorithms);
    }

    for (title, group) in [("Classifiers", algorithms.classifiers), ("Segmenters", algorithms.segmenters)] {
        output.section(title);
        let mut rows = Vec::new();
        for algorithm in group {
            output.kv(&algorithm.name, &algorithm.description);
            rows.extend(algorithm.params);
        }
        output.table(rows);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_families_listed() {
        let algorithms = collect();
        let names: Vec<&str> = algorithms.classifiers.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["rf", "gbt", "lgb"]);

        let bis = algorithms.segmenters.iter().find(|a| a.name == "bis").unwrap();
        let params: Vec<&str> = bis.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(params, vec!["t", "s", "c"]);
    }
}
