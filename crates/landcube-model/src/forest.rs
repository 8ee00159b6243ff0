//! Random forest (`rf`): bagged CART trees over random feature subsets.

use crate::classifier::Classifier;
use landcube_core::error::{LandcubeError, Result};
use landcube_core::params::{typed_params, ParamDef};
use linfa::prelude::*;
use linfa_trees::{DecisionTree, SplitQuality};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const NAME: &str = "rf";

pub const PARAMS: &[ParamDef] = &[
    ParamDef::int("n_estimators", 100, 1, 10_000, "number of trees"),
    ParamDef::optional_int("max_depth", None, 1, 256, "maximum tree depth, none for unlimited"),
    ParamDef::int("min_samples_split", 2, 2, 1_000_000, "minimum samples required to split a node"),
    ParamDef::optional_int("max_features", None, 1, 1_000_000, "features tried per tree, none for sqrt(n)"),
    ParamDef::int("seed", 0, 0, i64::MAX, "random seed for bootstrap and feature sampling"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub max_features: Option<usize>,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ForestTree {
    features: Vec<usize>,
    tree: DecisionTree<f64, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FittedForest {
    n_classes: usize,
    trees: Vec<ForestTree>,
}

#[derive(Debug)]
pub struct RandomForest {
    params: ForestParams,
    fitted: Option<FittedForest>,
}

impl RandomForest {
    pub fn new(params: ForestParams) -> Self {
        Self { params, fitted: None }
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let params: ForestParams = typed_params(NAME, value)?;
        if params.n_estimators == 0 {
            return Err(LandcubeError::InvalidHyperparameter {
                algorithm: NAME.to_string(),
                reason: "n_estimators must be at least 1".to_string(),
            });
        }
        Ok(Self::new(params))
    }

    fn fit_tree(&self, x: ArrayView2<'_, f64>, y: &[usize], index: usize) -> Result<ForestTree> {
        let n = x.nrows();
        let n_features = x.ncols();
        let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(index as u64));

        let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        let k = self
            .params
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt().ceil() as usize)
            .clamp(1, n_features);
        let mut features: Vec<usize> = (0..n_features).collect();
        features.shuffle(&mut rng);
        features.truncate(k);
        features.sort_unstable();

        let records = x.select(Axis(0), &rows).select(Axis(1), &features);
        let targets: Array1<usize> = rows.iter().map(|&r| y[r]).collect();
        let dataset = Dataset::new(records, targets);

        let tree = DecisionTree::params()
            .split_quality(SplitQuality::Gini)
            .max_depth(self.params.max_depth)
            .min_weight_split(self.params.min_samples_split as f32)
            .fit(&dataset)
            .map_err(|e| LandcubeError::InvalidHyperparameter {
                algorithm: NAME.to_string(),
                reason: format!("tree {} failed to fit: {}", index, e),
            })?;

        Ok(ForestTree { features, tree })
    }
}

impl Classifier for RandomForest {
    fn algorithm(&self) -> &'static str {
        NAME
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }

    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize) -> Result<()> {
        if x.nrows() == 0 || x.ncols() == 0 {
            return Err(LandcubeError::EmptyTrainingSet {
                context: format!("{}: matrix has shape {:?}", NAME, x.dim()),
            });
        }

        let trees = (0..self.params.n_estimators)
            .into_par_iter()
            .map(|i| self.fit_tree(x, y, i))
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(trees = trees.len(), n_classes, "Fitted random forest");
        self.fitted = Some(FittedForest { n_classes, trees });
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let fitted = self.fitted.as_ref().ok_or(LandcubeError::ModelNotFitted)?;
        let mut votes = Array2::<f64>::zeros((x.nrows(), fitted.n_classes));
        if x.nrows() == 0 {
            return Ok(votes);
        }

        let predictions: Vec<Array1<usize>> = fitted
            .trees
            .par_iter()
            .map(|t| t.tree.predict(&x.select(Axis(1), &t.features)))
            .collect();
        for prediction in &predictions {
            for (row, class) in prediction.iter().enumerate() {
                if *class < fitted.n_classes {
                    votes[[row, *class]] += 1.0;
                }
            }
        }

        votes /= fitted.trees.len() as f64;
        Ok(votes)
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn payload(&self) -> Result<serde_json::Value> {
        let fitted = self.fitted.as_ref().ok_or(LandcubeError::ModelNotFitted)?;
        serde_json::to_value(fitted).map_err(|e| LandcubeError::Serialization(e.to_string()))
    }

    fn restore(&mut self, payload: &serde_json::Value, n_classes: usize) -> Result<()> {
        let fitted: FittedForest = serde_json::from_value(payload.clone())
            .map_err(|e| LandcubeError::Serialization(format!("{} payload: {}", NAME, e)))?;
        if fitted.n_classes != n_classes {
            return Err(LandcubeError::SchemaMismatch {
                reason: format!("{} payload has {} classes, artifact lists {}", NAME, fitted.n_classes, n_classes),
            });
        }
        self.fitted = Some(fitted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use landcube_core::params::parse_assignments;

    fn two_blobs() -> (Array2<f64>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for i in 0..20 {
            let jitter = (i % 5) as f64 * 0.1;
            rows.extend_from_slice(&[1.0 + jitter, 2.0 - jitter]);
            y.push(0);
            rows.extend_from_slice(&[8.0 + jitter, 9.0 - jitter]);
            y.push(1);
        }
        (Array2::from_shape_vec((40, 2), rows).unwrap(), y)
    }

    fn params(assignments: &[&str]) -> serde_json::Value {
        let assignments: Vec<String> = assignments.iter().map(|s| s.to_string()).collect();
        serde_json::Value::Object(parse_assignments(NAME, PARAMS, &assignments).unwrap())
    }

    #[test]
    fn test_fit_separable() {
        let (x, y) = two_blobs();
        let mut rf = RandomForest::from_value(&params(&["n_estimators=15", "seed=7"])).unwrap();
        rf.fit(x.view(), &y, 2).unwrap();

        let proba = rf.predict_proba(ndarray::array![[1.2, 1.9], [8.1, 8.8]].view()).unwrap();
        assert!(proba[[0, 0]] > 0.5);
        assert!(proba[[1, 1]] > 0.5);
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_same_seed_same_model() {
        let (x, y) = two_blobs();
        let unseen = ndarray::array![[4.5, 5.5], [3.0, 7.0]];

        let mut a = RandomForest::from_value(&params(&["n_estimators=10", "seed=3"])).unwrap();
        let mut b = RandomForest::from_value(&params(&["n_estimators=10", "seed=3"])).unwrap();
        a.fit(x.view(), &y, 2).unwrap();
        b.fit(x.view(), &y, 2).unwrap();
        assert_eq!(a.predict_proba(unseen.view()).unwrap(), b.predict_proba(unseen.view()).unwrap());
    }

    #[test]
    fn test_payload_restore() {
        let (x, y) = two_blobs();
        let mut rf = RandomForest::from_value(&params(&["n_estimators=5"])).unwrap();
        assert!(matches!(rf.payload(), Err(LandcubeError::ModelNotFitted)));
        rf.fit(x.view(), &y, 2).unwrap();

        let mut restored = RandomForest::from_value(&rf.hyperparameters()).unwrap();
        restored.restore(&rf.payload().unwrap(), 2).unwrap();
        assert_eq!(rf.predict_proba(x.view()).unwrap(), restored.predict_proba(x.view()).unwrap());
        assert!(restored.restore(&rf.payload().unwrap(), 3).is_err());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut value = params(&[]);
        value["learning_rate"] = serde_json::json!(0.1);
        assert!(matches!(
            RandomForest::from_value(&value),
            Err(LandcubeError::InvalidHyperparameter { .. })
        ));
    }
}
