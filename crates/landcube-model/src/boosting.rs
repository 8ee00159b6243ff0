//! Gradient boosted trees with a softmax objective.
//!
//! `gbt` searches exact split points over every distinct value; `lgb` bins
//! features into quantile histograms first and adds L2 regularization of leaf
//! values, trading a little precision for speed on large pixel tables.

use crate::classifier::Classifier;
use crate::tree::{BinnedFeatures, GrowParams, RegressionTree, SplitSearch};
use landcube_core::error::{LandcubeError, Result};
use landcube_core::params::{typed_params, ParamDef};
use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const GBT_NAME: &str = "gbt";
pub const LGB_NAME: &str = "lgb";

pub const GBT_PARAMS: &[ParamDef] = &[
    ParamDef::int("n_estimators", 100, 1, 10_000, "boosting rounds"),
    ParamDef::float("learning_rate", 0.1, 1e-6, 1.0, "shrinkage applied to every tree"),
    ParamDef::int("max_depth", 3, 1, 64, "maximum depth of each tree"),
    ParamDef::int("min_samples_leaf", 1, 1, 1_000_000, "minimum samples in a leaf"),
    ParamDef::float("subsample", 1.0, 0.01, 1.0, "fraction of rows sampled per round"),
    ParamDef::int("seed", 0, 0, i64::MAX, "random seed for row subsampling"),
];

pub const LGB_PARAMS: &[ParamDef] = &[
    ParamDef::int("n_estimators", 100, 1, 10_000, "boosting rounds"),
    ParamDef::float("learning_rate", 0.1, 1e-6, 1.0, "shrinkage applied to every tree"),
    ParamDef::int("max_depth", 6, 1, 64, "maximum depth of each tree"),
    ParamDef::int("min_samples_leaf", 20, 1, 1_000_000, "minimum samples in a leaf"),
    ParamDef::float("subsample", 1.0, 0.01, 1.0, "fraction of rows sampled per round"),
    ParamDef::int("max_bins", 255, 2, 65_535, "histogram bins per feature"),
    ParamDef::float("reg_lambda", 0.0, 0.0, 1e6, "L2 regularization of leaf values"),
    ParamDef::int("seed", 0, 0, i64::MAX, "random seed for row subsampling"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GbtParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub subsample: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LgbParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub subsample: f64,
    pub max_bins: usize,
    pub reg_lambda: f64,
    pub seed: u64,
}

/// Settings shared by both boosting variants
#[derive(Debug, Clone, Copy)]
struct BoostConfig {
    n_estimators: usize,
    learning_rate: f64,
    subsample: f64,
    seed: u64,
    grow: GrowParams,
    max_bins: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Ensemble {
    n_classes: usize,
    learning_rate: f64,
    /// Log class priors
    base_scores: Vec<f64>,
    /// One tree per class and round
    rounds: Vec<Vec<RegressionTree>>,
}

impl Ensemble {
    fn fit(x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize, config: BoostConfig) -> Self {
        let n = x.nrows();
        let mut counts = vec![0usize; n_classes];
        for &c in y {
            counts[c] += 1;
        }
        let base_scores: Vec<f64> =
            counts.iter().map(|&c| ((c as f64) / (n as f64)).max(1e-12).ln()).collect();

        let mut ensemble = Self { n_classes, learning_rate: config.learning_rate, base_scores, rounds: Vec::new() };
        if n_classes < 2 {
            return ensemble;
        }

        let binned = config.max_bins.map(|bins| BinnedFeatures::new(x, bins));
        let search = match &binned {
            Some(b) => SplitSearch::Histogram(b),
            None => SplitSearch::Exact,
        };

        let mut scores = Array2::from_shape_fn((n, n_classes), |(_, k)| ensemble.base_scores[k]);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let sample_size = ((n as f64) * config.subsample).round().clamp(1.0, n as f64) as usize;

        for _ in 0..config.n_estimators {
            let proba = softmax(&scores);
            let rows: Vec<usize> = if sample_size < n {
                let mut rows = rand::seq::index::sample(&mut rng, n, sample_size).into_vec();
                rows.sort_unstable();
                rows
            } else {
                (0..n).collect()
            };

            let trees: Vec<RegressionTree> = (0..n_classes)
                .into_par_iter()
                .map(|k| {
                    let grad: Vec<f64> =
                        (0..n).map(|i| proba[[i, k]] - if y[i] == k { 1.0 } else { 0.0 }).collect();
                    let hess: Vec<f64> =
                        (0..n).map(|i| (proba[[i, k]] * (1.0 - proba[[i, k]])).max(1e-6)).collect();
                    RegressionTree::fit(x, &grad, &hess, rows.clone(), config.grow, &search)
                })
                .collect();

            for (k, tree) in trees.iter().enumerate() {
                for (i, row) in x.axis_iter(Axis(0)).enumerate() {
                    scores[[i, k]] += config.learning_rate * tree.predict_row(row);
                }
            }
            ensemble.rounds.push(trees);
        }
        ensemble
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array2<f64> {
        let mut scores = Array2::from_shape_fn((x.nrows(), self.n_classes), |(_, k)| self.base_scores[k]);
        for trees in &self.rounds {
            for (k, tree) in trees.iter().enumerate() {
                for (i, row) in x.axis_iter(Axis(0)).enumerate() {
                    scores[[i, k]] += self.learning_rate * tree.predict_row(row);
                }
            }
        }
        softmax(&scores)
    }
}

fn softmax(scores: &Array2<f64>) -> Array2<f64> {
    let mut out = scores.clone();
    for mut row in out.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |m, v| m.max(*v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    out
}

fn check_fit_input(algorithm: &str, x: ArrayView2<'_, f64>) -> Result<()> {
    if x.nrows() == 0 || x.ncols() == 0 {
        return Err(LandcubeError::EmptyTrainingSet {
            context: format!("{}: matrix has shape {:?}", algorithm, x.dim()),
        });
    }
    Ok(())
}

fn restore_ensemble(algorithm: &str, payload: &serde_json::Value, n_classes: usize) -> Result<Ensemble> {
    let ensemble: Ensemble = serde_json::from_value(payload.clone())
        .map_err(|e| LandcubeError::Serialization(format!("{} payload: {}", algorithm, e)))?;
    if ensemble.n_classes != n_classes || ensemble.base_scores.len() != n_classes {
        return Err(LandcubeError::SchemaMismatch {
            reason: format!(
                "{} payload has {} classes, artifact lists {}",
                algorithm, ensemble.n_classes, n_classes
            ),
        });
    }
    Ok(ensemble)
}

fn ensemble_payload(ensemble: Option<&Ensemble>) -> Result<serde_json::Value> {
    let ensemble = ensemble.ok_or(LandcubeError::ModelNotFitted)?;
    serde_json::to_value(ensemble).map_err(|e| LandcubeError::Serialization(e.to_string()))
}

#[derive(Debug)]
pub struct GradientBoosting {
    params: GbtParams,
    ensemble: Option<Ensemble>,
}

impl GradientBoosting {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let params: GbtParams = typed_params(GBT_NAME, value)?;
        Ok(Self { params, ensemble: None })
    }

    fn config(&self) -> BoostConfig {
        BoostConfig {
            n_estimators: self.params.n_estimators,
            learning_rate: self.params.learning_rate,
            subsample: self.params.subsample,
            seed: self.params.seed,
            grow: GrowParams {
                max_depth: self.params.max_depth,
                min_samples_leaf: self.params.min_samples_leaf,
                lambda: 0.0,
            },
            max_bins: None,
        }
    }
}

impl Classifier for GradientBoosting {
    fn algorithm(&self) -> &'static str {
        GBT_NAME
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }

    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize) -> Result<()> {
        check_fit_input(GBT_NAME, x)?;
        let ensemble = Ensemble::fit(x, y, n_classes, self.config());
        tracing::debug!(rounds = ensemble.rounds.len(), n_classes, "Fitted gradient boosting");
        self.ensemble = Some(ensemble);
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let ensemble = self.ensemble.as_ref().ok_or(LandcubeError::ModelNotFitted)?;
        Ok(ensemble.predict_proba(x))
    }

    fn is_fitted(&self) -> bool {
        self.ensemble.is_some()
    }

    fn payload(&self) -> Result<serde_json::Value> {
        ensemble_payload(self.ensemble.as_ref())
    }

    fn restore(&mut self, payload: &serde_json::Value, n_classes: usize) -> Result<()> {
        self.ensemble = Some(restore_ensemble(GBT_NAME, payload, n_classes)?);
        Ok(())
    }
}

#[derive(Debug)]
pub struct HistogramBoosting {
    params: LgbParams,
    ensemble: Option<Ensemble>,
}

impl HistogramBoosting {
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let params: LgbParams = typed_params(LGB_NAME, value)?;
        if params.max_bins < 2 {
            return Err(LandcubeError::InvalidHyperparameter {
                algorithm: LGB_NAME.to_string(),
                reason: "max_bins must be at least 2".to_string(),
            });
        }
        Ok(Self { params, ensemble: None })
    }

    fn config(&self) -> BoostConfig {
        BoostConfig {
            n_estimators: self.params.n_estimators,
            learning_rate: self.params.learning_rate,
            subsample: self.params.subsample,
            seed: self.params.seed,
            grow: GrowParams {
                max_depth: self.params.max_depth,
                min_samples_leaf: self.params.min_samples_leaf,
                lambda: self.params.reg_lambda,
            },
            max_bins: Some(self.params.max_bins),
        }
    }
}

impl Classifier for HistogramBoosting {
    fn algorithm(&self) -> &'static str {
        LGB_NAME
    }

    fn hyperparameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }

    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize) -> Result<()> {
        check_fit_input(LGB_NAME, x)?;
        let ensemble = Ensemble::fit(x, y, n_classes, self.config());
        tracing::debug!(rounds = ensemble.rounds.len(), n_classes, "Fitted histogram boosting");
        self.ensemble = Some(ensemble);
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
        let ensemble = self.ensemble.as_ref().ok_or(LandcubeError::ModelNotFitted)?;
        Ok(ensemble.predict_proba(x))
    }

    fn is_fitted(&self) -> bool {
        self.ensemble.is_some()
    }

    fn payload(&self) -> Result<serde_json::Value> {
        ensemble_payload(self.ensemble.as_ref())
    }

    fn restore(&mut self, payload: &serde_json::Value, n_classes: usize) -> Result<()> {
        self.ensemble = Some(restore_ensemble(LGB_NAME, payload, n_classes)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::argmax_rows;
    use landcube_core::params::parse_assignments;
    use ndarray::array;

    fn three_bands() -> (Array2<f64>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut y = Vec::new();
        for i in 0..30 {
            let class = i % 3;
            let v = class as f64 * 10.0 + (i / 3) as f64 * 0.2;
            rows.extend_from_slice(&[v, 1.0]);
            y.push(class);
        }
        (Array2::from_shape_vec((30, 2), rows).unwrap(), y)
    }

    fn value(defs: &[ParamDef], name: &str, assignments: &[&str]) -> serde_json::Value {
        let assignments: Vec<String> = assignments.iter().map(|s| s.to_string()).collect();
        serde_json::Value::Object(parse_assignments(name, defs, &assignments).unwrap())
    }

    #[test]
    fn test_gbt_learns_bands() {
        let (x, y) = three_bands();
        let mut gbt = GradientBoosting::from_value(&value(GBT_PARAMS, GBT_NAME, &["n_estimators=20"])).unwrap();
        gbt.fit(x.view(), &y, 3).unwrap();

        let proba = gbt.predict_proba(array![[0.5, 1.0], [10.5, 1.0], [21.0, 1.0]].view()).unwrap();
        let classes: Vec<usize> = argmax_rows(&proba).into_iter().map(|(c, _)| c).collect();
        assert_eq!(classes, vec![0, 1, 2]);
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_lgb_learns_bands() {
        let (x, y) = three_bands();
        let mut lgb = HistogramBoosting::from_value(&value(
            LGB_PARAMS,
            LGB_NAME,
            &["n_estimators=20", "min_samples_leaf=2", "max_bins=16", "reg_lambda=1.0"],
        ))
        .unwrap();
        lgb.fit(x.view(), &y, 3).unwrap();

        let proba = lgb.predict_proba(array![[0.5, 1.0], [10.5, 1.0], [21.0, 1.0]].view()).unwrap();
        let classes: Vec<usize> = argmax_rows(&proba).into_iter().map(|(c, _)| c).collect();
        assert_eq!(classes, vec![0, 1, 2]);
    }

    #[test]
    fn test_single_class_predicts_certainty() {
        let x = array![[1.0], [2.0]];
        let mut gbt = GradientBoosting::from_value(&value(GBT_PARAMS, GBT_NAME, &[])).unwrap();
        gbt.fit(x.view(), &[0, 0], 1).unwrap();
        let proba = gbt.predict_proba(array![[5.0]].view()).unwrap();
        assert_eq!(proba, array![[1.0]]);
    }

    #[test]
    fn test_subsample_is_seeded() {
        let (x, y) = three_bands();
        let params = value(GBT_PARAMS, GBT_NAME, &["n_estimators=5", "subsample=0.5", "seed=11"]);
        let mut a = GradientBoosting::from_value(&params).unwrap();
        let mut b = GradientBoosting::from_value(&params).unwrap();
        a.fit(x.view(), &y, 3).unwrap();
        b.fit(x.view(), &y, 3).unwrap();
        assert_eq!(a.payload().unwrap(), b.payload().unwrap());
    }

    #[test]
    fn test_unfitted_and_restore() {
        let (x, y) = three_bands();
        let mut lgb = HistogramBoosting::from_value(&value(LGB_PARAMS, LGB_NAME, &["n_estimators=3"])).unwrap();
        assert!(matches!(lgb.predict_proba(x.view()), Err(LandcubeError::ModelNotFitted)));
        lgb.fit(x.view(), &y, 3).unwrap();

        let mut restored = HistogramBoosting::from_value(&lgb.hyperparameters()).unwrap();
        restored.restore(&lgb.payload().unwrap(), 3).unwrap();
        assert_eq!(lgb.predict_proba(x.view()).unwrap(), restored.predict_proba(x.view()).unwrap());
        assert!(matches!(
            restored.restore(&lgb.payload().unwrap(), 2),
            Err(LandcubeError::SchemaMismatch { .. })
        ));
    }
}
