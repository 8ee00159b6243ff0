use landcube_core::error::Result;
use ndarray::{Array2, ArrayView2};

/// Capability set of one classifier family
///
/// Families work on encoded, NaN-free matrices and dense class indices;
/// schema handling, missing-value filling and class-code mapping live in
/// [`crate::Model`], which wraps a boxed `Classifier`.
pub trait Classifier: Send + Sync + std::fmt::Debug {
    /// Registry name of the family
    fn algorithm(&self) -> &'static str;

    /// Hyperparameters as a JSON object, suitable for `ClassifierRegistry::restore`
    fn hyperparameters(&self) -> serde_json::Value;

    /// Fit on `x`; `y[i]` is a class index below `n_classes`
    fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[usize], n_classes: usize) -> Result<()>;

    /// Class probabilities, one row per sample and one column per class
    fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Result<Array2<f64>>;

    fn is_fitted(&self) -> bool;

    /// Fitted state, serialized for an artifact
    fn payload(&self) -> Result<serde_json::Value>;

    /// Rebuild fitted state from a payload produced by `payload`
    fn restore(&mut self, payload: &serde_json::Value, n_classes: usize) -> Result<()>;
}

/// Row-wise index of the largest value; ties go to the lowest index
pub fn argmax_rows(proba: &Array2<f64>) -> Vec<(usize, f64)> {
    proba
        .rows()
        .into_iter()
        .map(|row| {
            row.iter().enumerate().fold((0, f64::NEG_INFINITY), |best, (i, &p)| {
                if p > best.1 {
                    (i, p)
                } else {
                    best
                }
            })
        })
        .collect()
}
