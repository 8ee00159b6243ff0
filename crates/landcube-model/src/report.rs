//! Accuracy assessment of predicted against reference labels.

use landcube_core::error::{LandcubeError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class: i64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Reference samples of this class
    pub support: usize,
}

/// Confusion-matrix based summary returned by `Model::score`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub n_samples: usize,
    pub accuracy: f64,
    pub kappa: f64,
    /// Sorted union of reference and predicted classes
    pub classes: Vec<i64>,
    /// `confusion[i][j]`: reference `classes[i]` predicted as `classes[j]`
    pub confusion: Vec<Vec<usize>>,
    pub per_class: Vec<ClassMetrics>,
}

impl AccuracyReport {
    pub fn from_predictions(reference: &[i64], predicted: &[i64]) -> Result<Self> {
        if reference.len() != predicted.len() {
            return Err(LandcubeError::SchemaMismatch {
                reason: format!(
                    "{} reference labels for {} predictions",
                    reference.len(),
                    predicted.len()
                ),
            });
        }
        if reference.is_empty() {
            return Err(LandcubeError::EmptyTrainingSet { context: "no samples to score".to_string() });
        }

        let classes: Vec<i64> =
            reference.iter().chain(predicted).copied().collect::<BTreeSet<_>>().into_iter().collect();
        let index = |c: i64| classes.binary_search(&c).unwrap_or(0);

        let k = classes.len();
        let mut confusion = vec![vec![0usize; k]; k];
        for (r, p) in reference.iter().zip(predicted) {
            confusion[index(*r)][index(*p)] += 1;
        }

        let n = reference.len() as f64;
        let correct: usize = (0..k).map(|i| confusion[i][i]).sum();
        let accuracy = correct as f64 / n;

        let row_totals: Vec<usize> = confusion.iter().map(|row| row.iter().sum()).collect();
        let col_totals: Vec<usize> = (0..k).map(|j| confusion.iter().map(|row| row[j]).sum()).collect();

        let expected: f64 =
            row_totals.iter().zip(&col_totals).map(|(r, c)| (*r as f64) * (*c as f64)).sum::<f64>() / (n * n);
        let kappa = if (1.0 - expected).abs() < f64::EPSILON {
            if accuracy >= 1.0 {
                1.0
            } else {
                0.0
            }
        } else {
            (accuracy - expected) / (1.0 - expected)
        };

        let per_class = classes
            .iter()
            .enumerate()
            .map(|(i, class)| {
                let tp = confusion[i][i] as f64;
                let precision = ratio(tp, col_totals[i] as f64);
                let recall = ratio(tp, row_totals[i] as f64);
                let f1 = ratio(2.0 * precision * recall, precision + recall);
                ClassMetrics { class: *class, precision, recall, f1, support: row_totals[i] }
            })
            .collect();

        Ok(Self { n_samples: reference.len(), accuracy, kappa, classes, confusion, per_class })
    }

    pub fn class(&self, class: i64) -> Option<&ClassMetrics> {
        self.per_class.iter().find(|m| m.class == class)
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
