//! Properties every fitted model keeps regardless of its training data

use landcube_core::models::FeatureMatrix;
use landcube_core::LandcubeError;
use landcube_model::{ClassifierRegistry, Model};
use ndarray::Array2;
use proptest::prelude::*;

fn matrix(rows: usize, columns: &[&str], values: Vec<f64>) -> FeatureMatrix {
    FeatureMatrix::new(
        (0..rows as u64).collect(),
        columns.iter().map(|c| c.to_string()).collect(),
        Array2::from_shape_vec((rows, columns.len()), values).unwrap(),
    )
    .unwrap()
}

fn fitted(algorithm: &str, rows: usize, values: Vec<f64>) -> Model {
    let registry = ClassifierRegistry::with_builtin();
    let params = vec!["n_estimators=5".to_string(), "seed=11".to_string()];
    let classifier = registry.create(algorithm, &params).unwrap();
    let mut model = Model::new("lc", "survey", classifier);

    let labels: Vec<i64> = (0..rows).map(|i| if i % 2 == 0 { 10 } else { 80 }).collect();
    model.fit(&matrix(rows, &["red", "nir"], values), &labels).unwrap();
    model
}

fn training() -> impl Strategy<Value = (usize, Vec<f64>)> {
    (4usize..20).prop_flat_map(|rows| (Just(rows), proptest::collection::vec(0.0f64..1.0, rows * 2)))
}

fn prediction() -> impl Strategy<Value = (usize, Vec<f64>)> {
    (1usize..15).prop_flat_map(|rows| {
        let cell = prop_oneof![4 => 0.0f64..1.0, 1 => Just(f64::NAN)];
        (Just(rows), proptest::collection::vec(cell, rows * 2))
    })
}

fn algorithm() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("rf"), Just("gbt")]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn predictions_cover_every_row_with_known_classes(
        algorithm in algorithm(),
        (rows, values) in training(),
        (m, unseen) in prediction(),
    ) {
        let model = fitted(algorithm, rows, values);
        let predicted = model.predict_confidence(&matrix(m, &["red", "nir"], unseen)).unwrap();

        prop_assert_eq!(predicted.len(), m);
        for (class, confidence) in predicted {
            prop_assert!(model.classes().contains(&class));
            prop_assert!(confidence > 0.0 && confidence <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn column_layout_is_fixed_after_fit((rows, values) in training(), extra in 0.0f64..1.0) {
        let model = fitted("rf", rows, values);

        let wider = matrix(1, &["red", "nir", "swir"], vec![0.5, 0.5, extra]);
        prop_assert!(matches!(model.predict(&wider), Err(LandcubeError::SchemaMismatch { .. })));

        let renamed = matrix(1, &["nir", "red"], vec![0.5, extra]);
        prop_assert!(matches!(model.predict(&renamed), Err(LandcubeError::SchemaMismatch { .. })));
    }
}
