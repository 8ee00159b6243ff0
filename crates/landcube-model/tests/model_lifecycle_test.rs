//! End-to-end model lifecycle: extract, encode, fit, predict, persist

use chrono::NaiveDate;
use landcube_core::error::LandcubeError;
use landcube_core::models::{Affine, Crs, Geometry, Polygon, RasterStack, Statistic};
use landcube_features::{build_prediction_table, extract_raw, CategoricalColumn, Entities, TableOptions};
use landcube_model::{ClassifierRegistry, Model};
use landcube_store::{MemoryMetadataStore, MetadataStore};
use ndarray::Array3;
use tempfile::TempDir;

const CRS: u32 = 32633;

/// 4 rows x 6 cols; left half dark (forest), right half bright (water)
fn scene() -> RasterStack {
    let values = Array3::from_shape_fn((2, 4, 6), |(band, _, col)| {
        let bright = col >= 3;
        match (band, bright) {
            (0, false) => 0.05 + col as f64 * 0.01,
            (0, true) => 0.6 + col as f64 * 0.01,
            (_, false) => 0.4,
            (_, true) => 0.1,
        }
    });
    RasterStack::single_date(
        values,
        vec!["red".to_string(), "nir".to_string()],
        NaiveDate::from_ymd_opt(2021, 7, 1).unwrap(),
        Affine::from_origin(500_000.0, 4_000_040.0, 10.0, 10.0),
        Crs::epsg(CRS),
        vec![None, None],
    )
    .unwrap()
}

fn cell(id: u64, col: usize, row: usize) -> Polygon {
    let x0 = 500_000.0 + col as f64 * 10.0;
    let y1 = 4_000_040.0 - row as f64 * 10.0;
    Polygon::new(
        id,
        Geometry::polygon(vec![vec![[x0, y1 - 10.0], [x0 + 10.0, y1 - 10.0], [x0 + 10.0, y1], [x0, y1], [x0, y1 - 10.0]]]),
        Crs::epsg(CRS),
    )
}

fn training_polygons() -> Vec<Polygon> {
    let mut polygons = Vec::new();
    let mut id = 1;
    for row in 0..4 {
        for col in [0, 1, 4, 5] {
            let (code, cover) = if col < 3 { (10, "forest") } else { (80, "water") };
            polygons.push(cell(id, col, row).with_class(code).with_attribute("landcover_type", cover));
            id += 1;
        }
    }
    polygons
}

fn options() -> TableOptions {
    TableOptions {
        stats: vec![Statistic::Mean, Statistic::Count],
        categorical: vec![CategoricalColumn::attribute("landcover_type")],
        ..Default::default()
    }
}

fn fitted(algorithm: &str, params: &[&str]) -> Model {
    let registry = ClassifierRegistry::with_builtin();
    let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
    let mut model = Model::new("lc_2021", "field_survey", registry.create(algorithm, &params).unwrap())
        .with_recipe("median");

    let raw = extract_raw(Entities::Polygons(&training_polygons()), &scene(), &options()).unwrap();
    let table = model.hot_encode_training(raw).unwrap();
    model.fit_table(&table).unwrap();
    model
}

#[test]
fn unseen_category_predicts_without_error() {
    let model = fitted("gbt", &["n_estimators=15"]);
    let schema = model.schema().unwrap().clone();

    let objects = vec![
        cell(100, 2, 1).with_attribute("landcover_type", "urban"),
        cell(101, 3, 2).with_attribute("landcover_type", "urban"),
    ];
    let matrix = build_prediction_table(Entities::Polygons(&objects), &scene(), &schema, 0).unwrap();
    assert_eq!(matrix.columns, schema.column_names());

    let forest = matrix.column_index("landcover_type_forest").unwrap();
    let water = matrix.column_index("landcover_type_water").unwrap();
    for row in 0..matrix.nrows() {
        assert_eq!(matrix.values[[row, forest]], 0.0);
        assert_eq!(matrix.values[[row, water]], 0.0);
    }

    let predicted = model.predict(&matrix).unwrap();
    assert_eq!(predicted.len(), 2);
}

#[test]
fn every_family_scores_separable_scene() {
    for (algorithm, params) in [
        ("rf", vec!["n_estimators=25", "seed=1"]),
        ("gbt", vec!["n_estimators=20"]),
        ("lgb", vec!["n_estimators=20", "min_samples_leaf=2"]),
    ] {
        let model = fitted(algorithm, &params);
        let raw = extract_raw(Entities::Polygons(&training_polygons()), &scene(), &options()).unwrap();
        let matrix = model.hot_encode_predict(&raw).unwrap();
        let labels: Vec<i64> = raw.labels.iter().map(|l| l.unwrap()).collect();

        let report = model.score(&matrix, &labels).unwrap();
        assert_eq!(report.classes, vec![10, 80], "{}", algorithm);
        assert!(report.accuracy >= 0.9, "{} accuracy {}", algorithm, report.accuracy);
        assert_eq!(report.n_samples, 16);
    }
}

#[test]
fn save_and_load_reproduce_predictions() {
    let model = fitted("rf", &["n_estimators=10", "seed=4"]);
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lc_2021.json");

    let artifact = model.save(&path).unwrap();
    assert_eq!(artifact.algorithm, "rf");
    assert_eq!(artifact.recipe.as_deref(), Some("median"));
    assert_eq!(artifact.classes, vec![10, 80]);

    let registry = ClassifierRegistry::with_builtin();
    let loaded = Model::load(&path, &registry).unwrap();
    assert_eq!(loaded.schema(), model.schema());

    let raw = extract_raw(Entities::Polygons(&training_polygons()), &scene(), &options()).unwrap();
    let matrix = model.hot_encode_predict(&raw).unwrap();
    assert_eq!(loaded.predict(&matrix).unwrap(), model.predict(&matrix).unwrap());
}

#[tokio::test]
async fn store_round_trip() {
    let store = MemoryMetadataStore::new();
    let registry = ClassifierRegistry::with_builtin();

    let err = Model::from_store(&store, "lc_2021", &registry).await.unwrap_err();
    assert!(matches!(err, LandcubeError::ModelNotFound { .. }));

    let model = fitted("lgb", &["n_estimators=5", "min_samples_leaf=2"]);
    model.to_store(&store).await.unwrap();

    let models = store.list_models().await.unwrap();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].algorithm, "lgb");
    assert_eq!(models[0].n_classes, 2);

    let restored = Model::from_store(&store, "lc_2021", &registry).await.unwrap();
    assert_eq!(restored.classes(), model.classes());
    assert_eq!(restored.training_set(), "field_survey");
}

#[test]
fn unfitted_model_cannot_be_saved() {
    let registry = ClassifierRegistry::with_builtin();
    let model = Model::new("empty", "none", registry.create("rf", &[]).unwrap());
    let dir = TempDir::new().unwrap();
    assert!(matches!(model.save(&dir.path().join("x.json")), Err(LandcubeError::ModelNotFitted)));
}
