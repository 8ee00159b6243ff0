//! Properties of zonal aggregation and schema-stable feature tables

use chrono::NaiveDate;
use landcube_core::models::{Affine, Crs, Geometry, LabelArray, Polygon, RasterLayer, RasterStack, Statistic};
use landcube_core::LandcubeError;
use landcube_features::{
    build_prediction_table, build_training_table, zonal_statistics, CategoricalColumn, Entities,
    TableOptions,
};
use ndarray::{Array2, Array3};
use proptest::prelude::*;

const NODATA: f64 = -9999.0;

fn grid_pair() -> impl Strategy<Value = (LabelArray, Array2<f64>)> {
    (1usize..7, 1usize..7).prop_flat_map(|(rows, cols)| {
        let n = rows * cols;
        (
            proptest::collection::vec(0i64..4, n),
            proptest::collection::vec(prop_oneof![3 => 0.0f64..100.0, 1 => Just(NODATA)], n),
        )
            .prop_map(move |(labels, values)| {
                (
                    Array2::from_shape_vec((rows, cols), labels).unwrap(),
                    Array2::from_shape_vec((rows, cols), values).unwrap(),
                )
            })
    })
}

fn cell(id: u64, col: usize, row: usize) -> Polygon {
    let (x0, y1) = (col as f64, 4.0 - row as f64);
    Polygon::new(
        id,
        Geometry::polygon(vec![vec![[x0, y1 - 1.0], [x0 + 1.0, y1 - 1.0], [x0 + 1.0, y1], [x0, y1], [x0, y1 - 1.0]]]),
        Crs::epsg(3857),
    )
}

fn stack() -> RasterStack {
    let values = Array3::from_shape_fn((2, 4, 4), |(b, r, c)| (b * 100 + r * 4 + c) as f64);
    RasterStack::single_date(
        values,
        vec!["b1".to_string(), "b2".to_string()],
        NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
        Affine::from_origin(0.0, 4.0, 1.0, 1.0),
        Crs::epsg(3857),
        vec![None, None],
    )
    .unwrap()
}

fn category() -> impl Strategy<Value = &'static str> {
    prop_oneof![Just("forest"), Just("water"), Just("urban"), Just("crop")]
}

proptest! {
    #[test]
    fn zonal_count_equals_valid_pixels((labels, values) in grid_pair()) {
        let layer = RasterLayer { name: "b1".to_string(), band: 0, time: 0, values: values.view(), nodata: Some(NODATA) };
        let zonal = zonal_statistics(&labels, &[layer], &[Statistic::Count], Some(0)).unwrap();

        for label in zonal.labels() {
            let valid = labels
                .iter()
                .zip(values.iter())
                .filter(|(l, v)| **l == label && **v != NODATA)
                .count();
            match zonal.get(label, "b1", Statistic::Count) {
                Some(count) => prop_assert_eq!(count as usize, valid),
                None => prop_assert_eq!(valid, 0),
            }
        }
    }

    #[test]
    fn prediction_columns_match_training(
        train in proptest::collection::vec(category(), 1..6),
        predict in proptest::collection::vec(category(), 1..10),
    ) {
        let options = TableOptions {
            stats: vec![Statistic::Mean, Statistic::Max],
            categorical: vec![CategoricalColumn::attribute("landcover_type")],
            ..Default::default()
        };
        let training: Vec<Polygon> = train
            .iter()
            .enumerate()
            .map(|(i, cat)| cell(i as u64 + 1, i % 4, i / 4).with_class(1 + (i % 2) as i64).with_attribute("landcover_type", *cat))
            .collect();
        let table = build_training_table(&training, &stack(), &options).unwrap();

        let objects: Vec<Polygon> = predict
            .iter()
            .enumerate()
            .map(|(i, cat)| cell(i as u64 + 1, i % 4, i / 4).with_attribute("landcover_type", *cat))
            .collect();
        let matrix = build_prediction_table(Entities::Polygons(&objects), &stack(), &table.schema, 0).unwrap();

        prop_assert_eq!(&matrix.columns, &table.matrix.columns);
        prop_assert_eq!(matrix.nrows(), objects.len());
    }
}

#[test]
fn single_polygon_with_only_nodata_is_empty_training_set() {
    let values = Array3::from_elem((1, 4, 4), NODATA);
    let raster = RasterStack::single_date(
        values,
        vec!["b1".to_string()],
        NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
        Affine::from_origin(0.0, 4.0, 1.0, 1.0),
        Crs::epsg(3857),
        vec![Some(NODATA)],
    )
    .unwrap();

    let err = build_training_table(&[cell(1, 0, 0).with_class(3)], &raster, &TableOptions::default())
        .unwrap_err();
    assert!(matches!(err, LandcubeError::EmptyTrainingSet { .. }));
}

#[test]
fn polygon_in_other_crs_is_rejected() {
    let polygon = Polygon::new(1, cell(1, 0, 0).geometry, Crs::wgs84()).with_class(1);
    let err = build_training_table(&[polygon], &stack(), &TableOptions::default()).unwrap_err();
    assert!(matches!(err, LandcubeError::Crs(_)));
}
