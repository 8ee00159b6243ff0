//! End-to-end runs of the landcube binary against a filesystem cube

use chrono::NaiveDate;
use landcube_core::models::{Affine, Crs, GridSpec, RasterStack};
use landcube_store::FsDataCube;
use ndarray::Array3;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const WEST: f64 = 500_000.0;
const NORTH: f64 = 4_000_040.0;
const RES: f64 = 10.0;
const CELL: usize = 4;

fn landcube(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_landcube"))
        .current_dir(dir)
        .env_remove("DATABASE_URL")
        .env_remove("LANDCUBE_STORE")
        .env_remove("LANDCUBE_DATA_DIR")
        .env("RUST_LOG", "warn")
        .args(args)
        .output()
        .expect("Failed to execute landcube")
}

fn json_data(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).expect("Output should be valid JSON");
    assert_eq!(parsed["status"], "success");
    parsed["data"].clone()
}

/// One 4x4 cell; the left half is forest, the right half water
fn write_cube(data_dir: &Path) {
    let date = NaiveDate::from_ymd_opt(2021, 7, 1).unwrap();
    let bands = vec!["red".to_string(), "nir".to_string()];
    let grid = GridSpec {
        crs: Crs::epsg(32633),
        resolution: RES,
        tile_size: (CELL, CELL),
        origin: [WEST, NORTH],
        band_names: bands.clone(),
        time_steps: vec![date],
    };
    let values = Array3::from_shape_fn((2, CELL, CELL), |(band, row, col)| {
        let jitter = (row + col) as f64 * 0.005;
        match (band, col >= 2) {
            (0, false) => 0.05 + jitter,
            (0, true) => 0.6 + jitter,
            (_, false) => 0.45 - jitter,
            (_, true) => 0.1 + jitter,
        }
    });
    let stack = RasterStack::single_date(
        values,
        bands,
        date,
        Affine::from_origin(WEST, NORTH, RES, RES),
        Crs::epsg(32633),
        vec![None, None],
    )
    .unwrap();

    let cube = FsDataCube::new(data_dir);
    cube.write_grid("s2_l2a", &grid).unwrap();
    cube.write_cell("s2_l2a", 0, 0, &stack).unwrap();
}

/// One-pixel squares in the first and last column of every row
fn write_labels(path: &Path) {
    let mut features = Vec::new();
    for row in 0..CELL {
        for (col, code) in [(0usize, 10), (3, 80)] {
            let x0 = WEST + col as f64 * RES;
            let y1 = NORTH - row as f64 * RES;
            features.push(serde_json::json!({
                "type": "Feature",
                "properties": { "lc": code },
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[x0, y1 - RES], [x0 + RES, y1 - RES], [x0 + RES, y1], [x0, y1], [x0, y1 - RES]]]
                }
            }));
        }
    }
    let collection = serde_json::json!({
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "EPSG:32633" } },
        "features": features,
    });
    std::fs::write(path, collection.to_string()).unwrap();
}

fn query_args() -> Vec<&'static str> {
    vec!["--product", "s2_l2a", "--bbox", "500000", "4000000", "500040", "4000040", "--bbox-crs", "EPSG:32633"]
}

#[test]
fn test_algorithms_json() {
    let dir = TempDir::new().unwrap();
    let output = landcube(dir.path(), &["--json", "algorithms"]);
    assert!(output.status.success());

    let data = json_data(&output);
    let classifiers: Vec<&str> =
        data["classifiers"].as_array().unwrap().iter().map(|c| c["name"].as_str().unwrap()).collect();
    assert_eq!(classifiers, vec!["rf", "gbt", "lgb"]);
    assert_eq!(data["segmenters"].as_array().unwrap().len(), 2);
}

#[test]
fn test_tiles_listing() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    write_cube(&data_dir);

    let mut args = vec!["--json", "--store", "fs", "--data-dir", data_dir.to_str().unwrap(), "tiles"];
    args.extend(query_args());
    let output = landcube(dir.path(), &args);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let data = json_data(&output);
    assert_eq!(data["product"], "s2_l2a");
    assert_eq!(data["tiles"].as_array().unwrap().len(), 1);
    assert_eq!(data["tiles"][0]["key"], "0_0");
}

#[test]
fn test_unknown_product_fails() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    write_cube(&data_dir);

    let output = landcube(
        dir.path(),
        &["--store", "fs", "--data-dir", data_dir.to_str().unwrap(), "tiles", "--product", "l8", "--bbox", "0", "0", "1", "1"],
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Product 'l8' not found"));
}

#[test]
fn test_import_train_and_list() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let data_dir = data_dir.to_str().unwrap();
    write_cube(Path::new(data_dir));
    let labels = dir.path().join("labels.geojson");
    write_labels(&labels);

    let output = landcube(
        dir.path(),
        &[
            "--json", "--store", "fs", "--data-dir", data_dir, "labels", "import", labels.to_str().unwrap(),
            "--training-set", "survey", "--class-attribute", "lc",
        ],
    );
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let data = json_data(&output);
    assert_eq!(data["imported"], 8);
    assert_eq!(data["labeled"], 8);

    let mut args = vec![
        "--json", "--store", "fs", "--data-dir", data_dir, "--workers", "1", "train", "--name", "lc_2021",
        "--training-set", "survey", "--mode", "pixel", "--param", "n_estimators=10", "--param", "seed=7",
    ];
    args.extend(query_args());
    let output = landcube(dir.path(), &args);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let data = json_data(&output);
    assert_eq!(data["model"]["name"], "lc_2021");
    assert_eq!(data["training_rows"], 8);

    let output = landcube(dir.path(), &["--json", "--store", "fs", "--data-dir", data_dir, "models"]);
    let data = json_data(&output);
    assert_eq!(data.as_array().unwrap().len(), 1);
    assert_eq!(data[0]["algorithm"], "rf");
}
