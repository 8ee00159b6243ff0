use chrono::NaiveDate;
use landcube_core::models::{Affine, BoundingBox, Crs, LabelArray, Region, RasterStack, TileKey};
use landcube_segment::{SegmentInput, Segmentation, SegmenterRegistry};
use landcube_store::{MemoryMetadataStore, MetadataStore};
use ndarray::{Array2, Array3};
use proptest::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};

/// Number of 4-connected components per label
fn components_per_label(labels: &LabelArray) -> HashMap<i64, usize> {
    let (rows, cols) = labels.dim();
    let mut seen = Array2::from_elem((rows, cols), false);
    let mut counts = HashMap::new();
    for r in 0..rows {
        for c in 0..cols {
            let label = labels[[r, c]];
            if label == 0 || seen[[r, c]] {
                continue;
            }
            *counts.entry(label).or_insert(0) += 1;
            let mut queue = VecDeque::from([(r, c)]);
            seen[[r, c]] = true;
            while let Some((r, c)) = queue.pop_front() {
                let mut next = vec![];
                if r > 0 {
                    next.push((r - 1, c));
                }
                if r + 1 < rows {
                    next.push((r + 1, c));
                }
                if c > 0 {
                    next.push((r, c - 1));
                }
                if c + 1 < cols {
                    next.push((r, c + 1));
                }
                for (nr, nc) in next {
                    if !seen[[nr, nc]] && labels[[nr, nc]] == label {
                        seen[[nr, nc]] = true;
                        queue.push_back((nr, nc));
                    }
                }
            }
        }
    }
    counts
}

fn grid_strategy() -> impl Strategy<Value = (Vec<f64>, Vec<bool>)> {
    (prop::collection::vec(0.0f64..10.0, 64), prop::collection::vec(prop::bool::weighted(0.9), 64))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn segments_are_connected_and_cover_valid_pixels(
        (values, valid) in grid_strategy(),
        algorithm in prop::sample::select(vec!["slic", "bis"]),
    ) {
        let registry = SegmenterRegistry::with_builtin();
        let params = match algorithm {
            "slic" => vec!["n_segments=6".to_string(), "compactness=2".to_string()],
            _ => vec!["t=4".to_string()],
        };
        let segmenter = registry.create(algorithm, &params).unwrap();

        let input = SegmentInput {
            values: Array3::from_shape_vec((1, 8, 8), values).unwrap(),
            valid: Array2::from_shape_vec((8, 8), valid).unwrap(),
        };
        let labels = segmenter.segment(&input).unwrap();

        for ((r, c), label) in labels.indexed_iter() {
            prop_assert_eq!(*label == 0, !input.valid[[r, c]]);
        }
        for (label, count) in components_per_label(&labels) {
            prop_assert_eq!(count, 1, "label {} split into {} parts", label, count);
        }

        let distinct: HashSet<i64> = labels.iter().copied().filter(|l| *l != 0).collect();
        let max = labels.iter().copied().max().unwrap_or(0);
        prop_assert_eq!(distinct.len() as i64, max);
    }
}

fn scene() -> RasterStack {
    let values = Array3::from_shape_fn((2, 6, 6), |(b, r, _)| if r < 3 { b as f64 } else { 50.0 + b as f64 });
    RasterStack::single_date(
        values,
        vec!["red".into(), "nir".into()],
        NaiveDate::from_ymd_opt(2018, 5, 1).unwrap(),
        Affine::from_origin(300_000.0, 2_000_060.0, 10.0, 10.0),
        Crs::epsg(32613),
        vec![None, None],
    )
    .unwrap()
}

#[tokio::test]
async fn segment_polygonize_and_store() {
    let registry = SegmenterRegistry::with_builtin();
    let mut seg = Segmentation::new(&scene(), &[], registry.create("bis", &["t=20".to_string()]).unwrap()).unwrap();

    let labels = seg.segment().unwrap().clone();
    assert_eq!(labels[[0, 0]], 1);
    assert_eq!(labels[[5, 5]], 2);

    let polygons = seg.polygonize(None).unwrap().to_vec();
    assert_eq!(polygons.len(), 2);

    let store = MemoryMetadataStore::new();
    let key = TileKey::new(0, 0);
    let result = seg.to_store(&store, "s2_bis_2018", "sentinel2", 2018, &key).await.unwrap();
    assert_eq!(result.info.algorithm, "bis");
    assert_eq!(result.info.parameters["t"], 20.0);

    let region = Region::new(BoundingBox::new(300_000.0, 2_000_000.0, 300_060.0, 2_000_060.0), Crs::epsg(32613));
    let stored = store.query_segmentation_polygons("s2_bis_2018", &region).await.unwrap();
    assert_eq!(stored.len(), 2);
}
