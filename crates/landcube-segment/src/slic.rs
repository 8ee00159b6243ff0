//! SLIC superpixels (`slic`).
//!
//! Cluster centres start on a regular grid with step `S = sqrt(N / k)` and
//! are nudged to the lowest-gradient pixel of their 3x3 neighbourhood. Each
//! iteration assigns every pixel within `S` of a centre to the closest one by
//! `sqrt(d_color^2 + (d_space / S)^2 * m^2)` and moves centres to the mean of
//! their pixels. Small or disconnected fragments are then merged into an
//! adjacent segment.

use crate::segmentation::{renumber, SegmentInput, Segmenter};
use landcube_core::error::{LandcubeError, Result};
use landcube_core::models::LabelArray;
use landcube_core::params::{typed_params, ParamDef};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const NAME: &str = "slic";

pub const PARAMS: &[ParamDef] = &[
    ParamDef::int("n_segments", 10_000, 1, 100_000_000, "approximate number of segments"),
    ParamDef::float("compactness", 10.0, 1e-6, 1e6, "weight of spatial against colour proximity"),
    ParamDef::int("max_iter", 10, 1, 1000, "assignment/update iterations"),
    ParamDef::float("min_size_factor", 0.5, 0.0, 1.0, "fragments below this share of S^2 are merged"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlicParams {
    pub n_segments: usize,
    pub compactness: f64,
    pub max_iter: usize,
    pub min_size_factor: f64,
}

#[derive(Debug, Clone)]
pub struct Slic {
    params: SlicParams,
}

#[derive(Debug, Clone)]
struct Center {
    row: f64,
    col: f64,
    color: Vec<f64>,
}

impl Slic {
    pub fn new(params: SlicParams) -> Self {
        Self { params }
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        let params: SlicParams = typed_params(NAME, value)?;
        if params.n_segments == 0 {
            return Err(LandcubeError::InvalidHyperparameter {
                algorithm: NAME.to_string(),
                reason: "n_segments must be at least 1".to_string(),
            });
        }
        Ok(Self::new(params))
    }
}

fn color_at(input: &SegmentInput, r: usize, c: usize) -> Vec<f64> {
    (0..input.n_layers()).map(|l| input.values[[l, r, c]]).collect()
}

fn color_dist2(input: &SegmentInput, r: usize, c: usize, color: &[f64]) -> f64 {
    color.iter().enumerate().map(|(l, v)| (input.values[[l, r, c]] - v).powi(2)).sum()
}

/// Squared colour gradient at a pixel, over valid 4-neighbours
fn gradient(input: &SegmentInput, r: usize, c: usize) -> f64 {
    let (rows, cols) = input.shape();
    let at = |r: usize, c: usize| if input.valid[[r, c]] { Some(color_at(input, r, c)) } else { None };
    let diff = |a: Option<Vec<f64>>, b: Option<Vec<f64>>| match (a, b) {
        (Some(a), Some(b)) => a.iter().zip(&b).map(|(x, y)| (x - y).powi(2)).sum(),
        _ => f64::INFINITY,
    };
    if r == 0 || c == 0 || r + 1 >= rows || c + 1 >= cols {
        return f64::INFINITY;
    }
    diff(at(r + 1, c), at(r - 1, c)) + diff(at(r, c + 1), at(r, c - 1))
}

impl Slic {
    fn initial_centers(&self, input: &SegmentInput, step: f64) -> Vec<Center> {
        let (rows, cols) = input.shape();
        let mut centers = Vec::new();
        let mut r = step / 2.0;
        while r < rows as f64 {
            let mut c = step / 2.0;
            while c < cols as f64 {
                let (r0, c0) = (r as usize, c as usize);
                // Move to the lowest gradient pixel in the 3x3 neighbourhood
                let mut best: Option<(f64, usize, usize)> = None;
                for rr in r0.saturating_sub(1)..=(r0 + 1).min(rows - 1) {
                    for cc in c0.saturating_sub(1)..=(c0 + 1).min(cols - 1) {
                        if !input.valid[[rr, cc]] {
                            continue;
                        }
                        let g = gradient(input, rr, cc);
                        if best.map_or(true, |(bg, _, _)| g < bg) {
                            best = Some((g, rr, cc));
                        }
                    }
                }
                if let Some((_, rr, cc)) = best {
                    centers.push(Center { row: rr as f64, col: cc as f64, color: color_at(input, rr, cc) });
                }
                c += step;
            }
            r += step;
        }
        centers
    }

    fn assign(&self, input: &SegmentInput, centers: &mut [Center], step: f64) -> Vec<Option<usize>> {
        let (rows, cols) = input.shape();
        let m2 = self.params.compactness.powi(2);
        let s2 = step * step;
        let mut assignment: Vec<Option<usize>> = vec![None; rows * cols];

        for _ in 0..self.params.max_iter {
            let mut best = vec![f64::INFINITY; rows * cols];
            assignment.iter_mut().for_each(|a| *a = None);

            for (k, center) in centers.iter().enumerate() {
                let r_lo = (center.row - step).floor().max(0.0) as usize;
                let r_hi = ((center.row + step).ceil() as usize).min(rows - 1);
                let c_lo = (center.col - step).floor().max(0.0) as usize;
                let c_hi = ((center.col + step).ceil() as usize).min(cols - 1);
                for r in r_lo..=r_hi {
                    for c in c_lo..=c_hi {
                        if !input.valid[[r, c]] {
                            continue;
                        }
                        let ds2 = (r as f64 - center.row).powi(2) + (c as f64 - center.col).powi(2);
                        let d = color_dist2(input, r, c, &center.color) + ds2 / s2 * m2;
                        let idx = r * cols + c;
                        if d < best[idx] {
                            best[idx] = d;
                            assignment[idx] = Some(k);
                        }
                    }
                }
            }

            // Move centres to the mean of their members
            let n_layers = input.n_layers();
            let mut sums = vec![(0.0f64, 0.0f64, vec![0.0f64; n_layers], 0usize); centers.len()];
            for (idx, a) in assignment.iter().enumerate() {
                if let Some(k) = a {
                    let (r, c) = (idx / cols, idx % cols);
                    let entry = &mut sums[*k];
                    entry.0 += r as f64;
                    entry.1 += c as f64;
                    for l in 0..n_layers {
                        entry.2[l] += input.values[[l, r, c]];
                    }
                    entry.3 += 1;
                }
            }
            let mut moved = false;
            for (center, (sr, sc, scolor, n)) in centers.iter_mut().zip(sums) {
                if n == 0 {
                    continue;
                }
                let n = n as f64;
                let (row, col) = (sr / n, sc / n);
                if (row - center.row).abs() > 1e-9 || (col - center.col).abs() > 1e-9 {
                    moved = true;
                }
                center.row = row;
                center.col = col;
                center.color = scolor.into_iter().map(|v| v / n).collect();
            }
            if !moved {
                break;
            }
        }
        assignment
    }
}

/// Merge fragments below `min_size` into an earlier adjacent segment
///
/// Components are visited in raster-scan order; a small one joins the
/// lowest-numbered neighbouring segment already kept, if any.
fn enforce_connectivity(
    assignment: &[Option<usize>],
    valid: &Array2<bool>,
    min_size: usize,
) -> LabelArray {
    let (rows, cols) = valid.dim();
    let mut labels = LabelArray::zeros((rows, cols));
    let mut next_label: i64 = 1;
    let mut queue = VecDeque::new();
    let mut component = Vec::new();

    for start in 0..rows * cols {
        let (sr, sc) = (start / cols, start % cols);
        if !valid[[sr, sc]] || labels[[sr, sc]] != 0 {
            continue;
        }
        // Unassigned valid pixels group together as their own cluster
        let cluster = assignment[start];

        component.clear();
        queue.push_back((sr, sc));
        labels[[sr, sc]] = -1;
        let mut neighbour_label: Option<i64> = None;

        while let Some((r, c)) = queue.pop_front() {
            component.push((r, c));
            let mut neighbours = Vec::with_capacity(4);
            if r > 0 {
                neighbours.push((r - 1, c));
            }
            if r + 1 < rows {
                neighbours.push((r + 1, c));
            }
            if c > 0 {
                neighbours.push((r, c - 1));
            }
            if c + 1 < cols {
                neighbours.push((r, c + 1));
            }
            for (nr, nc) in neighbours {
                if !valid[[nr, nc]] {
                    continue;
                }
                let existing = labels[[nr, nc]];
                if existing > 0 {
                    neighbour_label = Some(neighbour_label.map_or(existing, |l| l.min(existing)));
                } else if existing == 0 && assignment[nr * cols + nc] == cluster {
                    labels[[nr, nc]] = -1;
                    queue.push_back((nr, nc));
                }
            }
        }

        let label = match neighbour_label {
            Some(l) if component.len() < min_size => l,
            _ => {
                next_label += 1;
                next_label - 1
            }
        };
        for &(r, c) in &component {
            labels[[r, c]] = label;
        }
    }
    labels
}

impl Segmenter for Slic {
    fn algorithm(&self) -> &'static str {
        NAME
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }

    fn segment(&self, input: &SegmentInput) -> Result<LabelArray> {
        let (rows, cols) = input.shape();
        if input.valid_count() == 0 {
            return Ok(LabelArray::zeros((rows, cols)));
        }

        let step = ((rows * cols) as f64 / self.params.n_segments as f64).sqrt().max(1.0);
        let mut centers = self.initial_centers(input, step);
        let assignment = self.assign(input, &mut centers, step);

        let min_size = ((step * step) * self.params.min_size_factor) as usize;
        let mut labels = enforce_connectivity(&assignment, &input.valid, min_size);
        renumber(&mut labels);
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::collections::HashSet;

    fn input(values: Array2<f64>, nodata: Option<f64>) -> SegmentInput {
        let valid = values.mapv(|v| Some(v) != nodata);
        let (rows, cols) = values.dim();
        SegmentInput { values: values.into_shape_with_order((1, rows, cols)).unwrap(), valid }
    }

    fn slic(n_segments: usize, compactness: f64) -> Slic {
        Slic::new(SlicParams { n_segments, compactness, max_iter: 10, min_size_factor: 0.5 })
    }

    #[test]
    fn test_segments_do_not_cross_edge() {
        let values = Array2::from_shape_fn((8, 8), |(_, c)| if c < 4 { 0.0 } else { 100.0 });
        let labels = slic(4, 0.1).segment(&input(values, None)).unwrap();

        let left: HashSet<i64> = labels.columns().into_iter().take(4).flatten().copied().collect();
        let right: HashSet<i64> = labels.columns().into_iter().skip(4).flatten().copied().collect();
        assert!(left.is_disjoint(&right));
        assert_eq!(labels[[0, 0]], 1);
        assert!(!left.contains(&0));
        assert!(left.len() + right.len() <= 4);
    }

    #[test]
    fn test_nodata_is_zero_and_labels_dense() {
        let mut values = Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f64);
        values[[0, 0]] = -1.0;
        values[[5, 5]] = -1.0;
        let labels = slic(4, 10.0).segment(&input(values, Some(-1.0))).unwrap();

        assert_eq!(labels[[0, 0]], 0);
        assert_eq!(labels[[5, 5]], 0);
        let max = *labels.iter().max().unwrap();
        for id in 1..=max {
            assert!(labels.iter().any(|v| *v == id), "label {} missing", id);
        }
    }

    #[test]
    fn test_deterministic() {
        let values = Array3::from_shape_fn((2, 12, 12), |(l, r, c)| ((r * 7 + c * 3 + l) % 11) as f64);
        let valid = Array2::from_elem((12, 12), true);
        let input = SegmentInput { values, valid };
        let a = slic(9, 5.0).segment(&input).unwrap();
        let b = slic(9, 5.0).segment(&input).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_all_nodata() {
        let values = Array2::from_elem((3, 3), -1.0);
        let labels = slic(4, 10.0).segment(&input(values, Some(-1.0))).unwrap();
        assert!(labels.iter().all(|v| *v == 0));
    }

    #[test]
    fn test_rejects_zero_segments() {
        let value = serde_json::json!({"n_segments": 0, "compactness": 1.0, "max_iter": 1, "min_size_factor": 0.5});
        assert!(Slic::from_value(&value).is_err());
    }
}
