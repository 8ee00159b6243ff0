//! Region-merging segmentation (`bis`).
//!
//! Every valid pixel starts as its own region. The adjacent pair whose merge
//! adds the least heterogeneity is merged first, for as long as that increase
//! stays below `t^2`. Heterogeneity mixes colour (size-weighted standard
//! deviation per layer) and shape (compactness and smoothness of the
//! boundary), weighted by `s` and `c`.

use crate::segmentation::{renumber, SegmentInput, Segmenter};
use landcube_core::error::Result;
use landcube_core::models::LabelArray;
use landcube_core::params::{typed_params, ParamDef};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

pub const NAME: &str = "bis";

pub const PARAMS: &[ParamDef] = &[
    ParamDef::float("t", 7.0, 0.0, 1e9, "scale threshold, larger values give bigger segments"),
    ParamDef::float("s", 0.3, 0.0, 1.0, "weight of shape against colour"),
    ParamDef::float("c", 0.8, 0.0, 1.0, "weight of compactness against smoothness"),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BisParams {
    pub t: f64,
    pub s: f64,
    pub c: f64,
}

#[derive(Debug, Clone)]
pub struct Bis {
    params: BisParams,
}

impl Bis {
    pub fn new(params: BisParams) -> Self {
        Self { params }
    }

    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        Ok(Self::new(typed_params(NAME, value)?))
    }
}

#[derive(Debug, Clone)]
struct Region {
    n: f64,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    /// Boundary length in pixel edges
    perimeter: f64,
    min_r: usize,
    max_r: usize,
    min_c: usize,
    max_c: usize,
    /// Neighbour id -> shared edge count
    neighbours: BTreeMap<usize, usize>,
    version: u32,
    alive: bool,
}

impl Region {
    fn std_weighted(&self) -> f64 {
        self.sum
            .iter()
            .zip(&self.sum_sq)
            .map(|(s, sq)| {
                let mean = s / self.n;
                self.n * (sq / self.n - mean * mean).max(0.0).sqrt()
            })
            .sum()
    }

    fn bbox_perimeter(&self) -> f64 {
        2.0 * ((self.max_r - self.min_r + 1) + (self.max_c - self.min_c + 1)) as f64
    }

    fn compactness(&self) -> f64 {
        self.n * self.perimeter / self.n.sqrt()
    }

    fn smoothness(&self) -> f64 {
        self.n * self.perimeter / self.bbox_perimeter()
    }

    fn merged(&self, other: &Region, shared: usize) -> Region {
        Region {
            n: self.n + other.n,
            sum: self.sum.iter().zip(&other.sum).map(|(a, b)| a + b).collect(),
            sum_sq: self.sum_sq.iter().zip(&other.sum_sq).map(|(a, b)| a + b).collect(),
            perimeter: self.perimeter + other.perimeter - 2.0 * shared as f64,
            min_r: self.min_r.min(other.min_r),
            max_r: self.max_r.max(other.max_r),
            min_c: self.min_c.min(other.min_c),
            max_c: self.max_c.max(other.max_c),
            neighbours: BTreeMap::new(),
            version: 0,
            alive: true,
        }
    }
}

type HeapEntry = Reverse<(OrderedFloat<f64>, usize, usize, u32, u32)>;

struct Merger<'a> {
    params: &'a BisParams,
    regions: Vec<Region>,
    parent: Vec<usize>,
    heap: BinaryHeap<HeapEntry>,
}

impl Merger<'_> {
    fn cost(&self, a: usize, b: usize) -> f64 {
        let (ra, rb) = (&self.regions[a], &self.regions[b]);
        let shared = ra.neighbours.get(&b).copied().unwrap_or(0);
        let m = ra.merged(rb, shared);

        let h_color = m.std_weighted() - (ra.std_weighted() + rb.std_weighted());
        let h_cmpct = m.compactness() - (ra.compactness() + rb.compactness());
        let h_smooth = m.smoothness() - (ra.smoothness() + rb.smoothness());
        let h_shape = self.params.c * h_cmpct + (1.0 - self.params.c) * h_smooth;

        (1.0 - self.params.s) * h_color + self.params.s * h_shape
    }

    fn push(&mut self, a: usize, b: usize) {
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        let cost = self.cost(a, b);
        let entry = (OrderedFloat(cost), a, b, self.regions[a].version, self.regions[b].version);
        self.heap.push(Reverse(entry));
    }

    /// Merge `b` into `a`
    fn merge(&mut self, a: usize, b: usize) {
        let shared = self.regions[a].neighbours.get(&b).copied().unwrap_or(0);
        let mut merged = self.regions[a].merged(&self.regions[b], shared);

        let mut neighbours = std::mem::take(&mut self.regions[a].neighbours);
        for (x, count) in std::mem::take(&mut self.regions[b].neighbours) {
            *neighbours.entry(x).or_insert(0) += count;
        }
        neighbours.remove(&a);
        neighbours.remove(&b);

        for (&x, &count) in &neighbours {
            let theirs = &mut self.regions[x].neighbours;
            theirs.remove(&b);
            theirs.insert(a, count);
        }

        merged.neighbours = neighbours;
        merged.version = self.regions[a].version + 1;
        self.regions[a] = merged;
        self.regions[b].alive = false;
        self.parent[b] = a;

        let ids: Vec<usize> = self.regions[a].neighbours.keys().copied().collect();
        for x in ids {
            self.push(a, x);
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn run(&mut self, limit: f64) -> usize {
        let mut merges = 0;
        while let Some(Reverse((cost, a, b, va, vb))) = self.heap.pop() {
            let (ra, rb) = (&self.regions[a], &self.regions[b]);
            if !ra.alive || !rb.alive || ra.version != va || rb.version != vb {
                continue;
            }
            if cost.0 >= limit {
                break;
            }
            self.merge(a, b);
            merges += 1;
        }
        merges
    }
}

impl Segmenter for Bis {
    fn algorithm(&self) -> &'static str {
        NAME
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::to_value(&self.params).unwrap_or_default()
    }

    fn segment(&self, input: &SegmentInput) -> Result<LabelArray> {
        let (rows, cols) = input.shape();
        let n_layers = input.n_layers();
        let idx = |r: usize, c: usize| r * cols + c;

        let mut regions = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                let sum: Vec<f64> = (0..n_layers).map(|l| input.values[[l, r, c]]).collect();
                let sum_sq = sum.iter().map(|v| v * v).collect();
                regions.push(Region {
                    n: 1.0,
                    sum,
                    sum_sq,
                    perimeter: 4.0,
                    min_r: r,
                    max_r: r,
                    min_c: c,
                    max_c: c,
                    neighbours: BTreeMap::new(),
                    version: 0,
                    alive: input.valid[[r, c]],
                });
            }
        }
        for r in 0..rows {
            for c in 0..cols {
                if !input.valid[[r, c]] {
                    continue;
                }
                if c + 1 < cols && input.valid[[r, c + 1]] {
                    regions[idx(r, c)].neighbours.insert(idx(r, c + 1), 1);
                    regions[idx(r, c + 1)].neighbours.insert(idx(r, c), 1);
                }
                if r + 1 < rows && input.valid[[r + 1, c]] {
                    regions[idx(r, c)].neighbours.insert(idx(r + 1, c), 1);
                    regions[idx(r + 1, c)].neighbours.insert(idx(r, c), 1);
                }
            }
        }

        let mut merger = Merger {
            params: &self.params,
            regions,
            parent: (0..rows * cols).collect(),
            heap: BinaryHeap::new(),
        };
        for a in 0..rows * cols {
            let right: Vec<usize> = merger.regions[a].neighbours.keys().copied().filter(|&b| b > a).collect();
            for b in right {
                merger.push(a, b);
            }
        }

        let merges = merger.run(self.params.t * self.params.t);
        tracing::debug!(merges, pixels = rows * cols, "Region merging finished");

        let mut labels = LabelArray::zeros((rows, cols));
        for r in 0..rows {
            for c in 0..cols {
                if input.valid[[r, c]] {
                    // Root ids are offset by one so that 0 stays nodata
                    labels[[r, c]] = merger.find(idx(r, c)) as i64 + 1;
                }
            }
        }
        renumber(&mut labels);
        Ok(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn input(values: Array2<f64>) -> SegmentInput {
        let (rows, cols) = values.dim();
        let valid = values.mapv(|v| !v.is_nan());
        SegmentInput { values: values.into_shape_with_order((1, rows, cols)).unwrap(), valid }
    }

    fn bis(t: f64) -> Bis {
        Bis::new(BisParams { t, s: 0.3, c: 0.8 })
    }

    #[test]
    fn test_two_flat_halves_become_two_segments() {
        let values = Array2::from_shape_fn((8, 8), |(_, c)| if c < 4 { 0.0 } else { 1000.0 });
        let labels = bis(50.0).segment(&input(values)).unwrap();

        for r in 0..8 {
            for c in 0..8 {
                assert_eq!(labels[[r, c]], if c < 4 { 1 } else { 2 }, "pixel {},{}", r, c);
            }
        }
    }

    #[test]
    fn test_zero_threshold_keeps_pixels() {
        let values = Array2::from_shape_fn((3, 3), |(r, c)| (r * 3 + c) as f64);
        let labels = bis(0.0).segment(&input(values)).unwrap();
        let expected: Vec<i64> = (1..=9).collect();
        assert_eq!(labels.iter().copied().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_nodata_separates_regions() {
        let mut values = Array2::from_elem((3, 5), 1.0);
        for r in 0..3 {
            values[[r, 2]] = f64::NAN;
        }
        let labels = bis(100.0).segment(&input(values)).unwrap();
        assert_eq!(labels.column(2).to_vec(), vec![0, 0, 0]);
        assert_eq!(labels[[0, 0]], 1);
        assert_eq!(labels[[2, 4]], 2);
        assert_eq!(*labels.iter().max().unwrap(), 2);
    }

    #[test]
    fn test_deterministic_on_noise() {
        let values = Array3::from_shape_fn((2, 10, 10), |(l, r, c)| ((r * 13 + c * 7 + l * 3) % 17) as f64);
        let input = SegmentInput { values, valid: Array2::from_elem((10, 10), true) };
        assert_eq!(bis(6.0).segment(&input).unwrap(), bis(6.0).segment(&input).unwrap());
    }
}
