//! Second-order regression trees used as boosting base learners.

use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

const MIN_GAIN: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum Node {
    Leaf { value: f64 },
    /// Rows with `x[feature] <= threshold` go left
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

/// Growth limits and L2 regularization of leaf values
#[derive(Debug, Clone, Copy)]
pub struct GrowParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    pub lambda: f64,
}

/// Split candidates: every distinct value, or pre-computed histogram bins
pub enum SplitSearch<'a> {
    Exact,
    Histogram(&'a BinnedFeatures),
}

/// Quantile-binned copy of a feature matrix
#[derive(Debug, Clone)]
pub struct BinnedFeatures {
    bins: Array2<u16>,
    /// Upper edges of every bin but the last, per feature
    edges: Vec<Vec<f64>>,
}

impl BinnedFeatures {
    pub fn new(x: ArrayView2<'_, f64>, max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, u16::MAX as usize);
        let edges: Vec<Vec<f64>> = x.columns().into_iter().map(|col| bin_edges(col, max_bins)).collect();

        let mut bins = Array2::<u16>::zeros(x.dim());
        for ((row, feature), value) in x.indexed_iter() {
            let e = &edges[feature];
            bins[[row, feature]] = e.partition_point(|edge| *edge < *value) as u16;
        }
        Self { bins, edges }
    }

    pub fn n_bins(&self, feature: usize) -> usize {
        self.edges[feature].len() + 1
    }
}

fn bin_edges(column: ArrayView1<'_, f64>, max_bins: usize) -> Vec<f64> {
    let mut unique: Vec<f64> = column.iter().copied().collect();
    unique.sort_by(|a, b| a.total_cmp(b));
    unique.dedup();

    if unique.len() <= max_bins {
        return unique.windows(2).map(|w| midpoint(w[0], w[1])).collect();
    }

    let mut edges: Vec<f64> = (1..max_bins)
        .map(|k| {
            let i = k * unique.len() / max_bins;
            midpoint(unique[i - 1], unique[i])
        })
        .collect();
    edges.dedup();
    edges
}

fn midpoint(lo: f64, hi: f64) -> f64 {
    let mid = lo + (hi - lo) / 2.0;
    if mid >= hi {
        lo
    } else {
        mid
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct Candidate {
    gain: f64,
    feature: usize,
    threshold: f64,
}

struct Grower<'a> {
    x: ArrayView2<'a, f64>,
    grad: &'a [f64],
    hess: &'a [f64],
    params: GrowParams,
    search: &'a SplitSearch<'a>,
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Fit to gradients and hessians of the rows in `rows`
    pub fn fit(
        x: ArrayView2<'_, f64>,
        grad: &[f64],
        hess: &[f64],
        rows: Vec<usize>,
        params: GrowParams,
        search: &SplitSearch<'_>,
    ) -> Self {
        let mut grower = Grower { x, grad, hess, params, search, nodes: Vec::new() };
        grower.grow(rows, 0);
        Self { nodes: grower.nodes }
    }

    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split { feature, threshold, left, right } => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

impl Grower<'_> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let (g, h) = self.sums(&rows);
        let idx = self.nodes.len();
        self.nodes.push(Node::Leaf { value: -g / (h + self.params.lambda) });

        if depth >= self.params.max_depth || rows.len() < 2 * self.params.min_samples_leaf.max(1) {
            return idx;
        }

        let best = match self.search {
            SplitSearch::Exact => self.best_exact(&rows, g, h),
            SplitSearch::Histogram(binned) => self.best_histogram(binned, &rows, g, h),
        };
        let Some(split) = best else {
            return idx;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&r| self.x[[r, split.feature]] <= split.threshold);
        if left_rows.is_empty() || right_rows.is_empty() {
            return idx;
        }

        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);
        self.nodes[idx] = Node::Split { feature: split.feature, threshold: split.threshold, left, right };
        idx
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter().fold((0.0, 0.0), |(g, h), &r| (g + self.grad[r], h + self.hess[r]))
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda).max(f64::MIN_POSITIVE)
    }

    fn gain(&self, gl: f64, hl: f64, g: f64, h: f64) -> f64 {
        self.score(gl, hl) + self.score(g - gl, h - hl) - self.score(g, h)
    }

    fn best_exact(&self, rows: &[usize], g: f64, h: f64) -> Option<Candidate> {
        let min_leaf = self.params.min_samples_leaf.max(1);
        let n = rows.len();
        let mut best: Option<Candidate> = None;

        for feature in 0..self.x.ncols() {
            let mut sorted: Vec<(f64, usize)> = rows.iter().map(|&r| (self.x[[r, feature]], r)).collect();
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let (mut gl, mut hl) = (0.0, 0.0);
            for i in 0..n - 1 {
                let (value, r) = sorted[i];
                gl += self.grad[r];
                hl += self.hess[r];
                let left_n = i + 1;
                if left_n < min_leaf || n - left_n < min_leaf || value >= sorted[i + 1].0 {
                    continue;
                }
                let gain = self.gain(gl, hl, g, h);
                if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Candidate { gain, feature, threshold: midpoint(value, sorted[i + 1].0) });
                }
            }
        }
        best
    }

    fn best_histogram(&self, binned: &BinnedFeatures, rows: &[usize], g: f64, h: f64) -> Option<Candidate> {
        let min_leaf = self.params.min_samples_leaf.max(1);
        let n = rows.len();
        let mut best: Option<Candidate> = None;

        for feature in 0..self.x.ncols() {
            let n_bins = binned.n_bins(feature);
            if n_bins < 2 {
                continue;
            }
            let mut hist = vec![(0.0f64, 0.0f64, 0usize); n_bins];
            for &r in rows {
                let b = binned.bins[[r, feature]] as usize;
                hist[b].0 += self.grad[r];
                hist[b].1 += self.hess[r];
                hist[b].2 += 1;
            }

            let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
            for (b, (bg, bh, bn)) in hist.iter().enumerate().take(n_bins - 1) {
                gl += bg;
                hl += bh;
                nl += bn;
                if nl < min_leaf || n - nl < min_leaf {
                    continue;
                }
                let gain = self.gain(gl, hl, g, h);
                if gain > MIN_GAIN && best.as_ref().map_or(true, |c| gain > c.gain) {
                    best = Some(Candidate { gain, feature, threshold: binned.edges[feature][b] });
                }
            }
        }
        best
    }
}
