//! Histogram gradient boosting with leaf-wise growth.
//!
//! Numeric columns are quantile-binned once up front; categorical columns
//! use their codes as bins and split on a set of categories (sorted by
//! gradient ratio, best prefix goes left).

use ndarray::ArrayView1;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use super::category_code;
use super::objective::Objective;
use crate::config::HistConfig;
use crate::error::{ForecastError, Result};
use crate::features::FeatureMatrix;

const MIN_SUM_HESSIAN: f64 = 1e-3;
const CAT_SMOOTH: f64 = 10.0;
const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SplitRule {
    /// `value <= threshold` goes left.
    Threshold(f64),
    /// Codes (capped at `cap`) in `left` go left, everything else right.
    Categories { left: Vec<u32>, cap: u32 },
}

impl SplitRule {
    fn goes_left(&self, value: f64) -> bool {
        match self {
            SplitRule::Threshold(t) => value <= *t,
            SplitRule::Categories { left, cap } => {
                left.binary_search(&category_code(value).min(*cap)).is_ok()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        rule: SplitRule,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    rule,
                    left,
                    right,
                } => {
                    idx = if rule.goes_left(row[*feature]) { *left } else { *right };
                }
            }
        }
    }
}

enum FeatureBins {
    Numeric { upper: Vec<f64> },
    Categorical { cap: u32, n_bins: usize },
}

impl FeatureBins {
    fn numeric(column: ArrayView1<'_, f64>, max_bins: usize) -> Self {
        let mut all: Vec<f64> = column.iter().copied().filter(|v| v.is_finite()).collect();
        all.sort_by(|a, b| a.total_cmp(b));
        let mut distinct = all.clone();
        distinct.dedup();

        let points = if distinct.len() <= max_bins {
            distinct
        } else {
            let n = all.len();
            let mut q: Vec<f64> = (1..=max_bins)
                .map(|k| all[(k * n / max_bins).min(n - 1)])
                .collect();
            q.dedup();
            q
        };

        let mut upper: Vec<f64> = points.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
        upper.push(f64::INFINITY);
        FeatureBins::Numeric { upper }
    }

    fn categorical(column: ArrayView1<'_, f64>, max_bins: usize) -> Self {
        let cap = (max_bins - 1) as u32;
        let max_code = column.iter().map(|&v| category_code(v)).max().unwrap_or(0);
        FeatureBins::Categorical {
            cap,
            n_bins: max_code.min(cap) as usize + 1,
        }
    }

    fn n_bins(&self) -> usize {
        match self {
            FeatureBins::Numeric { upper } => upper.len(),
            FeatureBins::Categorical { n_bins, .. } => *n_bins,
        }
    }

    fn bin(&self, value: f64) -> u16 {
        match self {
            FeatureBins::Numeric { upper } => upper.partition_point(|&u| u < value) as u16,
            FeatureBins::Categorical { cap, .. } => category_code(value).min(*cap) as u16,
        }
    }
}

#[derive(Clone, Copy, Default)]
struct HistBin {
    g: f64,
    h: f64,
    n: usize,
}

enum BinSplitKind {
    UpTo(u16),
    InSet(Vec<bool>),
}

struct BinSplit {
    gain: f64,
    feature: usize,
    kind: BinSplitKind,
    rule: SplitRule,
}

impl BinSplit {
    fn goes_left(&self, bin: u16) -> bool {
        match &self.kind {
            BinSplitKind::UpTo(b) => bin <= *b,
            BinSplitKind::InSet(mask) => mask[bin as usize],
        }
    }
}

struct LeafState {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
    g: f64,
    h: f64,
    split: Option<BinSplit>,
}

struct Grower<'a> {
    params: &'a HistConfig,
    bins: &'a [FeatureBins],
    binned: &'a [Vec<u16>],
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
}

impl Grower<'_> {
    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda_l2)
    }

    fn admissible(&self, n_left: usize, h_left: f64, n_right: usize, h_right: f64) -> bool {
        let min_data = self.params.min_data_in_leaf.max(1);
        n_left >= min_data
            && n_right >= min_data
            && h_left >= MIN_SUM_HESSIAN
            && h_right >= MIN_SUM_HESSIAN
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64, depth: usize) -> Option<BinSplit> {
        if self.params.max_depth.is_some_and(|d| depth >= d)
            || rows.len() < 2 * self.params.min_data_in_leaf.max(1)
        {
            return None;
        }
        let parent = self.score(g, h);
        let mut best: Option<BinSplit> = None;

        for &f in self.features {
            let mut hist = vec![HistBin::default(); self.bins[f].n_bins()];
            for &r in rows {
                let b = &mut hist[self.binned[f][r] as usize];
                b.g += self.grad[r];
                b.h += self.hess[r];
                b.n += 1;
            }
            let candidate = match &self.bins[f] {
                FeatureBins::Numeric { upper } => self
                    .scan_numeric(&hist, g, h, parent)
                    .map(|(gain, b)| (gain, BinSplitKind::UpTo(b), SplitRule::Threshold(upper[b as usize]))),
                FeatureBins::Categorical { cap, .. } => {
                    self.scan_categorical(&hist, g, h, parent).map(|(gain, mask)| {
                        let left = (0..mask.len()).filter(|&b| mask[b]).map(|b| b as u32).collect();
                        (gain, BinSplitKind::InSet(mask), SplitRule::Categories { left, cap: *cap })
                    })
                }
            };
            if let Some((gain, kind, rule)) = candidate {
                if best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(BinSplit {
                        gain,
                        feature: f,
                        kind,
                        rule,
                    });
                }
            }
        }
        best
    }

    fn scan_numeric(&self, hist: &[HistBin], g: f64, h: f64, parent: f64) -> Option<(f64, u16)> {
        let n: usize = hist.iter().map(|b| b.n).sum();
        let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
        let mut best: Option<(f64, u16)> = None;
        for (b, bin) in hist.iter().enumerate().take(hist.len().saturating_sub(1)) {
            gl += bin.g;
            hl += bin.h;
            nl += bin.n;
            if bin.n == 0 || !self.admissible(nl, hl, n - nl, h - hl) {
                continue;
            }
            let gain = self.score(gl, hl) + self.score(g - gl, h - hl) - parent;
            if gain > MIN_GAIN && best.map_or(true, |(bg, _)| gain > bg) {
                best = Some((gain, b as u16));
            }
        }
        best
    }

    fn scan_categorical(&self, hist: &[HistBin], g: f64, h: f64, parent: f64) -> Option<(f64, Vec<bool>)> {
        let n: usize = hist.iter().map(|b| b.n).sum();
        let mut present: Vec<usize> = (0..hist.len()).filter(|&b| hist[b].n > 0).collect();
        if present.len() < 2 {
            return None;
        }
        present.sort_by(|&a, &b| {
            let ra = hist[a].g / (hist[a].h + CAT_SMOOTH);
            let rb = hist[b].g / (hist[b].h + CAT_SMOOTH);
            ra.total_cmp(&rb).then(a.cmp(&b))
        });

        let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
        let mut best: Option<(f64, usize)> = None;
        for (k, &b) in present.iter().enumerate().take(present.len() - 1) {
            gl += hist[b].g;
            hl += hist[b].h;
            nl += hist[b].n;
            if !self.admissible(nl, hl, n - nl, h - hl) {
                continue;
            }
            let gain = self.score(gl, hl) + self.score(g - gl, h - hl) - parent;
            if gain > MIN_GAIN && best.map_or(true, |(bg, _)| gain > bg) {
                best = Some((gain, k + 1));
            }
        }

        best.map(|(gain, prefix)| {
            let mut mask = vec![false; hist.len()];
            for &b in &present[..prefix] {
                mask[b] = true;
            }
            (gain, mask)
        })
    }

    fn leaf_state(&self, node: usize, rows: Vec<usize>, depth: usize) -> LeafState {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();
        let split = self.best_split(&rows, g, h, depth);
        LeafState {
            node,
            rows,
            depth,
            g,
            h,
            split,
        }
    }

    fn grow(&self, rows: Vec<usize>) -> Tree {
        let mut nodes = vec![Node::Leaf(0.0)];
        let mut leaves = vec![self.leaf_state(0, rows, 0)];

        while leaves.len() < self.params.num_leaves {
            let pick = leaves
                .iter()
                .enumerate()
                .filter_map(|(i, l)| l.split.as_ref().map(|s| (i, s.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
            let Some((i, _)) = pick else { break };

            let mut leaf = leaves.swap_remove(i);
            let Some(split) = leaf.split.take() else { break };
            let column = &self.binned[split.feature];
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
                leaf.rows.iter().partition(|&&r| split.goes_left(column[r]));

            let (left, right) = (nodes.len(), nodes.len() + 1);
            nodes.push(Node::Leaf(0.0));
            nodes.push(Node::Leaf(0.0));
            nodes[leaf.node] = Node::Split {
                feature: split.feature,
                rule: split.rule.clone(),
                left,
                right,
            };
            leaves.push(self.leaf_state(left, left_rows, leaf.depth + 1));
            leaves.push(self.leaf_state(right, right_rows, leaf.depth + 1));
        }

        for leaf in &leaves {
            let value = -leaf.g / (leaf.h + self.params.lambda_l2) * self.params.learning_rate;
            nodes[leaf.node] = Node::Leaf(value);
        }
        Tree { nodes }
    }
}

/// Boosted ensemble of histogram trees for one objective.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistGbdt {
    objective: Objective,
    init_score: f64,
    n_features: usize,
    trees: Vec<Tree>,
}

impl HistGbdt {
    pub fn fit(
        x: &FeatureMatrix,
        y: &[f64],
        objective: Objective,
        params: &HistConfig,
        seed: u64,
        cancel: &AtomicBool,
    ) -> Result<Self> {
        let (n, m) = (x.nrows(), x.ncols());
        if n == 0 {
            return Err(ForecastError::EmptyTrainingSet("histogram booster".into()));
        }
        if y.len() != n {
            return Err(ForecastError::ShapeMismatch {
                expected: format!("{n} labels"),
                got: format!("{} labels", y.len()),
            });
        }

        let max_bins = params.max_bins.clamp(2, u16::MAX as usize);
        let bins: Vec<FeatureBins> = (0..m)
            .map(|j| {
                if x.is_categorical(j) {
                    FeatureBins::categorical(x.column(j), max_bins)
                } else {
                    FeatureBins::numeric(x.column(j), max_bins)
                }
            })
            .collect();
        let binned: Vec<Vec<u16>> = (0..m)
            .map(|j| x.column(j).iter().map(|&v| bins[j].bin(v)).collect())
            .collect();

        let init_score = objective.init_score(y);
        let mut scores = vec![init_score; n];
        let mut rng = StdRng::seed_from_u64(seed);
        let all_rows: Vec<usize> = (0..n).collect();
        let mut bag = all_rows.clone();
        let n_sampled = ((m as f64 * params.feature_fraction).round() as usize).max(1).min(m);
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut trees = Vec::with_capacity(params.n_estimators);

        for iter in 0..params.n_estimators {
            if cancel.load(Ordering::Relaxed) {
                return Err(ForecastError::Cancelled);
            }
            if params.bagging_fraction < 1.0 && params.bagging_freq > 0 && iter % params.bagging_freq == 0 {
                bag = all_rows
                    .iter()
                    .copied()
                    .filter(|_| rng.random::<f64>() < params.bagging_fraction)
                    .collect();
                if bag.is_empty() {
                    bag = all_rows.clone();
                }
            }
            let mut features: Vec<usize> = (0..m).collect();
            features.shuffle(&mut rng);
            features.truncate(n_sampled);
            features.sort_unstable();

            for i in 0..n {
                (grad[i], hess[i]) = objective.grad_hess(y[i], scores[i]);
            }
            let grower = Grower {
                params,
                bins: &bins,
                binned: &binned,
                grad: &grad,
                hess: &hess,
                features: &features,
            };
            let tree = grower.grow(bag.clone());
            for (i, s) in scores.iter_mut().enumerate() {
                *s += tree.predict(x.row(i));
            }
            trees.push(tree);

            if iter % 50 == 0 {
                debug!(iter, loss = objective.mean_loss(y, &scores), "hist boosting round");
            }
        }

        Ok(Self {
            objective,
            init_score,
            n_features: m,
            trees,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_raw(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.init_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    /// Predictions in output space (probability or quantity).
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        if x.ncols() != self.n_features {
            return Err(ForecastError::ShapeMismatch {
                expected: format!("{} features", self.n_features),
                got: format!("{} features", x.ncols()),
            });
        }
        Ok((0..x.nrows())
            .map(|i| self.objective.transform(self.predict_raw(x.row(i))))
            .collect())
    }
}
