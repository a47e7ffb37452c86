//! Gradient boosting over smartcore regression trees with ordered target
//! statistics for categorical columns.
//!
//! During training each categorical code is replaced by a smoothed mean of
//! the labels of rows that precede it in a seeded permutation, so a row never
//! sees its own label. Inference uses statistics over the full training set;
//! codes never seen in training fall back to the prior.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::tree::decision_tree_regressor::{DecisionTreeRegressor, DecisionTreeRegressorParameters};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use super::category_code;
use super::objective::Objective;
use crate::config::OrderedConfig;
use crate::error::{ForecastError, Result};
use crate::features::FeatureMatrix;

type RegressionTree = DecisionTreeRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

/// Per-code label sums for one categorical column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetStats {
    column: usize,
    prior: f64,
    weight: f64,
    sums: BTreeMap<u32, (f64, f64)>,
}

impl TargetStats {
    fn encode(&self, code: u32) -> f64 {
        let (sum, count) = self.sums.get(&code).copied().unwrap_or((0.0, 0.0));
        (sum + self.weight * self.prior) / (count + self.weight)
    }

    /// Fits full-data statistics and writes the ordered (leave-future-out)
    /// encoding of the training rows into `out`.
    fn fit_ordered(
        column: usize,
        codes: &[u32],
        y: &[f64],
        prior: f64,
        weight: f64,
        permutation: &[usize],
        out: &mut [f64],
    ) -> Self {
        let mut stats = Self {
            column,
            prior,
            weight,
            sums: BTreeMap::new(),
        };
        for &row in permutation {
            out[row] = stats.encode(codes[row]);
            let entry = stats.sums.entry(codes[row]).or_insert((0.0, 0.0));
            entry.0 += y[row];
            entry.1 += 1.0;
        }
        stats
    }
}

/// A boosting stage: a tree fit to the negative gradient and its Newton step.
#[derive(Serialize, Deserialize)]
struct Stage {
    step: f64,
    tree: RegressionTree,
}

#[derive(Serialize, Deserialize)]
pub struct OrderedBoost {
    objective: Objective,
    init_score: f64,
    learning_rate: f64,
    n_features: usize,
    stats: Vec<TargetStats>,
    stages: Vec<Stage>,
}

impl OrderedBoost {
    pub fn fit(
        x: &FeatureMatrix,
        y: &[f64],
        objective: Objective,
        params: &OrderedConfig,
        seed: u64,
        cancel: &AtomicBool,
    ) -> Result<Self> {
        let (n, m) = (x.nrows(), x.ncols());
        if n == 0 {
            return Err(ForecastError::EmptyTrainingSet("ordered booster".into()));
        }
        if y.len() != n {
            return Err(ForecastError::ShapeMismatch {
                expected: format!("{n} labels"),
                got: format!("{} labels", y.len()),
            });
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let prior = y.iter().sum::<f64>() / n as f64;
        let mut permutation: Vec<usize> = (0..n).collect();
        permutation.shuffle(&mut rng);

        let mut encoded_columns = BTreeMap::new();
        let mut stats = Vec::with_capacity(x.categorical_indices().len());
        for &j in x.categorical_indices() {
            let codes: Vec<u32> = x.column(j).iter().map(|&v| category_code(v)).collect();
            let mut out = vec![0.0; n];
            stats.push(TargetStats::fit_ordered(
                j,
                &codes,
                y,
                prior,
                params.prior_weight,
                &permutation,
                &mut out,
            ));
            encoded_columns.insert(j, out);
        }
        let data: Vec<f64> = (0..n)
            .flat_map(|i| {
                let encoded_columns = &encoded_columns;
                (0..m).map(move |j| encoded_columns.get(&j).map_or_else(|| x.values()[[i, j]], |c| c[i]))
            })
            .collect();
        let full = DenseMatrix::new(n, m, data.clone(), false);

        let tree_params = DecisionTreeRegressorParameters::default()
            .with_max_depth(params.depth)
            .with_min_samples_leaf(params.min_samples_leaf.max(1))
            .with_min_samples_split(2 * params.min_samples_leaf.max(1));

        let init_score = objective.init_score(y);
        let mut scores = vec![init_score; n];
        let mut stages = Vec::with_capacity(params.iterations);
        let sample_size = ((n as f64 * params.subsample).round() as usize).clamp(1, n);

        for iter in 0..params.iterations {
            if cancel.load(Ordering::Relaxed) {
                return Err(ForecastError::Cancelled);
            }
            let (grad, hess): (Vec<f64>, Vec<f64>) =
                (0..n).map(|i| objective.grad_hess(y[i], scores[i])).unzip();

            let mut rows: Vec<usize> = (0..n).collect();
            if sample_size < n {
                rows.shuffle(&mut rng);
                rows.truncate(sample_size);
                rows.sort_unstable();
            }
            let sub: Vec<f64> = rows
                .iter()
                .flat_map(|&i| data[i * m..(i + 1) * m].iter().copied())
                .collect();
            let sub_x = DenseMatrix::new(rows.len(), m, sub, false);
            let target: Vec<f64> = rows.iter().map(|&i| -grad[i]).collect();

            let tree = DecisionTreeRegressor::fit(&sub_x, &target, tree_params.clone())
                .map_err(|e| ForecastError::Fit(e.to_string()))?;
            let fitted = tree.predict(&full).map_err(|e| ForecastError::Fit(e.to_string()))?;

            let (num, den) = rows.iter().fold((0.0, 0.0), |(a, b), &i| {
                (a - grad[i] * fitted[i], b + hess[i] * fitted[i] * fitted[i])
            });
            let step = if den > 1e-12 { num / den } else { 0.0 };
            for (s, t) in scores.iter_mut().zip(&fitted) {
                *s += params.learning_rate * step * t;
            }
            stages.push(Stage { step, tree });

            if iter % 50 == 0 {
                debug!(iter, loss = objective.mean_loss(y, &scores), "ordered boosting round");
            }
        }

        Ok(Self {
            objective,
            init_score,
            learning_rate: params.learning_rate,
            n_features: m,
            stats,
            stages,
        })
    }

    pub fn n_trees(&self) -> usize {
        self.stages.len()
    }

    pub fn target_stats(&self) -> &[TargetStats] {
        &self.stats
    }

    fn encode(&self, x: &FeatureMatrix) -> DenseMatrix<f64> {
        let by_column: BTreeMap<usize, &TargetStats> = self.stats.iter().map(|s| (s.column, s)).collect();
        let data: Vec<f64> = (0..x.nrows())
            .flat_map(|i| {
                let by_column = &by_column;
                (0..x.ncols()).map(move |j| {
                    let v = x.values()[[i, j]];
                    by_column.get(&j).map_or(v, |s| s.encode(category_code(v)))
                })
            })
            .collect();
        DenseMatrix::new(x.nrows(), x.ncols(), data, false)
    }

    /// Predictions in output space (probability or quantity).
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        if x.ncols() != self.n_features {
            return Err(ForecastError::ShapeMismatch {
                expected: format!("{} features", self.n_features),
                got: format!("{} features", x.ncols()),
            });
        }
        if x.nrows() == 0 {
            return Ok(Vec::new());
        }
        let encoded = self.encode(x);
        let mut scores = vec![self.init_score; x.nrows()];
        for stage in &self.stages {
            let t = stage.tree.predict(&encoded).map_err(|e| ForecastError::Fit(e.to_string()))?;
            for (s, v) in scores.iter_mut().zip(t) {
                *s += self.learning_rate * stage.step * v;
            }
        }
        Ok(scores.into_iter().map(|s| self.objective.transform(s)).collect())
    }
}
