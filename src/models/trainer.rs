//! Parallel training of the seed ensemble.
//!
//! Every (seed, family, slot) combination is an independent task on a bounded
//! rayon pool. The first failure raises a shared cancel flag that the
//! remaining boosters check between rounds; results are gathered back in
//! task order, and tasks are laid out by ascending seed, so each key's models
//! are stored in ascending seed order.

use rayon::prelude::*;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info};

use super::ensemble::{Ensemble, Family, ModelKey, ModelSlot, SeedModel, Task, TrainedModel};
use super::hist_gbdt::HistGbdt;
use super::ordered_boost::OrderedBoost;
use super::worker_pool;
use crate::config::PipelineConfig;
use crate::error::{ForecastError, Result};
use crate::features::{FeatureMatrix, Horizon, Targets};

/// Classifiers borrow the full matrix; regressors own their positive rows.
struct TrainingSet<'x> {
    x: Cow<'x, FeatureMatrix>,
    y: Vec<f64>,
}

#[derive(Debug, Clone, Copy)]
struct FitTask {
    seed: u64,
    key: ModelKey,
}

pub struct EnsembleTrainer<'a> {
    config: &'a PipelineConfig,
}

impl<'a> EnsembleTrainer<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        Self { config }
    }

    fn training_sets<'x>(
        x: &'x FeatureMatrix,
        targets: &Targets,
    ) -> Result<Vec<(ModelSlot, TrainingSet<'x>)>> {
        let mut sets = Vec::with_capacity(ModelSlot::ALL.len());
        for slot in ModelSlot::ALL {
            let set = match slot.task {
                Task::Classifier => TrainingSet {
                    x: Cow::Borrowed(x),
                    y: targets.buy(slot.horizon).to_vec(),
                },
                Task::Regressor => {
                    let rows = targets.positive_rows(slot.horizon);
                    if rows.is_empty() {
                        return Err(ForecastError::EmptyTrainingSet(format!(
                            "the {} quantity regressor (no purchases at this horizon)",
                            slot.horizon
                        )));
                    }
                    let qty = targets.qty(slot.horizon);
                    TrainingSet {
                        x: Cow::Owned(x.select_rows(&rows)),
                        y: rows.iter().map(|&i| qty[i]).collect(),
                    }
                }
            };
            sets.push((slot, set));
        }
        Ok(sets)
    }

    fn fit_one(&self, task: FitTask, set: &TrainingSet<'_>, cancel: &AtomicBool) -> Result<SeedModel> {
        let started = Instant::now();
        let objective = task.key.slot.objective();
        let model = match task.key.family {
            Family::Hist => TrainedModel::Hist(HistGbdt::fit(
                &set.x,
                &set.y,
                objective,
                &self.config.hist,
                task.seed,
                cancel,
            )?),
            Family::Ordered => TrainedModel::Ordered(OrderedBoost::fit(
                &set.x,
                &set.y,
                objective,
                &self.config.ordered,
                task.seed,
                cancel,
            )?),
        };
        debug!(
            "🌱 Seed {} | {} trained on {} rows in {:.1}s",
            task.seed,
            task.key,
            set.y.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(SeedModel { seed: task.seed, model })
    }

    pub fn train(&self, x: &FeatureMatrix, targets: &Targets) -> Result<Ensemble> {
        if x.nrows() != targets.len() {
            return Err(ForecastError::ShapeMismatch {
                expected: format!("{} target rows", x.nrows()),
                got: format!("{} target rows", targets.len()),
            });
        }
        if x.nrows() == 0 {
            return Err(ForecastError::EmptyTrainingSet("any model (training table is empty)".into()));
        }
        for h in Horizon::ALL {
            info!(
                "Horizon {}: {} rows, {} purchases",
                h,
                targets.len(),
                targets.positive_rows(h).len()
            );
        }

        let sets = Self::training_sets(x, targets)?;
        let mut seeds = self.config.ensemble.seeds.clone();
        seeds.sort_unstable();
        let tasks: Vec<FitTask> = seeds
            .iter()
            .flat_map(|&seed| ModelKey::all().map(move |key| FitTask { seed, key }))
            .collect();
        info!(
            "🚀 Training {} models ({} seeds x {} per seed)...",
            tasks.len(),
            seeds.len(),
            tasks.len() / seeds.len().max(1)
        );

        let ensemble = self.fit_all(&tasks, &sets)?;
        info!("✅ Ensemble trained: {} models", ensemble.len());
        Ok(ensemble)
    }

    /// Runs every task on the pool. The first non-cancellation error in task
    /// order wins and no ensemble is returned.
    fn fit_all(&self, tasks: &[FitTask], sets: &[(ModelSlot, TrainingSet<'_>)]) -> Result<Ensemble> {
        let pool = worker_pool(self.config.ensemble.workers)?;
        let cancel = AtomicBool::new(false);
        let results: Vec<Result<SeedModel>> = pool.install(|| {
            tasks
                .par_iter()
                .map(|task| {
                    if cancel.load(Ordering::Relaxed) {
                        return Err(ForecastError::Cancelled);
                    }
                    let set = sets
                        .iter()
                        .find(|(slot, _)| *slot == task.key.slot)
                        .map(|(_, set)| set)
                        .ok_or_else(|| ForecastError::EmptyTrainingSet(task.key.to_string()))?;
                    let result = self.fit_one(*task, set, &cancel);
                    if let Err(e) = &result {
                        if !matches!(e, ForecastError::Cancelled) {
                            error!("❌ Seed {} | {} failed: {}", task.seed, task.key, e);
                        }
                        cancel.store(true, Ordering::Relaxed);
                    }
                    result
                })
                .collect()
        });

        let mut ensemble = Ensemble::default();
        let mut cancelled = false;
        let mut failure = None;
        for (task, result) in tasks.iter().zip(results) {
            match result {
                Ok(model) => ensemble.insert(task.key, model),
                Err(ForecastError::Cancelled) => cancelled = true,
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        if cancelled {
            return Err(ForecastError::Cancelled);
        }
        Ok(ensemble)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistConfig, OrderedConfig};
    use crate::models::Predictor;
    use crate::data::Observation;
    use crate::features::TargetGenerator;
    use chrono::NaiveDate;
    use ndarray::Array2;

    fn tiny_config(seeds: Vec<u64>) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.hist = HistConfig {
            n_estimators: 5,
            num_leaves: 4,
            min_data_in_leaf: 2,
            ..HistConfig::default()
        };
        config.ordered = OrderedConfig {
            iterations: 5,
            depth: 3,
            min_samples_leaf: 2,
            ..OrderedConfig::default()
        };
        config.ensemble.seeds = seeds;
        config.ensemble.workers = Some(2);
        config
    }

    fn observations(qty: impl Fn(i64, u32) -> f64) -> Vec<Observation> {
        let mut rows = Vec::new();
        for c in 0..4 {
            for w in 0..10u32 {
                rows.push(Observation {
                    customer_id: c,
                    product_id: 1,
                    week_start: NaiveDate::from_ymd_opt(2024, 1, 1 + w * 3),
                    qty: qty(c, w),
                });
            }
        }
        rows
    }

    fn features(n: usize) -> FeatureMatrix {
        let values = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { (i % 10) as f64 } else { (i / 10) as f64 });
        FeatureMatrix::new(vec!["week".into(), "customer".into()], vec![1], values).unwrap()
    }

    #[test]
    fn test_trains_every_key_in_ascending_seed_order() {
        let train = observations(|c, w| if (c + w as i64) % 2 == 0 { 2.0 } else { 0.0 });
        let targets = TargetGenerator::generate(&train);
        let config = tiny_config(vec![7, 3]);
        let ensemble = EnsembleTrainer::new(&config).train(&features(train.len()), &targets).unwrap();
        assert_eq!(ensemble.len(), 16);
        for key in ModelKey::all() {
            assert_eq!(ensemble.seeds(&key), vec![3, 7]);
        }
    }

    #[test]
    fn test_regressor_without_positives_fails() {
        let train = observations(|_, _| 0.0);
        let targets = TargetGenerator::generate(&train);
        let config = tiny_config(vec![1]);
        let err = EnsembleTrainer::new(&config)
            .train(&features(train.len()), &targets)
            .err()
            .unwrap();
        assert!(matches!(err, ForecastError::EmptyTrainingSet(_)));
    }

    #[test]
    fn test_row_count_mismatch() {
        let train = observations(|_, _| 1.0);
        let targets = TargetGenerator::generate(&train);
        let config = tiny_config(vec![1]);
        let err = EnsembleTrainer::new(&config).train(&features(3), &targets).err().unwrap();
        assert!(matches!(err, ForecastError::ShapeMismatch { .. }));
    }

    /// Training sets where the 1-week regressor's labels do not match its rows.
    fn sets_with_broken_qty_1w(x: &FeatureMatrix, targets: &Targets) -> Vec<(ModelSlot, TrainingSet<'static>)> {
        EnsembleTrainer::training_sets(x, targets)
            .unwrap()
            .into_iter()
            .map(|(slot, set)| {
                let mut y = set.y;
                if slot == ModelSlot::ALL[2] {
                    y.pop();
                }
                (slot, TrainingSet { x: Cow::Owned(set.x.into_owned()), y })
            })
            .collect()
    }

    fn tasks_for(seeds: &[u64]) -> Vec<FitTask> {
        seeds
            .iter()
            .flat_map(|&seed| ModelKey::all().map(move |key| FitTask { seed, key }))
            .collect()
    }

    #[test]
    fn test_failing_task_returns_first_error_and_no_ensemble() {
        let train = observations(|c, w| if (c + w as i64) % 2 == 0 { 2.0 } else { 0.0 });
        let targets = TargetGenerator::generate(&train);
        let x = features(train.len());
        let sets = sets_with_broken_qty_1w(&x, &targets);

        for workers in [1, 4] {
            let mut config = tiny_config(vec![1, 2, 3]);
            config.ensemble.workers = Some(workers);
            let err = EnsembleTrainer::new(&config)
                .fit_all(&tasks_for(&[1, 2, 3]), &sets)
                .err()
                .unwrap();
            assert!(matches!(err, ForecastError::ShapeMismatch { .. }), "workers={workers}: {err}");
        }
    }

    #[test]
    fn test_single_worker_stops_after_failure() {
        let train = observations(|c, w| if (c + w as i64) % 2 == 0 { 2.0 } else { 0.0 });
        let targets = TargetGenerator::generate(&train);
        let x = features(train.len());
        let mut sets = sets_with_broken_qty_1w(&x, &targets);
        // qty_2w comes later in task order and would fail differently
        sets[3].1 = TrainingSet { x: Cow::Owned(x.select_rows(&[])), y: Vec::new() };

        let mut config = tiny_config(vec![5]);
        config.ensemble.workers = Some(1);
        let err = EnsembleTrainer::new(&config).fit_all(&tasks_for(&[5]), &sets).err().unwrap();
        assert!(matches!(err, ForecastError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_worker_count_does_not_change_forecasts() {
        let train = observations(|c, w| if (c * 3 + w as i64) % 4 == 0 { 1.0 + c as f64 } else { 0.0 });
        let targets = TargetGenerator::generate(&train);
        let x = features(train.len());

        let forecast = |workers: usize| {
            let mut config = tiny_config(vec![42, 7, 3]);
            config.ensemble.workers = Some(workers);
            let ensemble = EnsembleTrainer::new(&config).train(&x, &targets).unwrap();
            Predictor::new(&ensemble, &config).predict(&x).unwrap()
        };
        assert_eq!(forecast(1), forecast(4));
    }
}
