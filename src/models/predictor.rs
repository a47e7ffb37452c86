//! Seed averaging, family blending and post-processing.

use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::info;

use super::ensemble::{Ensemble, Family, ModelKey, ModelSlot, Task};
use super::worker_pool;
use crate::config::{PipelineConfig, ScalingConfig};
use crate::error::{ForecastError, Result};
use crate::features::{FeatureMatrix, Horizon};

/// Final outputs for one horizon, aligned with the test rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HorizonForecast {
    pub scaled_prob: Vec<f64>,
    pub expected_qty: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Forecast {
    pub one_week: HorizonForecast,
    pub two_week: HorizonForecast,
}

impl Forecast {
    pub fn horizon(&self, horizon: Horizon) -> &HorizonForecast {
        match horizon {
            Horizon::OneWeek => &self.one_week,
            Horizon::TwoWeek => &self.two_week,
        }
    }

    pub fn len(&self) -> usize {
        self.one_week.scaled_prob.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns blended probability and quantity into submission values:
/// the probability is scaled and clipped to [0, 1]; the quantity is
/// probability-weighted, zeroed below `threshold` and floored at 0.
/// The threshold applies to the unscaled probability.
pub fn post_process(raw_prob: &[f64], raw_qty: &[f64], scale: f64, threshold: f64) -> HorizonForecast {
    let scaled_prob = raw_prob.iter().map(|&p| (p * scale).clamp(0.0, 1.0)).collect();
    let expected_qty = raw_prob
        .iter()
        .zip(raw_qty)
        .map(|(&p, &q)| if p < threshold { 0.0 } else { (p * q).max(0.0) })
        .collect();
    HorizonForecast {
        scaled_prob,
        expected_qty,
    }
}

fn scaling_for(scaling: &ScalingConfig, horizon: Horizon) -> (f64, f64) {
    match horizon {
        Horizon::OneWeek => (scaling.purchase_1w_scale, scaling.qty_1w_threshold),
        Horizon::TwoWeek => (scaling.purchase_2w_scale, scaling.qty_2w_threshold),
    }
}

pub struct Predictor<'a> {
    ensemble: &'a Ensemble,
    config: &'a PipelineConfig,
}

impl<'a> Predictor<'a> {
    pub fn new(ensemble: &'a Ensemble, config: &'a PipelineConfig) -> Self {
        Self { ensemble, config }
    }

    /// Seed-averaged output of every key. Regressor outputs are floored at 0.
    fn seed_averages(&self, x: &FeatureMatrix) -> Result<BTreeMap<ModelKey, Vec<f64>>> {
        let mut jobs = Vec::new();
        for key in ModelKey::all() {
            let models = self
                .ensemble
                .get(&key)
                .filter(|m| !m.is_empty())
                .ok_or_else(|| ForecastError::ArtifactCorrupt(format!("no models stored for {key}")))?;
            jobs.extend(models.iter().map(|m| (key, m)));
        }

        let pool = worker_pool(self.config.ensemble.workers)?;
        let outputs: Vec<Result<Vec<f64>>> =
            pool.install(|| jobs.par_iter().map(|(_, m)| m.model.predict(x)).collect());

        let mut sums: BTreeMap<ModelKey, (Vec<f64>, usize)> = BTreeMap::new();
        for ((key, _), output) in jobs.iter().zip(outputs) {
            let output = output?;
            let (sum, count) = sums.entry(*key).or_insert_with(|| (vec![0.0; x.nrows()], 0));
            for (s, v) in sum.iter_mut().zip(&output) {
                *s += v;
            }
            *count += 1;
        }

        Ok(sums
            .into_iter()
            .map(|(key, (sum, count))| {
                let floor = key.slot.task == Task::Regressor;
                let avg = sum
                    .into_iter()
                    .map(|s| {
                        let v = s / count as f64;
                        if floor { v.max(0.0) } else { v }
                    })
                    .collect();
                (key, avg)
            })
            .collect())
    }

    fn blend(&self, averages: &BTreeMap<ModelKey, Vec<f64>>, slot: ModelSlot) -> Result<Vec<f64>> {
        let get = |family| {
            averages
                .get(&ModelKey { family, slot })
                .ok_or_else(|| ForecastError::ArtifactCorrupt(format!("no predictions for {family}/{slot}")))
        };
        let (hist, ordered) = (get(Family::Hist)?, get(Family::Ordered)?);
        let (wh, wo) = (self.config.ensemble.hist_weight, self.config.ensemble.ordered_weight);
        Ok(hist.iter().zip(ordered).map(|(a, b)| wh * a + wo * b).collect())
    }

    pub fn predict(&self, x: &FeatureMatrix) -> Result<Forecast> {
        info!("🔮 Predicting {} rows with {} models...", x.nrows(), self.ensemble.len());
        let averages = self.seed_averages(x)?;

        let mut forecast = Forecast::default();
        for horizon in Horizon::ALL {
            let prob = self.blend(&averages, ModelSlot { task: Task::Classifier, horizon })?;
            let qty = self.blend(&averages, ModelSlot { task: Task::Regressor, horizon })?;
            let (scale, threshold) = scaling_for(&self.config.scaling, horizon);
            let out = post_process(&prob, &qty, scale, threshold);
            info!(
                "Horizon {}: mean prob {:.4}, mean qty {:.4}",
                horizon,
                mean(&out.scaled_prob),
                mean(&out.expected_qty)
            );
            match horizon {
                Horizon::OneWeek => forecast.one_week = out,
                Horizon::TwoWeek => forecast.two_week = out,
            }
        }
        Ok(forecast)
    }
}

fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        0.0
    } else {
        v.iter().sum::<f64>() / v.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistConfig, OrderedConfig};
    use crate::features::Targets;
    use crate::models::EnsembleTrainer;
    use ndarray::Array2;

    #[test]
    fn test_threshold_zeroes_quantity() {
        let out = post_process(&[0.10, 0.15, 0.5], &[4.0, 4.0, 4.0], 1.5, 0.15);
        assert_eq!(out.expected_qty, vec![0.0, 0.15 * 4.0, 2.0]);
    }

    #[test]
    fn test_scaled_probability_is_clipped() {
        let out = post_process(&[0.8, 0.2, -0.1], &[1.0, 1.0, 1.0], 1.5, 0.0);
        assert_eq!(out.scaled_prob[0], 1.0);
        assert!((out.scaled_prob[1] - 0.3).abs() < 1e-12);
        assert_eq!(out.scaled_prob[2], 0.0);
        assert_eq!(out.expected_qty[2], 0.0);
    }

    #[test]
    fn test_threshold_uses_unscaled_probability() {
        // 0.12 * 1.5 = 0.18 would pass a scaled check
        let out = post_process(&[0.12], &[10.0], 1.5, 0.15);
        assert_eq!(out.expected_qty, vec![0.0]);
        assert!((out.scaled_prob[0] - 0.18).abs() < 1e-12);
    }

    fn fixture() -> (PipelineConfig, FeatureMatrix, Targets) {
        use crate::data::Observation;
        use crate::features::TargetGenerator;
        use chrono::NaiveDate;

        let mut train = Vec::new();
        for c in 0..3 {
            for w in 0..12u32 {
                train.push(Observation {
                    customer_id: c,
                    product_id: 5,
                    week_start: NaiveDate::from_ymd_opt(2024, 2, 1 + w * 2),
                    qty: if w % 3 == 0 { 3.0 } else { 0.0 },
                });
            }
        }
        let targets = TargetGenerator::generate(&train);
        let values = Array2::from_shape_fn((train.len(), 2), |(i, j)| {
            if j == 0 { (i % 12 % 3) as f64 } else { (i / 12) as f64 }
        });
        let x = FeatureMatrix::new(vec!["phase".into(), "customer".into()], vec![1], values).unwrap();

        let mut config = PipelineConfig::default();
        config.hist = HistConfig {
            n_estimators: 8,
            num_leaves: 4,
            min_data_in_leaf: 2,
            ..HistConfig::default()
        };
        config.ordered = OrderedConfig {
            iterations: 8,
            depth: 3,
            min_samples_leaf: 2,
            ..OrderedConfig::default()
        };
        config.ensemble.seeds = vec![42, 7];
        config.ensemble.workers = Some(3);
        (config, x, targets)
    }

    #[test]
    fn test_predictions_are_deterministic_and_bounded() {
        let (config, x, targets) = fixture();
        let ensemble = EnsembleTrainer::new(&config).train(&x, &targets).unwrap();
        let predictor = Predictor::new(&ensemble, &config);
        let first = predictor.predict(&x).unwrap();
        let second = predictor.predict(&x).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), x.nrows());
        for h in Horizon::ALL {
            let out = first.horizon(h);
            assert!(out.scaled_prob.iter().all(|p| (0.0..=1.0).contains(p)));
            assert!(out.expected_qty.iter().all(|q| *q >= 0.0));
        }
    }

    #[test]
    fn test_missing_family_is_rejected() {
        let (config, x, _) = fixture();
        let empty = Ensemble::default();
        let err = Predictor::new(&empty, &config).predict(&x).unwrap_err();
        assert!(matches!(err, ForecastError::ArtifactCorrupt(_)));
    }
}
