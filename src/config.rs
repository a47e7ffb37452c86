use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{ForecastError, Result};

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub hist: HistConfig,
    pub ordered: OrderedConfig,
    pub ensemble: EnsembleConfig,
    pub scaling: ScalingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub train_data: PathBuf,
    pub test_data: PathBuf,
    pub customer_data: PathBuf,
    pub sku_data: PathBuf,
    pub model_dir: PathBuf,
    pub submission_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            train_data: PathBuf::from("data/Train.csv"),
            test_data: PathBuf::from("data/Test.csv"),
            customer_data: PathBuf::from("data/customer_data.csv"),
            sku_data: PathBuf::from("data/sku_data.csv"),
            model_dir: PathBuf::from("models"),
            submission_file: PathBuf::from("submissions/submission.csv"),
        }
    }
}

/// Histogram boosting (family A) hyperparameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HistConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub num_leaves: usize,
    pub max_depth: Option<usize>,
    pub min_data_in_leaf: usize,
    pub feature_fraction: f64,
    pub bagging_fraction: f64,
    pub bagging_freq: usize,
    pub max_bins: usize,
    pub lambda_l2: f64,
}

impl Default for HistConfig {
    fn default() -> Self {
        Self {
            n_estimators: 300,
            learning_rate: 0.05,
            num_leaves: 31,
            max_depth: None,
            min_data_in_leaf: 20,
            feature_fraction: 0.8,
            bagging_fraction: 0.8,
            bagging_freq: 1,
            max_bins: 255,
            lambda_l2: 1.0,
        }
    }
}

/// Ordered-statistics boosting (family B) hyperparameters.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct OrderedConfig {
    pub iterations: usize,
    pub learning_rate: f64,
    pub depth: u16,
    pub min_samples_leaf: usize,
    pub subsample: f64,
    pub prior_weight: f64,
}

impl Default for OrderedConfig {
    fn default() -> Self {
        Self {
            iterations: 200,
            learning_rate: 0.08,
            depth: 6,
            min_samples_leaf: 20,
            subsample: 0.8,
            prior_weight: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct EnsembleConfig {
    pub seeds: Vec<u64>,
    pub hist_weight: f64,
    pub ordered_weight: f64,
    /// Training/inference worker threads; all cores when unset.
    pub workers: Option<usize>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            seeds: vec![42, 2024, 7, 123, 999],
            hist_weight: 0.6,
            ordered_weight: 0.4,
            workers: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ScalingConfig {
    pub purchase_1w_scale: f64,
    pub purchase_2w_scale: f64,
    pub qty_1w_threshold: f64,
    pub qty_2w_threshold: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            purchase_1w_scale: 1.5,
            purchase_2w_scale: 1.3,
            qty_1w_threshold: 0.15,
            qty_2w_threshold: 0.15,
        }
    }
}

impl PipelineConfig {
    /// Loads the TOML config at `path`. A missing file is replaced by the
    /// defaults, which are also written out as a template.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|e| ForecastError::io(path, e))?;
            let config: PipelineConfig = toml::from_str(&raw)
                .map_err(|e| ForecastError::Config(format!("{}: {}", path.display(), e)))?;
            info!("Config loaded from {}", path.display());
            config
        } else {
            warn!("Config file not found at '{}'. Creating default.", path.display());
            let config = Self::default();
            if let Ok(s) = toml::to_string_pretty(&config) {
                if let Some(parent) = path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                let _ = std::fs::write(path, s);
            }
            config
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let seeds = &self.ensemble.seeds;
        if seeds.is_empty() {
            return Err(invalid("ensemble.seeds must not be empty"));
        }
        let unique: HashSet<u64> = seeds.iter().copied().collect();
        if unique.len() != seeds.len() {
            return Err(invalid("ensemble.seeds contains duplicates"));
        }

        let h = &self.hist;
        if h.n_estimators == 0 {
            return Err(invalid("hist.n_estimators must be positive"));
        }
        positive("hist.learning_rate", h.learning_rate)?;
        fraction("hist.feature_fraction", h.feature_fraction)?;
        fraction("hist.bagging_fraction", h.bagging_fraction)?;
        if h.num_leaves < 2 {
            return Err(invalid("hist.num_leaves must be at least 2"));
        }
        if h.max_bins < 2 {
            return Err(invalid("hist.max_bins must be at least 2"));
        }
        if h.max_depth == Some(0) {
            return Err(invalid("hist.max_depth must be positive when set"));
        }
        non_negative("hist.lambda_l2", h.lambda_l2)?;

        let o = &self.ordered;
        if o.iterations == 0 {
            return Err(invalid("ordered.iterations must be positive"));
        }
        if o.depth == 0 {
            return Err(invalid("ordered.depth must be positive"));
        }
        positive("ordered.learning_rate", o.learning_rate)?;
        fraction("ordered.subsample", o.subsample)?;
        positive("ordered.prior_weight", o.prior_weight)?;

        non_negative("ensemble.hist_weight", self.ensemble.hist_weight)?;
        non_negative("ensemble.ordered_weight", self.ensemble.ordered_weight)?;
        if self.ensemble.workers == Some(0) {
            return Err(invalid("ensemble.workers must be positive when set"));
        }

        let s = &self.scaling;
        non_negative("scaling.purchase_1w_scale", s.purchase_1w_scale)?;
        non_negative("scaling.purchase_2w_scale", s.purchase_2w_scale)?;
        non_negative("scaling.qty_1w_threshold", s.qty_1w_threshold)?;
        non_negative("scaling.qty_2w_threshold", s.qty_2w_threshold)?;
        Ok(())
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.paths.model_dir.join(crate::models::artifact::ARTIFACT_FILE)
    }
}

fn invalid(msg: &str) -> ForecastError {
    ForecastError::Config(msg.to_string())
}

fn positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ForecastError::Config(format!("{} must be positive, got {}", name, value)))
    }
}

fn non_negative(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ForecastError::Config(format!("{} must be finite and >= 0, got {}", name, value)))
    }
}

fn fraction(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ForecastError::Config(format!("{} must be in (0, 1], got {}", name, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let raw = r#"
            [ensemble]
            seeds = [1, 2]
            hist_weight = 0.7

            [scaling]
            purchase_1w_scale = 2.0
        "#;
        let config: PipelineConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.ensemble.seeds, vec![1, 2]);
        assert_eq!(config.ensemble.hist_weight, 0.7);
        assert_eq!(config.ensemble.ordered_weight, 0.4);
        assert_eq!(config.scaling.purchase_1w_scale, 2.0);
        assert_eq!(config.hist.num_leaves, 31);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.ensemble.seeds = vec![];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.ensemble.seeds = vec![3, 3];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.hist.feature_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.scaling.qty_1w_threshold = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let shipped: PipelineConfig = toml::from_str(include_str!("../config/config.toml")).unwrap();
        let defaults = PipelineConfig::default();
        assert_eq!(
            toml::to_string(&shipped).unwrap(),
            toml::to_string(&defaults).unwrap()
        );
    }

    #[test]
    fn test_load_missing_writes_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("config.toml");
        let config = PipelineConfig::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.ensemble.seeds.len(), 5);

        let reloaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(reloaded.hist.max_bins, config.hist.max_bins);
    }
}
