//! End-to-end orchestration: load → features → encode → targets → train →
//! persist → predict → write. Every step is tagged with its [`Stage`] so the
//! first failure is reported with context.

use std::collections::BTreeMap;
use tracing::info;

use crate::config::PipelineConfig;
use crate::data::{DataLoader, Dataset};
use crate::error::{ForecastError, PipelineError, Stage, StageContext};
use crate::features::{EncodedFeatures, Horizon, MetadataEncoder, PanelFeatureBuilder, PanelFeatures, TargetGenerator};
use crate::models::{EnsembleTrainer, ModelArtifact, ModelSlot, Predictor, Task, TrainingSummary};
use crate::submission::Submission;

type StageResult<T> = std::result::Result<T, PipelineError>;

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn prepare(&self) -> StageResult<(Dataset, PanelFeatures)> {
        let dataset = DataLoader::new(&self.config.paths).load_all().stage(Stage::Load)?;
        let panel = PanelFeatureBuilder::build(&dataset.train, &dataset.test).stage(Stage::Features)?;
        Ok((dataset, panel))
    }

    /// Trains and persists the ensemble; returns the inputs needed to score
    /// the test rows without re-reading them.
    fn fit(&self) -> StageResult<(Dataset, EncodedFeatures, ModelArtifact)> {
        let (dataset, panel) = self.prepare()?;
        let encoded = MetadataEncoder::fit_transform(&dataset, &panel).stage(Stage::Encode)?;
        let targets = TargetGenerator::generate(&dataset.train);
        if targets.len() != encoded.train.nrows() {
            return Err(PipelineError {
                stage: Stage::Targets,
                error: ForecastError::ShapeMismatch {
                    expected: format!("{} rows", encoded.train.nrows()),
                    got: format!("{} rows", targets.len()),
                },
            });
        }

        let ensemble = EnsembleTrainer::new(&self.config)
            .train(&encoded.train, &targets)
            .stage(Stage::Train)?;
        let artifact = ModelArtifact::new(
            &encoded.train,
            encoded.codebook.clone(),
            self.config.ensemble.seeds.clone(),
            ensemble,
        );

        let artifact_path = self.config.artifact_path();
        artifact.save(&artifact_path).stage(Stage::Persist)?;
        let rows_per_slot: BTreeMap<String, usize> = ModelSlot::ALL
            .iter()
            .map(|slot| {
                let rows = match slot.task {
                    Task::Classifier => targets.len(),
                    Task::Regressor => targets.positive_rows(slot.horizon).len(),
                };
                (slot.to_string(), rows)
            })
            .collect();
        let summary = TrainingSummary {
            trained_at: chrono::Utc::now().to_rfc3339(),
            train_rows: targets.len(),
            rows_per_slot,
            feature_names: artifact.feature_names.clone(),
            categorical_columns: artifact.categorical_columns.clone(),
            seeds: artifact.seeds.clone(),
            models: artifact.ensemble.len(),
            artifact: artifact_path,
        };
        let summary_path = summary.write(&self.config.paths.model_dir).stage(Stage::Persist)?;
        info!("Training summary written to {}", summary_path.display());
        for h in Horizon::ALL {
            info!("Positive rate {}: {:.4}", h, targets.positive_rows(h).len() as f64 / targets.len().max(1) as f64);
        }

        Ok((dataset, encoded, artifact))
    }

    fn score(&self, dataset: &Dataset, encoded: &EncodedFeatures, artifact: &ModelArtifact) -> StageResult<Submission> {
        artifact.check_layout(&encoded.test).stage(Stage::Predict)?;
        let forecast = Predictor::new(&artifact.ensemble, &self.config)
            .predict(&encoded.test)
            .stage(Stage::Predict)?;
        let submission = Submission::assemble(&dataset.test, &forecast).stage(Stage::Write)?;
        submission
            .write_csv(&self.config.paths.submission_file)
            .stage(Stage::Write)?;
        Ok(submission)
    }

    /// Full pipeline: train, persist, then score the test rows.
    pub fn run(&self) -> StageResult<Submission> {
        info!("🚀 Starting full pipeline");
        let (dataset, encoded, artifact) = self.fit()?;
        let submission = self.score(&dataset, &encoded, &artifact)?;
        info!("✅ Pipeline complete: {} rows forecast", submission.len());
        Ok(submission)
    }

    /// Train and persist only.
    pub fn train(&self) -> StageResult<ModelArtifact> {
        info!("🚀 Starting training");
        let (_, _, artifact) = self.fit()?;
        Ok(artifact)
    }

    /// Scores the test rows with a previously persisted artifact.
    pub fn predict(&self) -> StageResult<Submission> {
        info!("🚀 Starting prediction from {}", self.config.artifact_path().display());
        let artifact = ModelArtifact::load(&self.config.artifact_path()).stage(Stage::Load)?;
        let (dataset, panel) = self.prepare()?;
        let encoded = MetadataEncoder::transform_with(&dataset, &panel, &artifact.codebook).stage(Stage::Encode)?;
        self.score(&dataset, &encoded, &artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_inputs(dir: &Path) {
        let mut train = String::from("customer_id,product_unit_variant_id,week_start,qty_this_week\n");
        for c in 1..=3 {
            for p in [10, 20] {
                for w in 0..8 {
                    let qty = if (w + c + p / 10) % 3 == 0 { 2 + c } else { 0 };
                    train.push_str(&format!("{c},{p},2024-01-{:02},{qty}\n", 1 + w * 3));
                }
            }
        }
        fs::write(dir.join("Train.csv"), train).unwrap();

        let mut test = String::from("ID,customer_id,product_unit_variant_id,week_start\n");
        for c in 1..=3 {
            for p in [10, 20] {
                test.push_str(&format!("{c}_{p},{c},{p},2024-01-25\n"));
            }
        }
        test.push_str("4_10,4,10,2024-01-25\n");
        fs::write(dir.join("Test.csv"), test).unwrap();

        fs::write(
            dir.join("customer_data.csv"),
            "customer_id,customer_category,customer_status\n1,retail,active\n2,wholesale,active\n3,retail,\n",
        )
        .unwrap();
        fs::write(
            dir.join("sku_data.csv"),
            "product_unit_variant_id,grade_name,unit_name\n10,A,kg\n20,B,crate\n",
        )
        .unwrap();
    }

    fn config(dir: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.paths.train_data = dir.join("Train.csv");
        config.paths.test_data = dir.join("Test.csv");
        config.paths.customer_data = dir.join("customer_data.csv");
        config.paths.sku_data = dir.join("sku_data.csv");
        config.paths.model_dir = dir.join("models");
        config.paths.submission_file = dir.join("out").join("submission.csv");
        config.hist.n_estimators = 6;
        config.hist.num_leaves = 4;
        config.hist.min_data_in_leaf = 2;
        config.ordered.iterations = 6;
        config.ordered.depth = 3;
        config.ordered.min_samples_leaf = 2;
        config.ensemble.seeds = vec![42, 7];
        config.ensemble.workers = Some(2);
        config
    }

    #[test]
    fn test_run_then_predict_from_artifact() {
        let dir = tempdir().unwrap();
        write_inputs(dir.path());
        let pipeline = Pipeline::new(config(dir.path()));

        let submission = pipeline.run().unwrap();
        assert_eq!(submission.len(), 7);
        assert_eq!(submission.rows[0].id, "1_10");
        assert_eq!(submission.rows[6].id, "4_10");
        for row in &submission.rows {
            assert!((0.0..=1.0).contains(&row.scaled_prob_1w));
            assert!((0.0..=1.0).contains(&row.scaled_prob_2w));
            assert!(row.expected_qty_1w >= 0.0 && row.expected_qty_2w >= 0.0);
        }
        assert!(pipeline.config().artifact_path().exists());
        assert!(dir.path().join("models").join("training_summary.json").exists());

        let written = fs::read_to_string(dir.path().join("out").join("submission.csv")).unwrap();
        assert!(written.starts_with("ID,scaled_prob_1w,scaled_prob_2w,expected_qty_1w,expected_qty_2w"));

        // scoring from the persisted artifact reproduces the in-memory run
        let again = pipeline.predict().unwrap();
        assert_eq!(again, submission);
    }

    #[test]
    fn test_predict_without_artifact_fails_fast() {
        let dir = tempdir().unwrap();
        let pipeline = Pipeline::new(config(dir.path()));
        let err = pipeline.predict().unwrap_err();
        assert_eq!(err.stage, Stage::Load);
        assert!(matches!(err.error, ForecastError::ArtifactNotFound(_)));
    }

    #[test]
    fn test_missing_input_reports_load_stage() {
        let dir = tempdir().unwrap();
        let err = Pipeline::new(config(dir.path())).train().err().unwrap();
        assert_eq!(err.stage, Stage::Load);
        assert!(!dir.path().join("models").exists());
    }

    #[test]
    fn test_duplicate_panel_key_is_fatal() {
        let dir = tempdir().unwrap();
        write_inputs(dir.path());
        let mut train = fs::read_to_string(dir.path().join("Train.csv")).unwrap();
        train.push_str("1,10,2024-01-01,5\n");
        fs::write(dir.path().join("Train.csv"), train).unwrap();
        let err = Pipeline::new(config(dir.path())).run().unwrap_err();
        assert_eq!(err.stage, Stage::Features);
        assert!(matches!(err.error, ForecastError::DuplicateKey { .. }));
    }
}
