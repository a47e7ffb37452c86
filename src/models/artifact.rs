//! On-disk model artifact.
//!
//! The artifact is a bincode envelope holding a SHA-256 checksum and the
//! encoded payload. It is written to a temporary sibling and renamed into
//! place, so a failed save never leaves a half-written file behind.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use super::ensemble::Ensemble;
use crate::error::{ForecastError, Result};
use crate::features::{CategoryCodebook, FeatureMatrix};

pub const ARTIFACT_FILE: &str = "hybrid_ensemble.bin";
pub const SUMMARY_FILE: &str = "training_summary.json";
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Envelope {
    checksum: String,
    payload: Vec<u8>,
}

/// Everything inference needs: feature layout, category codebook and the
/// fitted ensemble.
#[derive(Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub feature_names: Vec<String>,
    pub categorical_columns: Vec<String>,
    pub codebook: CategoryCodebook,
    pub seeds: Vec<u64>,
    pub ensemble: Ensemble,
}

fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

impl ModelArtifact {
    pub fn new(x: &FeatureMatrix, codebook: CategoryCodebook, seeds: Vec<u64>, ensemble: Ensemble) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            feature_names: x.names().to_vec(),
            categorical_columns: x
                .categorical_indices()
                .iter()
                .map(|&j| x.names()[j].clone())
                .collect(),
            codebook,
            seeds,
            ensemble,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ForecastError::io(parent, e))?;
        }
        let payload = bincode::serialize(self).map_err(|e| ForecastError::Serialization(e.to_string()))?;
        let envelope = Envelope {
            checksum: checksum(&payload),
            payload,
        };
        let bytes = bincode::serialize(&envelope).map_err(|e| ForecastError::Serialization(e.to_string()))?;

        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, &bytes).map_err(|e| ForecastError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| ForecastError::io(path, e))?;
        info!(
            "💾 Saved {} models to {} ({:.1} KB, sha256 {})",
            self.ensemble.len(),
            path.display(),
            bytes.len() as f64 / 1024.0,
            &envelope.checksum[..12]
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ForecastError::ArtifactNotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path).map_err(|e| ForecastError::io(path, e))?;
        let envelope: Envelope = bincode::deserialize(&bytes)
            .map_err(|e| ForecastError::ArtifactCorrupt(format!("unreadable envelope: {e}")))?;
        let actual = checksum(&envelope.payload);
        if actual != envelope.checksum {
            return Err(ForecastError::ArtifactCorrupt(format!(
                "checksum mismatch (stored {}, computed {})",
                envelope.checksum, actual
            )));
        }
        let artifact: ModelArtifact = bincode::deserialize(&envelope.payload)
            .map_err(|e| ForecastError::ArtifactCorrupt(format!("unreadable payload: {e}")))?;
        if artifact.format_version != FORMAT_VERSION {
            return Err(ForecastError::ArtifactCorrupt(format!(
                "format version {} (expected {})",
                artifact.format_version, FORMAT_VERSION
            )));
        }
        info!("📦 Loaded {} models from {}", artifact.ensemble.len(), path.display());
        Ok(artifact)
    }

    /// Checks that `x` has the layout the ensemble was trained on.
    pub fn check_layout(&self, x: &FeatureMatrix) -> Result<()> {
        let categorical: Vec<String> = x
            .categorical_indices()
            .iter()
            .map(|&j| x.names()[j].clone())
            .collect();
        if x.names() != self.feature_names.as_slice() || categorical != self.categorical_columns {
            return Err(ForecastError::ShapeMismatch {
                expected: self.feature_names.join(","),
                got: x.names().join(","),
            });
        }
        Ok(())
    }
}

/// Human-readable record of a training run, written next to the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub trained_at: String,
    pub train_rows: usize,
    /// Training rows seen by each slot, e.g. `qty_1w` counts positive rows.
    pub rows_per_slot: BTreeMap<String, usize>,
    pub feature_names: Vec<String>,
    pub categorical_columns: Vec<String>,
    pub seeds: Vec<u64>,
    pub models: usize,
    pub artifact: PathBuf,
}

impl TrainingSummary {
    pub fn write(&self, model_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(model_dir).map_err(|e| ForecastError::io(model_dir, e))?;
        let path = model_dir.join(SUMMARY_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| ForecastError::Serialization(e.to_string()))?;
        fs::write(&path, json).map_err(|e| ForecastError::io(&path, e))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use tempfile::tempdir;

    fn matrix(names: &[&str]) -> FeatureMatrix {
        FeatureMatrix::new(
            names.iter().map(|s| s.to_string()).collect(),
            vec![names.len() - 1],
            Array2::zeros((1, names.len())),
        )
        .unwrap()
    }

    fn artifact() -> ModelArtifact {
        ModelArtifact::new(&matrix(&["lag1", "region"]), CategoryCodebook::default(), vec![42], Ensemble::default())
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("models").join(ARTIFACT_FILE);
        artifact().save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded.feature_names, vec!["lag1", "region"]);
        assert_eq!(loaded.categorical_columns, vec!["region"]);
        assert_eq!(loaded.seeds, vec![42]);
        assert!(!path.with_extension("bin.tmp").exists());
    }

    #[test]
    fn test_missing_artifact() {
        let dir = tempdir().unwrap();
        let err = ModelArtifact::load(&dir.path().join(ARTIFACT_FILE)).err().unwrap();
        assert!(matches!(err, ForecastError::ArtifactNotFound(_)));
    }

    #[test]
    fn test_tampered_artifact_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(ARTIFACT_FILE);
        artifact().save(&path).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();
        let err = ModelArtifact::load(&path).err().unwrap();
        assert!(matches!(err, ForecastError::ArtifactCorrupt(_)));

        fs::write(&path, b"junk").unwrap();
        assert!(matches!(ModelArtifact::load(&path), Err(ForecastError::ArtifactCorrupt(_))));
    }

    #[test]
    fn test_layout_mismatch() {
        let a = artifact();
        assert!(a.check_layout(&matrix(&["lag1", "region"])).is_ok());
        let err = a.check_layout(&matrix(&["lag2", "region"])).err().unwrap();
        assert!(matches!(err, ForecastError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_summary_written_as_json() {
        let dir = tempdir().unwrap();
        let summary = TrainingSummary {
            trained_at: "2024-01-01T00:00:00Z".into(),
            train_rows: 10,
            rows_per_slot: BTreeMap::from([("purchase_1w".to_string(), 10), ("qty_1w".to_string(), 3)]),
            feature_names: vec!["lag1".into()],
            categorical_columns: vec![],
            seeds: vec![1, 2],
            models: 16,
            artifact: dir.path().join(ARTIFACT_FILE),
        };
        let path = summary.write(dir.path()).unwrap();
        let back: TrainingSummary = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(back, summary);
    }
}
