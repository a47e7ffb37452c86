//! Model families, ensemble training, inference and persistence.

pub mod artifact;
pub mod ensemble;
pub mod hist_gbdt;
pub mod objective;
pub mod ordered_boost;
pub mod predictor;
pub mod trainer;

pub use artifact::{ModelArtifact, TrainingSummary, ARTIFACT_FILE};
pub use ensemble::{Ensemble, Family, ModelKey, ModelSlot, SeedModel, Task, TrainedModel};
pub use predictor::{post_process, Forecast, HorizonForecast, Predictor};
pub use trainer::EnsembleTrainer;

use crate::error::{ForecastError, Result};

/// Categorical feature value to its integer code; anything non-positive is 0.
pub(crate) fn category_code(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value as u32
    } else {
        0
    }
}

/// Bounded rayon pool; `None` uses one thread per core.
pub(crate) fn worker_pool(workers: Option<usize>) -> Result<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("farmcast-{i}"));
    if let Some(n) = workers {
        builder = builder.num_threads(n);
    }
    builder.build().map_err(|e| ForecastError::WorkerPool(e.to_string()))
}
