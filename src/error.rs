use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Table '{table}' is missing required column '{column}'")]
    MissingColumn { table: String, column: String },
    #[error("Column '{column}' in table '{table}' must be {expected}")]
    InvalidColumnType {
        table: String,
        column: String,
        expected: &'static str,
    },
    #[error("Unparseable date '{value}' in table '{table}' at row {row}")]
    InvalidDate {
        table: String,
        row: usize,
        value: String,
    },
    #[error("Missing value for '{column}' in table '{table}' at row {row}")]
    MissingValue {
        table: String,
        column: String,
        row: usize,
    },
    #[error("Duplicate panel key: customer {customer_id}, product {product_id}, week {week}")]
    DuplicateKey {
        customer_id: i64,
        product_id: i64,
        week: String,
    },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Model fitting failed: {0}")]
    Fit(String),
    #[error("No training rows for {0}")]
    EmptyTrainingSet(String),
    #[error("Training cancelled")]
    Cancelled,
    #[error("Model artifact not found at {0}")]
    ArtifactNotFound(PathBuf),
    #[error("Model artifact is corrupt: {0}")]
    ArtifactCorrupt(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl ForecastError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ForecastError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn missing_column(table: &str, column: &str) -> Self {
        ForecastError::MissingColumn {
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ForecastError>;

/// Pipeline step a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Features,
    Encode,
    Targets,
    Train,
    Persist,
    Predict,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Features => "features",
            Stage::Encode => "encode",
            Stage::Targets => "targets",
            Stage::Train => "train",
            Stage::Persist => "persist",
            Stage::Predict => "predict",
            Stage::Write => "write",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
#[error("pipeline failed at stage '{stage}': {error}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub error: ForecastError,
}

/// Tags a stage result with the step that produced it.
pub trait StageContext<T> {
    fn stage(self, stage: Stage) -> std::result::Result<T, PipelineError>;
}

impl<T> StageContext<T> for Result<T> {
    fn stage(self, stage: Stage) -> std::result::Result<T, PipelineError> {
        self.map_err(|error| PipelineError { stage, error })
    }
}
