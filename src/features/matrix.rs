use ndarray::{Array2, ArrayView1, Axis};

use crate::error::{ForecastError, Result};

/// Dense model input: numeric features followed by categorical codes.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    names: Vec<String>,
    categorical: Vec<usize>,
    values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn new(names: Vec<String>, categorical: Vec<usize>, values: Array2<f64>) -> Result<Self> {
        if names.len() != values.ncols() {
            return Err(ForecastError::ShapeMismatch {
                expected: format!("{} columns", names.len()),
                got: format!("{} columns", values.ncols()),
            });
        }
        if let Some(&bad) = categorical.iter().find(|&&j| j >= names.len()) {
            return Err(ForecastError::ShapeMismatch {
                expected: format!("categorical index < {}", names.len()),
                got: bad.to_string(),
            });
        }
        Ok(Self {
            names,
            categorical,
            values,
        })
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Column indices holding categorical codes.
    pub fn categorical_indices(&self) -> &[usize] {
        &self.categorical
    }

    pub fn is_categorical(&self, col: usize) -> bool {
        self.categorical.contains(&col)
    }

    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.values.row(i)
    }

    pub fn column(&self, j: usize) -> ArrayView1<'_, f64> {
        self.values.column(j)
    }

    pub fn select_rows(&self, rows: &[usize]) -> FeatureMatrix {
        Self {
            names: self.names.clone(),
            categorical: self.categorical.clone(),
            values: self.values.select(Axis(0), rows),
        }
    }
}
