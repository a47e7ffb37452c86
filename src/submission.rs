//! Submission CSV output.

use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::data::TestRow;
use crate::error::{ForecastError, Result};
use crate::models::Forecast;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionRow {
    #[serde(rename = "ID")]
    pub id: String,
    pub scaled_prob_1w: f64,
    pub scaled_prob_2w: f64,
    pub expected_qty_1w: f64,
    pub expected_qty_2w: f64,
}

/// One row per test row, in test input order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Submission {
    pub rows: Vec<SubmissionRow>,
}

impl Submission {
    pub fn assemble(test: &[TestRow], forecast: &Forecast) -> Result<Self> {
        if test.len() != forecast.len() {
            return Err(ForecastError::ShapeMismatch {
                expected: format!("{} test rows", test.len()),
                got: format!("{} predictions", forecast.len()),
            });
        }
        let (w1, w2) = (&forecast.one_week, &forecast.two_week);
        let rows = test
            .iter()
            .enumerate()
            .map(|(i, t)| SubmissionRow {
                id: t.id.clone(),
                scaled_prob_1w: w1.scaled_prob[i],
                scaled_prob_2w: w2.scaled_prob[i],
                expected_qty_1w: w1.expected_qty[i],
                expected_qty_2w: w2.expected_qty[i],
            })
            .collect();
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Writes to a temporary sibling first, then renames into place.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| ForecastError::io(parent, e))?;
        }
        let tmp = path.with_extension("csv.tmp");
        let mut writer = csv::Writer::from_path(&tmp)?;
        if self.rows.is_empty() {
            writer.write_record(["ID", "scaled_prob_1w", "scaled_prob_2w", "expected_qty_1w", "expected_qty_2w"])?;
        }
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer.flush().map_err(|e| ForecastError::io(&tmp, e))?;
        drop(writer);
        fs::rename(&tmp, path).map_err(|e| ForecastError::io(path, e))?;
        info!("📄 Submission saved to {} ({} rows)", path.display(), self.rows.len());
        Ok(())
    }
}
