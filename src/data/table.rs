//! Column-typed in-memory tables read from CSV.
//!
//! Every column is inferred independently: integer if every non-empty cell
//! parses as `i64`, float if every non-empty cell parses as `f64`, text
//! otherwise. Empty cells, the usual NA tokens and non-finite floats are
//! missing values.

use std::path::Path;

use crate::error::{ForecastError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Int64(Vec<Option<i64>>),
    Int32(Vec<Option<i32>>),
    UInt32(Vec<Option<u32>>),
    Float64(Vec<Option<f64>>),
    Float32(Vec<Option<f32>>),
    Text(Vec<Option<String>>),
}

impl Column {
    /// Infers the narrowest of int / float / text that holds every cell.
    pub fn infer(cells: Vec<String>) -> Column {
        let present = || cells.iter().filter(|c| !is_na(c));

        if present().all(|c| c.trim().parse::<i64>().is_ok()) {
            return Column::Int64(cells.iter().map(|c| c.trim().parse::<i64>().ok()).collect());
        }
        if present().all(|c| parse_finite(c).is_some()) {
            return Column::Float64(cells.iter().map(|c| parse_finite(c)).collect());
        }
        Column::Text(
            cells
                .into_iter()
                .map(|c| if is_na(&c) { None } else { Some(c) })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Int64(v) => v.len(),
            Column::Int32(v) => v.len(),
            Column::UInt32(v) => v.len(),
            Column::Float64(v) => v.len(),
            Column::Float32(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Column::Int64(_) | Column::Int32(_) | Column::UInt32(_))
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Column::Text(_))
    }

    pub fn dtype(&self) -> &'static str {
        match self {
            Column::Int64(_) => "int64",
            Column::Int32(_) => "int32",
            Column::UInt32(_) => "uint32",
            Column::Float64(_) => "float64",
            Column::Float32(_) => "float32",
            Column::Text(_) => "text",
        }
    }

    /// Approximate payload size in bytes.
    pub fn byte_size(&self) -> usize {
        match self {
            Column::Int64(v) => v.len() * std::mem::size_of::<Option<i64>>(),
            Column::Int32(v) => v.len() * std::mem::size_of::<Option<i32>>(),
            Column::UInt32(v) => v.len() * std::mem::size_of::<Option<u32>>(),
            Column::Float64(v) => v.len() * std::mem::size_of::<Option<f64>>(),
            Column::Float32(v) => v.len() * std::mem::size_of::<Option<f32>>(),
            Column::Text(v) => v
                .iter()
                .map(|s| std::mem::size_of::<Option<String>>() + s.as_ref().map_or(0, |s| s.len()))
                .sum(),
        }
    }

    pub fn get_i64(&self, row: usize) -> Option<i64> {
        match self {
            Column::Int64(v) => v.get(row).copied().flatten(),
            Column::Int32(v) => v.get(row).copied().flatten().map(i64::from),
            Column::UInt32(v) => v.get(row).copied().flatten().map(i64::from),
            _ => None,
        }
    }

    pub fn get_f64(&self, row: usize) -> Option<f64> {
        match self {
            Column::Float64(v) => v.get(row).copied().flatten(),
            Column::Float32(v) => v.get(row).copied().flatten().map(f64::from),
            Column::Text(_) => None,
            _ => self.get_i64(row).map(|x| x as f64),
        }
    }

    /// Cell rendered as a string, `None` when missing.
    pub fn get_text(&self, row: usize) -> Option<String> {
        match self {
            Column::Text(v) => v.get(row).cloned().flatten(),
            Column::Float64(_) | Column::Float32(_) => self.get_f64(row).map(|x| x.to_string()),
            _ => self.get_i64(row).map(|x| x.to_string()),
        }
    }

    pub fn is_missing(&self, row: usize) -> bool {
        match self {
            Column::Text(v) => v.get(row).map_or(true, |c| c.is_none()),
            Column::Float64(_) | Column::Float32(_) => self.get_f64(row).is_none(),
            _ => self.get_i64(row).is_none(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawTable {
    name: String,
    headers: Vec<String>,
    columns: Vec<Column>,
    n_rows: usize,
}

impl RawTable {
    /// Builds a table from column-major string cells.
    pub fn from_columns(name: &str, headers: Vec<String>, cells: Vec<Vec<String>>) -> Self {
        let n_rows = cells.first().map_or(0, |c| c.len());
        let columns = cells.into_iter().map(Column::infer).collect();
        Self {
            name: name.to_string(),
            headers,
            columns,
            n_rows,
        }
    }

    pub fn read_csv(name: &str, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ForecastError::io(
                path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            ));
        }
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_path(path)?;
        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];

        for record in rdr.records() {
            let record = record?;
            for (j, col) in cells.iter_mut().enumerate() {
                col.push(record.get(j).unwrap_or("").to_string());
            }
        }
        Ok(Self::from_columns(name, headers, cells))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.headers
            .iter()
            .position(|h| h == name)
            .map(|idx| &self.columns[idx])
    }

    pub fn require(&self, name: &str) -> Result<&Column> {
        self.column(name)
            .ok_or_else(|| ForecastError::missing_column(&self.name, name))
    }

    pub fn columns_mut(&mut self) -> impl Iterator<Item = (&str, &mut Column)> {
        self.headers
            .iter()
            .map(|h| h.as_str())
            .zip(self.columns.iter_mut())
    }

    pub fn byte_size(&self) -> usize {
        self.columns.iter().map(Column::byte_size).sum()
    }
}

const NA_TOKENS: [&str; 4] = ["nan", "na", "null", "none"];

fn is_na(cell: &str) -> bool {
    let cell = cell.trim();
    cell.is_empty() || NA_TOKENS.iter().any(|t| cell.eq_ignore_ascii_case(t))
}

/// Non-finite floats (`inf`, `NaN`) count as missing.
fn parse_finite(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
