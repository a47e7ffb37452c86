//! Loads and validates the train / test / customer / sku tables.

use chrono::NaiveDate;
use std::collections::HashSet;
use tracing::{info, warn};

use super::downcast::downcast_table;
use super::table::{Column, RawTable};
use super::{Observation, TestRow, CUSTOMER_ID, PRODUCT_ID, QTY, ROW_ID, WEEK_START};
use crate::config::PathsConfig;
use crate::error::{ForecastError, Result};

/// Everything the feature stage consumes.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub train: Vec<Observation>,
    pub test: Vec<TestRow>,
    pub train_table: RawTable,
    pub test_table: RawTable,
    pub customers: RawTable,
    pub skus: RawTable,
}

pub struct DataLoader<'a> {
    paths: &'a PathsConfig,
}

impl<'a> DataLoader<'a> {
    pub fn new(paths: &'a PathsConfig) -> Self {
        Self { paths }
    }

    pub fn load_all(&self) -> Result<Dataset> {
        info!("Loading Train data from {}", self.paths.train_data.display());
        let mut train_table = RawTable::read_csv("train", &self.paths.train_data)?;
        info!("Loading Test data from {}", self.paths.test_data.display());
        let mut test_table = RawTable::read_csv("test", &self.paths.test_data)?;
        info!("Loading Customer data from {}", self.paths.customer_data.display());
        let mut customers = RawTable::read_csv("customer", &self.paths.customer_data)?;
        info!("Loading SKU data from {}", self.paths.sku_data.display());
        let mut skus = RawTable::read_csv("sku", &self.paths.sku_data)?;

        for table in [&mut train_table, &mut test_table, &mut customers, &mut skus] {
            downcast_table(table);
        }

        Dataset::from_tables(train_table, test_table, customers, skus)
    }
}

impl Dataset {
    /// Validates the raw tables and extracts the typed panel rows.
    pub fn from_tables(
        train_table: RawTable,
        test_table: RawTable,
        customers: RawTable,
        skus: RawTable,
    ) -> Result<Self> {
        let train = extract_observations(&train_table)?;
        let test = extract_test_rows(&test_table)?;
        validate_metadata(&customers, CUSTOMER_ID)?;
        validate_metadata(&skus, PRODUCT_ID)?;

        info!(
            "Loaded {} train rows, {} test rows, {} customers, {} skus",
            train.len(),
            test.len(),
            customers.n_rows(),
            skus.n_rows()
        );
        Ok(Self {
            train,
            test,
            train_table,
            test_table,
            customers,
            skus,
        })
    }
}

/// Parses `YYYY-MM-DD`, optionally followed by a time part.
pub fn parse_week(raw: &str) -> Option<NaiveDate> {
    let head = raw.trim().split(|c| c == ' ' || c == 'T').next()?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

fn id_column<'t>(table: &'t RawTable, name: &str) -> Result<&'t Column> {
    let col = table.require(name)?;
    if !col.is_integer() {
        return Err(ForecastError::InvalidColumnType {
            table: table.name().to_string(),
            column: name.to_string(),
            expected: "integer",
        });
    }
    Ok(col)
}

fn required_id(table: &RawTable, col: &Column, name: &str, row: usize) -> Result<i64> {
    col.get_i64(row).ok_or_else(|| ForecastError::MissingValue {
        table: table.name().to_string(),
        column: name.to_string(),
        row,
    })
}

fn week_at(table: &RawTable, col: &Column, row: usize) -> Result<Option<NaiveDate>> {
    match col.get_text(row) {
        None => Ok(None),
        Some(raw) => parse_week(&raw).map(Some).ok_or_else(|| ForecastError::InvalidDate {
            table: table.name().to_string(),
            row,
            value: raw,
        }),
    }
}

pub fn extract_observations(table: &RawTable) -> Result<Vec<Observation>> {
    let customers = id_column(table, CUSTOMER_ID)?;
    let products = id_column(table, PRODUCT_ID)?;
    let weeks = table.require(WEEK_START)?;
    let qty = table.require(QTY)?;
    if !qty.is_numeric() {
        return Err(ForecastError::InvalidColumnType {
            table: table.name().to_string(),
            column: QTY.to_string(),
            expected: "numeric",
        });
    }

    (0..table.n_rows())
        .map(|row| {
            Ok(Observation {
                customer_id: required_id(table, customers, CUSTOMER_ID, row)?,
                product_id: required_id(table, products, PRODUCT_ID, row)?,
                week_start: week_at(table, weeks, row)?,
                qty: qty.get_f64(row).ok_or_else(|| ForecastError::MissingValue {
                    table: table.name().to_string(),
                    column: QTY.to_string(),
                    row,
                })?,
            })
        })
        .collect()
}

pub fn extract_test_rows(table: &RawTable) -> Result<Vec<TestRow>> {
    let ids = table.require(ROW_ID)?;
    let customers = id_column(table, CUSTOMER_ID)?;
    let products = id_column(table, PRODUCT_ID)?;
    let weeks = table.require(WEEK_START)?;

    (0..table.n_rows())
        .map(|row| {
            Ok(TestRow {
                id: ids.get_text(row).ok_or_else(|| ForecastError::MissingValue {
                    table: table.name().to_string(),
                    column: ROW_ID.to_string(),
                    row,
                })?,
                customer_id: required_id(table, customers, CUSTOMER_ID, row)?,
                product_id: required_id(table, products, PRODUCT_ID, row)?,
                week_start: week_at(table, weeks, row)?,
            })
        })
        .collect()
}

/// Metadata tables need an integer, fully populated key column.
pub fn validate_metadata(table: &RawTable, key: &str) -> Result<()> {
    let col = id_column(table, key)?;
    let mut seen = HashSet::with_capacity(table.n_rows());
    let mut duplicates = 0usize;
    for row in 0..table.n_rows() {
        let id = required_id(table, col, key, row)?;
        if !seen.insert(id) {
            duplicates += 1;
        }
    }
    if duplicates > 0 {
        warn!(
            "{}: {} duplicate {} values, the first occurrence wins",
            table.name(),
            duplicates,
            key
        );
    }
    Ok(())
}
