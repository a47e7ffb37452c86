//! Data ingestion: CSV tables, downcasting and typed panel rows.

pub mod downcast;
pub mod loader;
pub mod table;

use chrono::NaiveDate;

pub use loader::{DataLoader, Dataset};
pub use table::{Column, RawTable};

pub const CUSTOMER_ID: &str = "customer_id";
pub const PRODUCT_ID: &str = "product_unit_variant_id";
pub const WEEK_START: &str = "week_start";
pub const QTY: &str = "qty_this_week";
pub const ROW_ID: &str = "ID";

/// One weekly purchase record of a (customer, product) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub customer_id: i64,
    pub product_id: i64,
    pub week_start: Option<NaiveDate>,
    pub qty: f64,
}

/// A row to forecast; its quantity is unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRow {
    pub id: String,
    pub customer_id: i64,
    pub product_id: i64,
    pub week_start: Option<NaiveDate>,
}
