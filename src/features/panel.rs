//! Pair / customer / product / calendar features over the unioned panel.
//!
//! Train observations and test rows are merged into one panel so that test
//! rows see the full history. Test rows carry a placeholder quantity of 0
//! which only keeps the windows contiguous; it never becomes a label.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

use super::calendar;
use super::window::{scan_prior, PriorStats};
use crate::data::{Observation, TestRow};
use crate::error::{ForecastError, Result};

pub const NUMERIC_FEATURES: [&str; 12] = [
    "lag1",
    "lag2",
    "roll_mean_4",
    "cust_lag1",
    "cust_roll_4",
    "global_lag1",
    "global_roll_4",
    "pair_buy_rate",
    "pair_recency",
    "is_new_pair",
    "month",
    "week_of_year",
];

pub const N_NUMERIC: usize = NUMERIC_FEATURES.len();

/// Undefined entries stay `None` until the encoding stage fills them.
pub type RawFeatures = [Option<f64>; N_NUMERIC];

/// Dated weeks first in calendar order, undated rows last.
type WeekKey = (bool, Option<NaiveDate>);

fn week_key(week: Option<NaiveDate>) -> WeekKey {
    (week.is_none(), week)
}

#[derive(Debug, Clone, Copy)]
enum Origin {
    Train(usize),
    Test(usize),
}

#[derive(Debug, Clone)]
struct PanelRow {
    customer_id: i64,
    product_id: i64,
    week: Option<NaiveDate>,
    qty: f64,
    origin: Origin,
}

/// Feature rows aligned with the train and test inputs.
#[derive(Debug, Clone)]
pub struct PanelFeatures {
    pub train: Vec<RawFeatures>,
    pub test: Vec<RawFeatures>,
}

pub struct PanelFeatureBuilder;

impl PanelFeatureBuilder {
    pub fn build(train: &[Observation], test: &[TestRow]) -> Result<PanelFeatures> {
        info!("Creating base panel ({} train + {} test rows)...", train.len(), test.len());
        let panel = union_panel(train, test)?;

        let mut features: Vec<RawFeatures> = vec![[None; N_NUMERIC]; panel.len()];

        info!("Generating pair features (lags, rolling mean, recency)...");
        pair_features(&panel, &mut features);

        if !test.is_empty() {
            warn!(
                "{} test placeholder rows (qty=0) contribute to customer and product aggregates",
                test.len()
            );
        }

        info!("Generating customer momentum...");
        let customer = weekly_trend(&panel, |r| r.customer_id);
        info!("Generating global product trends...");
        let product = weekly_trend(&panel, |r| r.product_id);

        info!("Generating seasonality...");
        for (row, out) in panel.iter().zip(features.iter_mut()) {
            let key = week_key(row.week);
            if let Some(stats) = customer.get(&(row.customer_id, key)) {
                out[3] = stats.lag1;
                out[4] = stats.roll_mean;
            }
            if let Some(stats) = product.get(&(row.product_id, key)) {
                out[5] = stats.lag1;
                out[6] = stats.roll_mean;
            }
            out[10] = Some(f64::from(calendar::month(row.week)));
            out[11] = Some(f64::from(calendar::iso_week(row.week)));
        }

        let mut train_out = vec![[None; N_NUMERIC]; train.len()];
        let mut test_out = vec![[None; N_NUMERIC]; test.len()];
        for (row, values) in panel.iter().zip(features) {
            match row.origin {
                Origin::Train(i) => train_out[i] = values,
                Origin::Test(i) => test_out[i] = values,
            }
        }
        Ok(PanelFeatures {
            train: train_out,
            test: test_out,
        })
    }
}

fn union_panel(train: &[Observation], test: &[TestRow]) -> Result<Vec<PanelRow>> {
    let mut panel = Vec::with_capacity(train.len() + test.len());
    panel.extend(train.iter().enumerate().map(|(i, o)| PanelRow {
        customer_id: o.customer_id,
        product_id: o.product_id,
        week: o.week_start,
        qty: o.qty,
        origin: Origin::Train(i),
    }));
    panel.extend(test.iter().enumerate().map(|(i, t)| PanelRow {
        customer_id: t.customer_id,
        product_id: t.product_id,
        week: t.week_start,
        qty: 0.0,
        origin: Origin::Test(i),
    }));

    let mut seen = HashSet::with_capacity(panel.len());
    for row in &panel {
        if !seen.insert((row.customer_id, row.product_id, row.week)) {
            return Err(ForecastError::DuplicateKey {
                customer_id: row.customer_id,
                product_id: row.product_id,
                week: row.week.map_or_else(|| "<none>".to_string(), |d| d.to_string()),
            });
        }
    }
    Ok(panel)
}

fn pair_features(panel: &[PanelRow], features: &mut [RawFeatures]) {
    let mut order: Vec<usize> = (0..panel.len()).collect();
    order.sort_by_key(|&i| {
        let r = &panel[i];
        (r.customer_id, r.product_id, week_key(r.week))
    });

    for group in order.chunk_by(|&a, &b| {
        panel[a].customer_id == panel[b].customer_id && panel[a].product_id == panel[b].product_id
    }) {
        let values: Vec<f64> = group.iter().map(|&i| panel[i].qty).collect();
        for (&i, stats) in group.iter().zip(scan_prior(&values)) {
            let out = &mut features[i];
            out[0] = stats.lag1;
            out[1] = stats.lag2;
            out[2] = stats.roll_mean;
            out[7] = stats.expanding_mean;
            out[8] = stats.recency;
            out[9] = Some(if stats.lag1.is_none() { 1.0 } else { 0.0 });
        }
    }
}

/// Lag / rolling statistics of the weekly quantity totals per entity.
fn weekly_trend<F>(panel: &[PanelRow], entity: F) -> HashMap<(i64, WeekKey), PriorStats>
where
    F: Fn(&PanelRow) -> i64,
{
    let mut totals: BTreeMap<(i64, WeekKey), f64> = BTreeMap::new();
    for row in panel {
        *totals.entry((entity(row), week_key(row.week))).or_insert(0.0) += row.qty;
    }

    let entries: Vec<((i64, WeekKey), f64)> = totals.into_iter().collect();
    let mut out = HashMap::with_capacity(entries.len());
    for series in entries.chunk_by(|a, b| a.0 .0 == b.0 .0) {
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
        for ((key, _), stats) in series.iter().zip(scan_prior(&values)) {
            out.insert(*key, stats);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn week(n: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(2024, 1, 1).map(|d| d + chrono::Duration::weeks(i64::from(n) - 1))
    }

    fn obs(c: i64, p: i64, w: u32, qty: f64) -> Observation {
        Observation {
            customer_id: c,
            product_id: p,
            week_start: week(w),
            qty,
        }
    }

    fn test_row(id: &str, c: i64, p: i64, w: u32) -> TestRow {
        TestRow {
            id: id.to_string(),
            customer_id: c,
            product_id: p,
            week_start: week(w),
        }
    }

    #[test]
    fn test_worked_example_on_test_row() {
        let train = vec![obs(1, 10, 1, 3.0), obs(1, 10, 2, 5.0), obs(1, 10, 3, 0.0), obs(1, 10, 4, 7.0)];
        let test = vec![test_row("a", 1, 10, 5)];
        let f = PanelFeatureBuilder::build(&train, &test).unwrap();
        let row = f.test[0];
        assert_eq!(row[0], Some(7.0));
        assert_eq!(row[1], Some(0.0));
        assert_eq!(row[2], Some(3.75));
        assert_eq!(row[8], Some(0.0));
        assert_eq!(row[9], Some(0.0));
    }

    #[test]
    fn test_lag_is_independent_of_current_value() {
        let mut train = vec![obs(1, 10, 1, 2.0), obs(1, 10, 2, 4.0), obs(1, 10, 3, 6.0)];
        let a = PanelFeatureBuilder::build(&train, &[]).unwrap();
        train[2].qty = 600.0;
        let b = PanelFeatureBuilder::build(&train, &[]).unwrap();
        assert_eq!(a.train[2][0], Some(4.0));
        assert_eq!(a.train[2], b.train[2]);
    }

    #[test]
    fn test_unsorted_input_is_ordered_by_week() {
        let train = vec![obs(1, 10, 3, 6.0), obs(1, 10, 1, 2.0), obs(1, 10, 2, 4.0)];
        let f = PanelFeatureBuilder::build(&train, &[]).unwrap();
        assert_eq!(f.train[0][0], Some(4.0));
        assert_eq!(f.train[0][1], Some(2.0));
        assert_eq!(f.train[1][9], Some(1.0));
        assert_eq!(f.train[1][0], None);
    }

    #[test]
    fn test_customer_and_product_aggregates() {
        // customer 1 buys products 10 and 20; customer 2 buys product 10
        let train = vec![
            obs(1, 10, 1, 1.0),
            obs(1, 20, 1, 2.0),
            obs(2, 10, 1, 4.0),
            obs(1, 10, 2, 0.0),
            obs(2, 10, 2, 8.0),
        ];
        let f = PanelFeatureBuilder::build(&train, &[]).unwrap();
        // customer 1, week 2: previous weekly total is 1 + 2
        assert_eq!(f.train[3][3], Some(3.0));
        // product 10, week 2: previous weekly volume is 1 + 4
        assert_eq!(f.train[3][5], Some(5.0));
        assert_eq!(f.train[4][5], Some(5.0));
        assert_eq!(f.train[4][3], Some(4.0));
        assert_eq!(f.train[0][3], None);
    }

    #[test]
    fn test_builder_never_fills() {
        let train = vec![obs(1, 10, 1, 1.0)];
        let f = PanelFeatureBuilder::build(&train, &[]).unwrap();
        let row = f.train[0];
        assert!(row[..9].iter().all(Option::is_none));
        assert_eq!(row[9], Some(1.0));
        assert_eq!(row[10], Some(1.0));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let train = vec![obs(1, 10, 1, 1.0)];
        let test = vec![test_row("x", 1, 10, 1)];
        assert!(matches!(
            PanelFeatureBuilder::build(&train, &test),
            Err(ForecastError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_missing_week_defaults_calendar() {
        let mut o = obs(1, 10, 1, 1.0);
        o.week_start = None;
        let train = vec![obs(1, 10, 1, 2.0), o];
        let f = PanelFeatureBuilder::build(&train, &[]).unwrap();
        assert_eq!(f.train[1][10], Some(0.0));
        assert_eq!(f.train[1][11], Some(0.0));
        // undated row sorts after the dated one
        assert_eq!(f.train[1][0], Some(2.0));
    }
}
