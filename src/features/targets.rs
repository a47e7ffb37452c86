//! Forward-looking labels for the training rows.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::data::Observation;

/// Forecast distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Horizon {
    OneWeek,
    TwoWeek,
}

impl Horizon {
    pub const ALL: [Horizon; 2] = [Horizon::OneWeek, Horizon::TwoWeek];

    pub fn weeks(self) -> usize {
        match self {
            Horizon::OneWeek => 1,
            Horizon::TwoWeek => 2,
        }
    }

    /// Tweedie variance power of the quantity regressor; dispersion grows
    /// with the horizon.
    pub fn tweedie_power(self) -> f64 {
        match self {
            Horizon::OneWeek => 1.3,
            Horizon::TwoWeek => 1.6,
        }
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}w", self.weeks())
    }
}

/// Labels aligned with the training rows (input order).
#[derive(Debug, Clone, PartialEq)]
pub struct Targets {
    qty_1w: Vec<f64>,
    qty_2w: Vec<f64>,
    buy_1w: Vec<f64>,
    buy_2w: Vec<f64>,
}

impl Targets {
    pub fn len(&self) -> usize {
        self.qty_1w.len()
    }

    pub fn is_empty(&self) -> bool {
        self.qty_1w.is_empty()
    }

    pub fn qty(&self, horizon: Horizon) -> &[f64] {
        match horizon {
            Horizon::OneWeek => &self.qty_1w,
            Horizon::TwoWeek => &self.qty_2w,
        }
    }

    /// 1.0 where the pair buys within the horizon, else 0.0.
    pub fn buy(&self, horizon: Horizon) -> &[f64] {
        match horizon {
            Horizon::OneWeek => &self.buy_1w,
            Horizon::TwoWeek => &self.buy_2w,
        }
    }

    /// Rows with a purchase at `horizon`.
    pub fn positive_rows(&self, horizon: Horizon) -> Vec<usize> {
        self.buy(horizon)
            .iter()
            .enumerate()
            .filter(|(_, b)| **b > 0.0)
            .map(|(i, _)| i)
            .collect()
    }
}

pub struct TargetGenerator;

impl TargetGenerator {
    /// Quantity `k` rows ahead within each pair, 0 past the end of the series.
    pub fn generate(train: &[Observation]) -> Targets {
        info!("Generating training targets (1 week & 2 week)...");
        let mut order: Vec<usize> = (0..train.len()).collect();
        order.sort_by_key(|&i| {
            let o = &train[i];
            (o.customer_id, o.product_id, o.week_start.is_none(), o.week_start)
        });

        let mut qty_1w = vec![0.0; train.len()];
        let mut qty_2w = vec![0.0; train.len()];
        for pair in order.chunk_by(|&a, &b| {
            train[a].customer_id == train[b].customer_id && train[a].product_id == train[b].product_id
        }) {
            for (pos, &row) in pair.iter().enumerate() {
                qty_1w[row] = pair.get(pos + 1).map_or(0.0, |&next| train[next].qty);
                qty_2w[row] = pair.get(pos + 2).map_or(0.0, |&next| train[next].qty);
            }
        }

        let flag = |q: &Vec<f64>| -> Vec<f64> {
            q.iter().map(|&v| if v > 0.0 { 1.0 } else { 0.0 }).collect()
        };
        Targets {
            buy_1w: flag(&qty_1w),
            buy_2w: flag(&qty_2w),
            qty_1w,
            qty_2w,
        }
    }
}
