//! Leakage-free statistics over an ordered series.
//!
//! Each value at index `i` is derived from indices `< i` only.

use std::collections::VecDeque;

pub const ROLL_WINDOW: usize = 4;

/// History-derived statistics for one position of a series.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriorStats {
    pub lag1: Option<f64>,
    pub lag2: Option<f64>,
    /// Mean of the `ROLL_WINDOW` values before the current one.
    pub roll_mean: Option<f64>,
    /// Mean of every value before the current one.
    pub expanding_mean: Option<f64>,
    /// Positions elapsed since the last positive value, measured from the
    /// previous position.
    pub recency: Option<f64>,
}

/// One forward pass over `values`, O(n).
pub fn scan_prior(values: &[f64]) -> Vec<PriorStats> {
    let mut out = Vec::with_capacity(values.len());
    let mut window: VecDeque<f64> = VecDeque::with_capacity(ROLL_WINDOW);
    let mut sum = 0.0;
    let mut count = 0usize;
    let mut last_purchase: Option<usize> = None;

    for (i, &value) in values.iter().enumerate() {
        let roll_mean = if window.len() == ROLL_WINDOW {
            Some(window.iter().sum::<f64>() / ROLL_WINDOW as f64)
        } else {
            None
        };
        out.push(PriorStats {
            lag1: i.checked_sub(1).map(|j| values[j]),
            lag2: i.checked_sub(2).map(|j| values[j]),
            roll_mean,
            expanding_mean: (count > 0).then(|| sum / count as f64),
            recency: match (i.checked_sub(1), last_purchase) {
                (Some(prev), Some(last)) => Some((prev - last) as f64),
                _ => None,
            },
        });

        if window.len() == ROLL_WINDOW {
            window.pop_front();
        }
        window.push_back(value);
        sum += value;
        count += 1;
        if value > 0.0 {
            last_purchase = Some(i);
        }
    }
    out
}
