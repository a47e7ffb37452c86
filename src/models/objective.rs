//! Loss functions shared by both model families.

use serde::{Deserialize, Serialize};

const MAX_SCORE: f64 = 30.0;
const PROB_EPS: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Objective {
    /// Binary log-loss with a sigmoid link.
    Logistic,
    /// Tweedie deviance with a log link.
    Tweedie { power: f64 },
}

pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Objective {
    pub fn init_score(&self, y: &[f64]) -> f64 {
        let mean = if y.is_empty() {
            0.0
        } else {
            y.iter().sum::<f64>() / y.len() as f64
        };
        match self {
            Objective::Logistic => {
                let p = mean.clamp(PROB_EPS, 1.0 - PROB_EPS);
                (p / (1.0 - p)).ln()
            }
            Objective::Tweedie { .. } => mean.max(1e-9).ln(),
        }
    }

    /// First and second derivative of the loss w.r.t. the raw score.
    pub fn grad_hess(&self, y: f64, score: f64) -> (f64, f64) {
        match *self {
            Objective::Logistic => {
                let p = sigmoid(score);
                (p - y, (p * (1.0 - p)).max(1e-16))
            }
            Objective::Tweedie { power } => {
                let f = score.clamp(-MAX_SCORE, MAX_SCORE);
                let a = ((1.0 - power) * f).exp();
                let b = ((2.0 - power) * f).exp();
                let grad = -y * a + b;
                let hess = -y * (1.0 - power) * a + (2.0 - power) * b;
                (grad, hess.max(1e-16))
            }
        }
    }

    /// Raw score to output space (probability / expected quantity).
    pub fn transform(&self, score: f64) -> f64 {
        match self {
            Objective::Logistic => sigmoid(score),
            Objective::Tweedie { .. } => score.clamp(-MAX_SCORE, MAX_SCORE).exp(),
        }
    }

    pub fn loss(&self, y: f64, score: f64) -> f64 {
        match *self {
            Objective::Logistic => {
                let p = sigmoid(score).clamp(PROB_EPS, 1.0 - PROB_EPS);
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            }
            Objective::Tweedie { power } => {
                let f = score.clamp(-MAX_SCORE, MAX_SCORE);
                -y * ((1.0 - power) * f).exp() / (1.0 - power)
                    + ((2.0 - power) * f).exp() / (2.0 - power)
            }
        }
    }

    pub fn mean_loss(&self, y: &[f64], scores: &[f64]) -> f64 {
        if y.is_empty() {
            return 0.0;
        }
        y.iter()
            .zip(scores)
            .map(|(&t, &s)| self.loss(t, s))
            .sum::<f64>()
            / y.len() as f64
    }
}
