//! Model identities and the trained seed ensemble.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::hist_gbdt::HistGbdt;
use super::objective::Objective;
use super::ordered_boost::OrderedBoost;
use crate::error::Result;
use crate::features::{FeatureMatrix, Horizon};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Family {
    /// Histogram booster with native categorical splits.
    Hist,
    /// Ordered-target-statistics booster.
    Ordered,
}

impl Family {
    pub const ALL: [Family; 2] = [Family::Hist, Family::Ordered];
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::Hist => write!(f, "hist"),
            Family::Ordered => write!(f, "ordered"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Task {
    /// Purchase within the horizon, trained on every row.
    Classifier,
    /// Quantity, trained on positive rows only.
    Regressor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelSlot {
    pub task: Task,
    pub horizon: Horizon,
}

impl ModelSlot {
    pub const ALL: [ModelSlot; 4] = [
        ModelSlot { task: Task::Classifier, horizon: Horizon::OneWeek },
        ModelSlot { task: Task::Classifier, horizon: Horizon::TwoWeek },
        ModelSlot { task: Task::Regressor, horizon: Horizon::OneWeek },
        ModelSlot { task: Task::Regressor, horizon: Horizon::TwoWeek },
    ];

    pub fn objective(&self) -> Objective {
        match self.task {
            Task::Classifier => Objective::Logistic,
            Task::Regressor => Objective::Tweedie {
                power: self.horizon.tweedie_power(),
            },
        }
    }
}

impl fmt::Display for ModelSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.task {
            Task::Classifier => write!(f, "purchase_{}", self.horizon),
            Task::Regressor => write!(f, "qty_{}", self.horizon),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub family: Family,
    pub slot: ModelSlot,
}

impl ModelKey {
    pub fn all() -> impl Iterator<Item = ModelKey> {
        Family::ALL
            .into_iter()
            .flat_map(|family| ModelSlot::ALL.into_iter().map(move |slot| ModelKey { family, slot }))
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.slot)
    }
}

#[derive(Serialize, Deserialize)]
pub enum TrainedModel {
    Hist(HistGbdt),
    Ordered(OrderedBoost),
}

impl TrainedModel {
    pub fn predict(&self, x: &FeatureMatrix) -> Result<Vec<f64>> {
        match self {
            TrainedModel::Hist(m) => m.predict(x),
            TrainedModel::Ordered(m) => m.predict(x),
        }
    }
}

#[derive(Serialize, Deserialize)]
pub struct SeedModel {
    pub seed: u64,
    pub model: TrainedModel,
}

/// Every fitted model, grouped by key; each group is in ascending seed order.
#[derive(Default, Serialize, Deserialize)]
pub struct Ensemble {
    models: BTreeMap<ModelKey, Vec<SeedModel>>,
}

impl Ensemble {
    pub fn insert(&mut self, key: ModelKey, model: SeedModel) {
        self.models.entry(key).or_default().push(model);
    }

    pub fn get(&self, key: &ModelKey) -> Option<&[SeedModel]> {
        self.models.get(key).map(Vec::as_slice)
    }

    /// Total number of fitted models.
    pub fn len(&self) -> usize {
        self.models.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Seeds of one key, in the order they were trained.
    pub fn seeds(&self, key: &ModelKey) -> Vec<u64> {
        self.get(key)
            .map(|models| models.iter().map(|m| m.seed).collect())
            .unwrap_or_default()
    }
}
