//! Feature engineering: panel windows, metadata encoding and targets.

pub mod calendar;
pub mod matrix;
pub mod metadata;
pub mod panel;
pub mod targets;
pub mod window;

pub use matrix::FeatureMatrix;
pub use metadata::{CategoryCodebook, CategoryColumn, EncodedFeatures, MetadataEncoder};
pub use panel::{PanelFeatureBuilder, PanelFeatures, NUMERIC_FEATURES};
pub use targets::{Horizon, TargetGenerator, Targets};
