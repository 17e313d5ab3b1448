//! Classifiers and validation
//!
//! A weighted random forest for the sensor modality, an L2 logistic regression
//! for the survey modality, and the user-aware splitting and metrics shared by
//! both trainers.

pub mod forest;
pub mod logistic;
pub mod validation;

pub use forest::RandomForest;
pub use logistic::LogisticRegression;
pub use validation::{
    ClassWeights, ConfusionMatrix, CvReport, HoldoutMetrics, Split,
};
