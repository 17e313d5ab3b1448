//! Pipeline configuration
//!
//! Every tunable of the training and inference pipeline lives here as an
//! explicit value. Nothing relies on an implicit library default.

use crate::error::PipelineError;
use serde::{Deserialize, Serialize};

/// Minimum labeled samples before a user model is trained
pub const DEFAULT_MIN_USER_SAMPLES: usize = 10;

/// Number of most recent survey days considered at inference
pub const DEFAULT_SURVEY_WINDOW_DAYS: usize = 7;

/// Weight of the current day when blending with the previous day
pub const DEFAULT_CURRENT_DAY_WEIGHT: f64 = 0.6;

/// Weight of the previous day when blending with the current day
pub const DEFAULT_PREVIOUS_DAY_WEIGHT: f64 = 0.4;

/// Number of cross-validation folds
pub const DEFAULT_CV_FOLDS: usize = 5;

/// Seed for every random draw in training
pub const DEFAULT_RANDOM_SEED: u64 = 42;

/// How many candidate features each split considers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    /// `floor(sqrt(n_features))`, at least one
    Sqrt,
    /// All features
    All,
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        match self {
            MaxFeatures::Sqrt => ((n_features as f64).sqrt().floor() as usize).max(1),
            MaxFeatures::All => n_features.max(1),
        }
    }
}

/// Random forest hyperparameters (sensor modality)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    /// Smallest split gain, as a share of the tree's total sample weight
    pub min_impurity_decrease: f64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 8,
            min_samples_split: 15,
            min_samples_leaf: 5,
            max_features: MaxFeatures::Sqrt,
            min_impurity_decrease: 0.0,
        }
    }
}

/// Histories shorter than this get the shallow personal forest
pub const SMALL_USER_HISTORY: usize = 30;

impl ForestParams {
    /// Conservative forest for one user's `n_samples` days.
    ///
    /// Short histories get fewer, shallower trees whose split and leaf sizes
    /// grow with the history.
    pub fn for_user(n_samples: usize) -> Self {
        if n_samples < SMALL_USER_HISTORY {
            Self {
                n_trees: 50,
                max_depth: 3,
                min_samples_split: (n_samples / 3).max(5),
                min_samples_leaf: (n_samples / 6).max(2),
                max_features: MaxFeatures::Sqrt,
                min_impurity_decrease: 0.01,
            }
        } else {
            Self {
                n_trees: 100,
                max_depth: 5,
                min_samples_split: 10,
                min_samples_leaf: 4,
                max_features: MaxFeatures::Sqrt,
                min_impurity_decrease: 0.01,
            }
        }
    }
}

/// Logistic regression hyperparameters (survey modality)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogisticParams {
    /// Inverse L2 regularization strength
    pub c: f64,
    pub max_iter: usize,
    /// Convergence tolerance on the largest gradient component
    pub tol: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            c: 1.0,
            max_iter: 1000,
            tol: 1e-4,
        }
    }
}

/// Top-level configuration shared by the trainer, retrainer and predictor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub min_user_samples: usize,
    pub survey_window_days: usize,
    pub current_day_weight: f64,
    pub previous_day_weight: f64,
    pub min_population_users: usize,
    pub min_population_rows: usize,
    /// Share of users held out by the base trainer
    pub test_fraction: f64,
    pub cv_folds: usize,
    pub random_seed: u64,
    /// Accuracy drop below the base model that marks a user model as degraded
    pub degradation_tolerance: f64,
    /// Pull personalized sensor probabilities away from 0 and 1
    pub probability_smoothing: f64,
    /// Apply the multi-day sensor trend adjustment
    pub trend_adjustment: bool,
    pub forest: ForestParams,
    pub logistic: LogisticParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_user_samples: DEFAULT_MIN_USER_SAMPLES,
            survey_window_days: DEFAULT_SURVEY_WINDOW_DAYS,
            current_day_weight: DEFAULT_CURRENT_DAY_WEIGHT,
            previous_day_weight: DEFAULT_PREVIOUS_DAY_WEIGHT,
            min_population_users: 4,
            min_population_rows: 40,
            test_fraction: 0.2,
            cv_folds: DEFAULT_CV_FOLDS,
            random_seed: DEFAULT_RANDOM_SEED,
            degradation_tolerance: 0.02,
            probability_smoothing: 0.05,
            trend_adjustment: true,
            forest: ForestParams::default(),
            logistic: LogisticParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from JSON; absent keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to pretty JSON
    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the pipeline cannot work with
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |msg: &str| Err(PipelineError::Parse(format!("invalid config: {}", msg)));

        if self.min_user_samples < 2 {
            return invalid("min_user_samples must be at least 2");
        }
        if self.survey_window_days == 0 {
            return invalid("survey_window_days must be positive");
        }
        if (self.current_day_weight + self.previous_day_weight - 1.0).abs() > 1e-9 {
            return invalid("day weights must sum to 1");
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return invalid("test_fraction must be in (0, 1)");
        }
        if self.cv_folds < 2 {
            return invalid("cv_folds must be at least 2");
        }
        if !(0.0..0.5).contains(&self.probability_smoothing) {
            return invalid("probability_smoothing must be in [0, 0.5)");
        }
        if self.forest.n_trees == 0 || self.forest.max_depth == 0 {
            return invalid("forest needs at least one tree of depth one");
        }
        if self.forest.min_impurity_decrease.is_nan() || self.forest.min_impurity_decrease < 0.0 {
            return invalid("min_impurity_decrease must be non-negative");
        }
        if self.logistic.max_iter == 0 || self.logistic.c <= 0.0 {
            return invalid("logistic needs positive c and max_iter");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.min_user_samples, 10);
        assert_eq!(config.forest.n_trees, 100);
        assert_eq!(config.logistic.max_iter, 1000);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json(r#"{"cv_folds": 3, "forest": {"n_trees": 20}}"#)
            .unwrap();
        assert_eq!(config.cv_folds, 3);
        assert_eq!(config.forest.n_trees, 20);
        assert_eq!(config.forest.max_depth, 8);
        assert_eq!(config.survey_window_days, 7);
    }

    #[test]
    fn test_rejects_bad_weights() {
        let result = PipelineConfig::from_json(
            r#"{"current_day_weight": 0.7, "previous_day_weight": 0.4}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_user_forest_scales_with_history() {
        let small = ForestParams::for_user(12);
        assert_eq!(small.n_trees, 50);
        assert_eq!(small.max_depth, 3);
        assert_eq!(small.min_samples_split, 5);
        assert_eq!(small.min_samples_leaf, 2);

        let medium = ForestParams::for_user(27);
        assert_eq!(medium.min_samples_split, 9);
        assert_eq!(medium.min_samples_leaf, 4);

        let large = ForestParams::for_user(SMALL_USER_HISTORY);
        assert_eq!(large.max_depth, 5);
        assert_eq!(large.min_samples_split, 10);
        assert_eq!(large.min_impurity_decrease, 0.01);
    }

    #[test]
    fn test_max_features_resolution() {
        assert_eq!(MaxFeatures::Sqrt.resolve(10), 3);
        assert_eq!(MaxFeatures::Sqrt.resolve(1), 1);
        assert_eq!(MaxFeatures::All.resolve(47), 47);
    }
}
