//! Migraine Personalize - Per-user migraine risk models
//!
//! Turns daily sensor readings and self-reported trigger surveys into migraine
//! probabilities through a deterministic pipeline: typed records → feature
//! building → population training → per-user personalization → prediction →
//! sensor/survey fusion.
//!
//! ## Modules
//!
//! - **Features**: canonical, versioned feature vectors for both modalities
//! - **Training**: population base models and per-user retraining
//! - **Store**: base and personalized artifacts with atomic replace
//! - **Prediction**: base/user model selection, explanations and fusion

pub mod artifact;
pub mod baseline;
pub mod config;
pub mod encoder;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod model;
pub mod pipeline;
pub mod predictor;
pub mod retrainer;
pub mod scaler;
pub mod schema;
pub mod store;
pub mod trainer;
pub mod trend;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use artifact::{ArtifactKey, ModelArtifact};
pub use config::PipelineConfig;
pub use ensemble::{fuse, FusedPrediction};
pub use error::{ErrorKind, PipelineError};
pub use pipeline::{Forecast, ForecastProcessor};
pub use predictor::Predictor;
pub use retrainer::{RetrainOutcome, Retrainer};
pub use store::{FileModelStore, MemoryModelStore, ModelStore};
pub use trainer::BaseTrainer;

// Schema exports
pub use schema::{DailyRecord, RecordAdapter, SensorRecord, UserProfile, SCHEMA_VERSION};

/// Crate version embedded in all forecast payloads
pub const PIPELINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for forecast payloads
pub const PRODUCER_NAME: &str = "migraine-personalize";
