//! Model artifacts
//!
//! A [`ModelArtifact`] bundles everything needed to score one modality: the
//! fitted classifier, its scaler, the feature schema it was trained on, encoder
//! tables, and validation metrics. Artifacts are immutable once built; a
//! retrain always produces a complete new artifact.

use crate::error::PipelineError;
use crate::features::{FeatureSchema, PooledSurveyData, SurveyEncoding};
use crate::model::{HoldoutMetrics, LogisticRegression, RandomForest};
use crate::scaler::StandardScaler;
use crate::types::{FeatureVector, Modality, ModelSource};
use chrono::{DateTime, Utc};
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable address of an artifact in a model store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub modality: Modality,
    /// `None` addresses the base artifact
    pub user_id: Option<String>,
}

impl ArtifactKey {
    pub fn base(modality: Modality) -> Self {
        Self {
            modality,
            user_id: None,
        }
    }

    pub fn user(user_id: impl Into<String>, modality: Modality) -> Self {
        Self {
            modality,
            user_id: Some(user_id.into()),
        }
    }

    pub fn is_base(&self) -> bool {
        self.user_id.is_none()
    }

    pub fn source(&self) -> ModelSource {
        if self.is_base() {
            ModelSource::Base
        } else {
            ModelSource::User
        }
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.user_id {
            Some(user) => write!(f, "user/{}/{}", user, self.modality),
            None => write!(f, "base/{}", self.modality),
        }
    }
}

/// Fitted classifier of either modality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Classifier {
    Forest(RandomForest),
    Logistic(LogisticRegression),
}

impl Classifier {
    pub fn predict_proba(&self, row: ArrayView1<f64>) -> f64 {
        match self {
            Classifier::Forest(f) => f.predict_proba(row),
            Classifier::Logistic(l) => l.predict_proba(row),
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Classifier::Forest(f) => f.n_features(),
            Classifier::Logistic(l) => l.n_features(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Classifier::Forest(_) => "random_forest",
            Classifier::Logistic(_) => "logistic_regression",
        }
    }
}

/// Validation results recorded with an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub cv_accuracy: f64,
    pub cv_fold_accuracies: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oob_accuracy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holdout: Option<HoldoutMetrics>,
}

/// A complete, self-consistent trained model for one modality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: Uuid,
    pub key: ArtifactKey,
    pub schema: FeatureSchema,
    pub classifier: Classifier,
    pub scaler: StandardScaler,
    /// Encoder tables and population fallbacks (survey only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub survey: Option<SurveyEncoding>,
    /// Pooled training data reused by survey personalization (survey base only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pooled: Option<PooledSurveyData>,
    pub metrics: ValidationMetrics,
    pub n_samples: usize,
    pub n_users: usize,
    pub trained_at: DateTime<Utc>,
    /// Personalized model validated worse than the base model
    #[serde(default)]
    pub degraded: bool,
}

impl ModelArtifact {
    pub fn modality(&self) -> Modality {
        self.key.modality
    }

    pub fn source(&self) -> ModelSource {
        self.key.source()
    }

    /// Fail unless schema, scaler and classifier agree on the feature count
    pub fn check_consistency(&self) -> Result<(), PipelineError> {
        if self.schema.modality != self.key.modality {
            return Err(PipelineError::SchemaMismatch(format!(
                "artifact {} carries a {} schema",
                self.key, self.schema.modality
            )));
        }
        let n = self.schema.len();
        if self.scaler.n_features() != n || self.classifier.n_features() != n {
            return Err(PipelineError::FeatureShapeMismatch(format!(
                "artifact {} has {} schema names, {} scaler columns, {} classifier inputs",
                self.key,
                n,
                self.scaler.n_features(),
                self.classifier.n_features()
            )));
        }
        if self.schema.modality == Modality::Survey && self.survey.is_none() {
            return Err(PipelineError::SchemaMismatch(format!(
                "survey artifact {} carries no encoder tables",
                self.key
            )));
        }
        Ok(())
    }

    /// Wrap values scaled by this artifact's scaler
    pub fn vector(&self, values: Vec<f64>) -> FeatureVector {
        FeatureVector {
            artifact_version: Some(self.version),
            ..self.schema.vector(values)
        }
    }

    /// Positive-class probability for a vector built against this artifact.
    ///
    /// A vector scaled by any other artifact, even one with the same schema,
    /// is a `FeatureShapeMismatch`.
    pub fn score(&self, vector: &FeatureVector) -> Result<f64, PipelineError> {
        self.schema.check(vector)?;
        if vector.artifact_version != Some(self.version) {
            return Err(PipelineError::FeatureShapeMismatch(format!(
                "vector scaled by {} scored against {} v{}",
                vector
                    .artifact_version
                    .map_or_else(|| "no artifact".to_string(), |v| format!("v{}", v)),
                self.key,
                self.version
            )));
        }
        let row = ArrayView1::from(vector.values.as_slice());
        Ok(self.classifier.predict_proba(row))
    }

    /// Undo this artifact's scaling on a model-ready vector
    pub fn unscale(&self, vector: &FeatureVector) -> Vec<f64> {
        vector
            .values
            .iter()
            .zip(self.scaler.mean().iter().zip(self.scaler.scale()))
            .map(|(v, (m, s))| v * s + m)
            .collect()
    }

    /// Load an artifact from JSON, checking internal consistency
    pub fn from_json(json: &str) -> Result<Self, PipelineError> {
        let artifact: ModelArtifact = serde_json::from_str(json)?;
        artifact.check_consistency()?;
        Ok(artifact)
    }

    /// Serialize the artifact to JSON
    pub fn to_json(&self) -> Result<String, PipelineError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Copy of this artifact re-addressed to `key` with a fresh version
    pub fn rekeyed(&self, key: ArtifactKey) -> Self {
        let mut artifact = self.clone();
        artifact.key = key;
        artifact.version = Uuid::new_v4();
        artifact
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_key_display() {
        assert_eq!(ArtifactKey::base(Modality::Sensor).to_string(), "base/sensor");
        assert_eq!(
            ArtifactKey::user("u7", Modality::Survey).to_string(),
            "user/u7/survey"
        );
        assert_eq!(ArtifactKey::user("u7", Modality::Survey).source(), ModelSource::User);
    }

    #[test]
    fn test_json_round_trip_keeps_schema() {
        let artifact = testing::survey_artifact();
        let restored = ModelArtifact::from_json(&artifact.to_json().unwrap()).unwrap();
        assert_eq!(restored.schema, artifact.schema);
        assert_eq!(restored.version, artifact.version);
        assert_eq!(restored.key, artifact.key);
    }

    #[test]
    fn test_inconsistent_artifact_rejected() {
        let mut artifact = testing::sensor_artifact();
        artifact.schema.names.pop();
        assert!(matches!(
            artifact.check_consistency(),
            Err(PipelineError::FeatureShapeMismatch(_))
        ));
    }

    #[test]
    fn test_vector_from_other_artifact_rejected() {
        let base = testing::sensor_artifact();
        let user = base.rekeyed(ArtifactKey::user("u", Modality::Sensor));
        let values = vec![0.0; base.schema.len()];

        assert!(base.score(&base.vector(values.clone())).is_ok());
        assert!(matches!(
            user.score(&base.vector(values.clone())),
            Err(PipelineError::FeatureShapeMismatch(_))
        ));
        assert!(matches!(
            base.score(&base.schema.vector(values)),
            Err(PipelineError::FeatureShapeMismatch(_))
        ));
    }

    #[test]
    fn test_unscale_inverts_scaling() {
        let artifact = testing::sensor_artifact();
        let values: Vec<f64> = artifact.scaler.mean().to_vec();
        let row = ndarray::Array1::from(values.clone());
        let scaled = artifact.scaler.transform_row(row.view()).unwrap();
        let vector = artifact.vector(scaled.to_vec());
        let raw = artifact.unscale(&vector);
        for (a, b) in raw.iter().zip(values) {
            assert!((a - b).abs() < 1e-9);
        }
    }
}
