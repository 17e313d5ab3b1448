//! Predictor
//!
//! Chooses the user's personalized artifact when one exists and the base
//! artifact otherwise, scores a model-ready vector, and explains the result.
//! The day-based entry points take one artifact snapshot and use it both to
//! build and to score, so a retrain committing mid-request can never mix two
//! artifacts in one prediction.

use crate::artifact::{Classifier, ModelArtifact};
use crate::config::PipelineConfig;
use crate::error::{ErrorKind, PipelineError};
use crate::features::{SensorFeatureBuilder, SurveyFeatureBuilder};
use crate::schema::{
    DailyRecord, DatedRecord, RecordAdapter, RiskDirection, SensorField, SensorRecord, Trigger, UserProfile,
};
use crate::store::ModelStore;
use crate::trend::TrendAnalysis;
use crate::types::{FeatureContribution, FeatureVector, Modality, ModelSource, PredictionResult};
use std::sync::Arc;

/// Number of reasons attached to a prediction
pub const TOP_REASONS: usize = 2;

pub struct Predictor {
    config: PipelineConfig,
    store: Arc<dyn ModelStore>,
}

impl Predictor {
    pub fn new(config: PipelineConfig, store: Arc<dyn ModelStore>) -> Self {
        Self { config, store }
    }

    /// The user's artifact if present, else the base artifact
    pub fn select(&self, user_id: &str, modality: Modality) -> Result<Arc<ModelArtifact>, PipelineError> {
        if let Some(artifact) = self.store.load_user(user_id, modality)? {
            log::debug!("{} {}: using {} v{}", user_id, modality, artifact.key, artifact.version);
            return Ok(artifact);
        }
        match self.store.load_base(modality)? {
            Some(artifact) => {
                log::debug!("{} {}: no user model, using {}", user_id, modality, artifact.key);
                Ok(artifact)
            }
            None => Err(PipelineError::NoModelAvailable(modality.to_string())),
        }
    }

    /// Score a vector built against the artifact `select` returns.
    ///
    /// A vector built against any other artifact fails with
    /// `FeatureShapeMismatch` instead of being scored.
    pub fn predict(
        &self,
        user_id: &str,
        modality: Modality,
        vector: &FeatureVector,
    ) -> Result<PredictionResult, PipelineError> {
        let artifact = self.select(user_id, modality)?;
        self.score(&artifact, vector)
    }

    /// Score `vector` with a specific artifact and explain the result
    pub fn score(
        &self,
        artifact: &ModelArtifact,
        vector: &FeatureVector,
    ) -> Result<PredictionResult, PipelineError> {
        let raw = artifact.score(vector).map_err(|e| {
            if e.kind() == ErrorKind::Consistency {
                log::error!("{} rejected vector [{}]: {}", artifact.key, e.code(), e);
            }
            e
        })?;

        let probability = match (artifact.modality(), artifact.source()) {
            (Modality::Sensor, ModelSource::User) => smooth(raw, self.config.probability_smoothing),
            _ => raw,
        };

        let contributions = explain(artifact, vector);
        let reasons = top_reasons(&contributions, TOP_REASONS);

        Ok(PredictionResult {
            modality: artifact.modality(),
            probability,
            contributions,
            reasons,
            model_source: artifact.source(),
            artifact_version: artifact.version.to_string(),
            trend_adjustment: None,
        })
    }

    /// Predict from the user's most recent sensor days; the latest day is scored
    pub fn predict_sensor_days(
        &self,
        user_id: &str,
        days: &[SensorRecord],
    ) -> Result<PredictionResult, PipelineError> {
        ensure_owned(user_id, days)?;
        RecordAdapter::ensure_unique_days(days)?;
        for day in days {
            day.validate()?;
        }
        let latest = days
            .iter()
            .max_by_key(|r| r.date)
            .ok_or_else(|| PipelineError::InsufficientData(format!("no sensor days for {}", user_id)))?;

        let artifact = self.select(user_id, Modality::Sensor)?;
        let vector = SensorFeatureBuilder::build(latest, &artifact)?;
        let mut result = self.score(&artifact, &vector)?;

        if self.config.trend_adjustment && days.len() > 1 {
            let trend = TrendAnalysis::analyze(days);
            result.probability = trend.apply(result.probability);
            result.trend_adjustment = Some(trend.total());
        }
        Ok(result)
    }

    /// Predict the latest survey day; earlier days are its history
    pub fn predict_survey_days(
        &self,
        user_id: &str,
        days: &[DailyRecord],
        profile: Option<&UserProfile>,
    ) -> Result<PredictionResult, PipelineError> {
        ensure_owned(user_id, days)?;
        RecordAdapter::ensure_unique_days(days)?;
        let latest = days
            .iter()
            .max_by_key(|r| r.date)
            .ok_or_else(|| PipelineError::InsufficientData(format!("no survey days for {}", user_id)))?;
        let history: Vec<DailyRecord> = days.iter().filter(|r| r.date < latest.date).cloned().collect();

        let artifact = self.select(user_id, Modality::Survey)?;
        let vector = SurveyFeatureBuilder::build(latest, &history, profile, &artifact)?;
        self.score(&artifact, &vector)
    }
}

fn ensure_owned<T: DatedRecord>(user_id: &str, days: &[T]) -> Result<(), PipelineError> {
    match days.iter().find(|r| r.user_id() != user_id) {
        Some(other) => Err(PipelineError::InsufficientData(format!(
            "records for {} include a day from {}",
            user_id,
            other.user_id()
        ))),
        None => Ok(()),
    }
}

/// Pull a probability toward 0.5 by `s` at each end
fn smooth(p: f64, s: f64) -> f64 {
    p * (1.0 - 2.0 * s) + s
}

/// Per-feature contributions, largest first.
///
/// Logistic models use |coefficient × scaled value|. Forests use the feature
/// importance boosted by how far the raw reading lies past its risk threshold.
pub fn explain(artifact: &ModelArtifact, vector: &FeatureVector) -> Vec<FeatureContribution> {
    let scores: Vec<f64> = match &artifact.classifier {
        Classifier::Logistic(model) => model
            .coefficients()
            .iter()
            .zip(&vector.values)
            .map(|(c, v)| (c * v).abs())
            .collect(),
        Classifier::Forest(model) => {
            let raw = artifact.unscale(vector);
            model
                .feature_importances()
                .iter()
                .zip(&vector.names)
                .zip(raw)
                .map(|((importance, name), value)| {
                    let deviation = SensorField::from_name(name)
                        .map(|field| threshold_deviation(field, value))
                        .unwrap_or(0.0);
                    importance * (1.0 + deviation)
                })
                .collect()
        }
    };

    let mut contributions: Vec<FeatureContribution> = vector
        .names
        .iter()
        .zip(scores)
        .map(|(name, contribution)| FeatureContribution {
            name: name.clone(),
            contribution,
        })
        .collect();
    contributions.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));
    contributions
}

/// Distance past the field's risk threshold; steps count per thousand
fn threshold_deviation(field: SensorField, value: f64) -> f64 {
    let (threshold, direction) = field.risk_threshold();
    let past = match direction {
        RiskDirection::Above => value - threshold,
        RiskDirection::Below => threshold - value,
    };
    let past = past.max(0.0);
    if field == SensorField::Steps {
        past / 1000.0
    } else {
        past
    }
}

/// User-facing label for a feature name
pub fn reason_label(name: &str) -> String {
    if let Some(field) = SensorField::from_name(name) {
        return field.label().to_string();
    }
    if let Some(trigger) = Trigger::from_name(name) {
        return trigger.label().to_string();
    }
    let aggregate = name
        .strip_prefix("user_")
        .and_then(|rest| rest.strip_suffix("_mean").or_else(|| rest.strip_suffix("_std")))
        .and_then(Trigger::from_name);
    if let Some(trigger) = aggregate {
        return trigger.label().to_string();
    }
    match name {
        "age" => "Age".to_string(),
        "gender_encoded" => "Gender".to_string(),
        other => other.to_string(),
    }
}

/// First `n` distinct labels among nonzero contributions
pub fn top_reasons(contributions: &[FeatureContribution], n: usize) -> Vec<String> {
    let mut reasons: Vec<String> = Vec::with_capacity(n);
    for c in contributions.iter().filter(|c| c.contribution > 0.0) {
        let label = reason_label(&c.name);
        if !reasons.contains(&label) {
            reasons.push(label);
        }
        if reasons.len() == n {
            break;
        }
    }
    reasons
}
