//! Forecast encoding
//!
//! Turns prediction results into the wire payloads returned by the inference
//! trigger: probabilities in percent plus the ranked top features.

use crate::ensemble::FusedPrediction;
use crate::error::PipelineError;
use crate::types::{
    ForecastPayload, ForecastProducer, InferenceResponse, ModalityForecast, PredictionResult,
    TopFeature,
};
use crate::{PIPELINE_VERSION, PRODUCER_NAME};
use chrono::Utc;
use uuid::Uuid;

/// Current forecast payload version
pub const FORECAST_VERSION: &str = "1.0.0";

/// Number of features listed in `top_features`
pub const TOP_FEATURES: usize = 5;

fn percent(probability: f64) -> f64 {
    (probability * 100.0).clamp(0.0, 100.0)
}

fn top_features(result: &PredictionResult) -> Vec<TopFeature> {
    result
        .contributions
        .iter()
        .take(TOP_FEATURES)
        .map(|c| TopFeature {
            name: c.name.clone(),
            contribution: c.contribution,
        })
        .collect()
}

/// Encoder for forecast payloads
pub struct ForecastEncoder {
    instance_id: String,
}

impl Default for ForecastEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastEncoder {
    /// Create a new encoder with a unique instance ID
    pub fn new() -> Self {
        Self {
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an encoder with a specific instance ID
    pub fn with_instance_id(instance_id: String) -> Self {
        Self { instance_id }
    }

    /// Single-modality inference trigger response
    pub fn encode_prediction(&self, result: &PredictionResult) -> InferenceResponse {
        InferenceResponse {
            probability: percent(result.probability),
            top_features: top_features(result),
            model_source: result.model_source,
            trend_adjustment: result.trend_adjustment,
        }
    }

    /// Fused forecast with one section per contributing modality
    pub fn encode(
        &self,
        user_id: &str,
        fused: &FusedPrediction,
        results: &[&PredictionResult],
    ) -> ForecastPayload {
        let modalities = results
            .iter()
            .map(|r| ModalityForecast {
                modality: r.modality,
                probability: percent(r.probability),
                model_source: r.model_source,
                artifact_version: r.artifact_version.clone(),
                reasons: r.reasons.clone(),
                top_features: top_features(r),
                trend_adjustment: r.trend_adjustment,
            })
            .collect();

        ForecastPayload {
            forecast_version: FORECAST_VERSION.to_string(),
            producer: ForecastProducer {
                name: PRODUCER_NAME.to_string(),
                version: PIPELINE_VERSION.to_string(),
                instance_id: self.instance_id.clone(),
            },
            user_id: user_id.to_string(),
            computed_at_utc: Utc::now().to_rfc3339(),
            probability: fused.percentage,
            risk_level: fused.risk_level,
            risk_label: fused.risk_level.label().to_string(),
            recommendation: fused.recommendation.clone(),
            single_source: fused.single_source,
            reasons: fused.reasons.clone(),
            modalities,
        }
    }

    /// Encode to JSON string
    pub fn encode_to_json(
        &self,
        user_id: &str,
        fused: &FusedPrediction,
        results: &[&PredictionResult],
    ) -> Result<String, PipelineError> {
        let payload = self.encode(user_id, fused, results);
        Ok(serde_json::to_string_pretty(&payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::fuse;
    use crate::types::{FeatureContribution, Modality, ModelSource};
    use pretty_assertions::assert_eq;

    fn survey_result() -> PredictionResult {
        PredictionResult {
            modality: Modality::Survey,
            probability: 0.42,
            contributions: (0..7)
                .map(|i| FeatureContribution {
                    name: format!("f{}", i),
                    contribution: 1.0 / (i + 1) as f64,
                })
                .collect(),
            reasons: vec!["Stress".to_string(), "Lack of sleep".to_string()],
            model_source: ModelSource::User,
            artifact_version: Uuid::nil().to_string(),
            trend_adjustment: None,
        }
    }

    #[test]
    fn test_inference_response_in_percent() {
        let encoder = ForecastEncoder::new();
        let response = encoder.encode_prediction(&survey_result());
        assert!((response.probability - 42.0).abs() < 1e-9);
        assert_eq!(response.top_features.len(), TOP_FEATURES);
        assert_eq!(response.top_features[0].name, "f0");
        assert_eq!(response.model_source, ModelSource::User);
    }

    #[test]
    fn test_encode_to_json() {
        let encoder = ForecastEncoder::with_instance_id("test-instance".to_string());
        let result = survey_result();
        let fused = fuse(None, Some(&result)).unwrap();
        let json = encoder.encode_to_json("u1", &fused, &[&result]).unwrap();

        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["forecast_version"], FORECAST_VERSION);
        assert_eq!(value["producer"]["instance_id"], "test-instance");
        assert_eq!(value["user_id"], "u1");
        assert_eq!(value["risk_level"], "moderate");
        assert_eq!(value["single_source"], true);
        assert_eq!(value["modalities"][0]["modality"], "survey");
        assert_eq!(value["modalities"][0]["model_source"], "user");
        assert!(value["modalities"][0].get("trend_adjustment").is_none());
    }
}
