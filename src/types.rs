//! Core types for the personalization pipeline
//!
//! This module defines the data structures that flow between stages: ordered
//! feature vectors, per-modality prediction results and their explanations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One of the two independent data sources feeding predictions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Sensor,
    Survey,
}

impl Modality {
    pub const ALL: [Modality; 2] = [Modality::Sensor, Modality::Survey];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Sensor => "sensor",
            Modality::Survey => "survey",
        }
    }

    pub fn from_name(name: &str) -> Option<Modality> {
        match name {
            "sensor" => Some(Modality::Sensor),
            "survey" => Some(Modality::Survey),
            _ => None,
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which artifact produced a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSource {
    Base,
    User,
}

impl ModelSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelSource::Base => "base",
            ModelSource::User => "user",
        }
    }
}

/// Ordered feature values plus the names and schema version that produced them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_version: String,
    pub names: Vec<String>,
    pub values: Vec<f64>,
    /// Version of the artifact whose scaler produced `values`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_version: Option<Uuid>,
}

impl FeatureVector {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Look up a value by feature name
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i).copied())
    }
}

/// A single feature's share of one prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub name: String,
    pub contribution: f64,
}

/// Positive-class probability from one modality, with its explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub modality: Modality,
    /// Probability of a migraine, in [0, 1]
    pub probability: f64,
    /// Contributions ranked from largest to smallest
    pub contributions: Vec<FeatureContribution>,
    /// Top user-facing reasons, already ranked and deduplicated
    pub reasons: Vec<String>,
    pub model_source: ModelSource,
    pub artifact_version: String,
    /// Trend adjustment applied on top of the model output, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend_adjustment: Option<f64>,
}

/// Fused risk band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    VeryLow,
    Low,
    Moderate,
    High,
    VeryHigh,
}

impl RiskLevel {
    /// Band a percentage in [0, 100]
    pub fn from_percentage(pct: f64) -> Self {
        if pct < 20.0 {
            RiskLevel::VeryLow
        } else if pct < 40.0 {
            RiskLevel::Low
        } else if pct < 60.0 {
            RiskLevel::Moderate
        } else if pct < 80.0 {
            RiskLevel::High
        } else {
            RiskLevel::VeryHigh
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RiskLevel::VeryLow => "Very Low",
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "High",
            RiskLevel::VeryHigh => "Very High",
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            RiskLevel::VeryLow => "Low risk of migraine. Keep monitoring how you feel.",
            RiskLevel::Low => "Slight risk. Keep up good sleep and hydration.",
            RiskLevel::Moderate => "Moderate risk. Avoid known triggers and get enough rest.",
            RiskLevel::High => "High risk. Consider preventive medication and avoid stressors.",
            RiskLevel::VeryHigh => "Very high risk. Take preventive measures and talk to your doctor.",
        }
    }
}

// ============================================================================
// Wire payloads
// ============================================================================

/// One feature in a wire payload's explanation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopFeature {
    pub name: String,
    pub contribution: f64,
}

/// Inference trigger response for a single modality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    /// Probability in percent, [0, 100]
    pub probability: f64,
    pub top_features: Vec<TopFeature>,
    pub model_source: ModelSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend_adjustment: Option<f64>,
}

/// Producer metadata stamped on every forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastProducer {
    pub name: String,
    pub version: String,
    pub instance_id: String,
}

/// Per-modality section of a forecast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityForecast {
    pub modality: Modality,
    pub probability: f64,
    pub model_source: ModelSource,
    pub artifact_version: String,
    pub reasons: Vec<String>,
    pub top_features: Vec<TopFeature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend_adjustment: Option<f64>,
}

/// Fused daily forecast payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPayload {
    pub forecast_version: String,
    pub producer: ForecastProducer,
    pub user_id: String,
    pub computed_at_utc: String,
    /// Fused probability in percent, [0, 100]
    pub probability: f64,
    pub risk_level: RiskLevel,
    pub risk_label: String,
    pub recommendation: String,
    pub single_source: bool,
    pub reasons: Vec<String>,
    pub modalities: Vec<ModalityForecast>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_bands() {
        assert_eq!(RiskLevel::from_percentage(0.0), RiskLevel::VeryLow);
        assert_eq!(RiskLevel::from_percentage(19.99), RiskLevel::VeryLow);
        assert_eq!(RiskLevel::from_percentage(20.0), RiskLevel::Low);
        assert_eq!(RiskLevel::from_percentage(59.9), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_percentage(60.0), RiskLevel::High);
        assert_eq!(RiskLevel::from_percentage(100.0), RiskLevel::VeryHigh);
    }

    #[test]
    fn test_feature_vector_lookup() {
        let v = FeatureVector {
            schema_version: "v1".to_string(),
            names: vec!["a".to_string(), "b".to_string()],
            values: vec![1.0, 2.0],
            artifact_version: None,
        };
        assert_eq!(v.get("b"), Some(2.0));
        assert_eq!(v.get("c"), None);
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn test_modality_serde() {
        let json = serde_json::to_string(&Modality::Survey).unwrap();
        assert_eq!(json, "\"survey\"");
        assert_eq!(Modality::from_name("sensor"), Some(Modality::Sensor));
    }
}
