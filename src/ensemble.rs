//! Ensemble fusion of sensor and survey predictions

use crate::error::PipelineError;
use crate::types::{Modality, PredictionResult, RiskLevel};
use serde::{Deserialize, Serialize};

/// Fused probabilities are rounded to this many decimal places
const FUSION_DECIMALS: i32 = 9;

/// Combined forecast for one user and reporting period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedPrediction {
    /// Probability of a migraine, in [0, 1]
    pub probability: f64,
    /// The same probability in percent
    pub percentage: f64,
    /// Only one modality contributed
    pub single_source: bool,
    pub sources: Vec<Modality>,
    pub reasons: Vec<String>,
    pub risk_level: RiskLevel,
    pub recommendation: String,
}

fn check_slot(result: Option<&PredictionResult>, expected: Modality) -> Result<(), PipelineError> {
    match result {
        Some(r) if r.modality != expected => Err(PipelineError::ModalityMismatch(format!(
            "{} result passed as the {} prediction",
            r.modality, expected
        ))),
        _ => Ok(()),
    }
}

fn quantize(x: f64) -> f64 {
    let factor = 10f64.powi(FUSION_DECIMALS);
    (x * factor).round() / factor
}

/// Average the available modality results.
///
/// With both present, the fused probability is the unweighted mean and the
/// reasons are each modality's top reason. With one present, its probability
/// and top two reasons are used as-is. A result passed in the other
/// modality's slot is rejected.
pub fn fuse(
    sensor: Option<&PredictionResult>,
    survey: Option<&PredictionResult>,
) -> Result<FusedPrediction, PipelineError> {
    check_slot(sensor, Modality::Sensor)?;
    check_slot(survey, Modality::Survey)?;

    let (probability, reasons, sources) = match (sensor, survey) {
        (Some(a), Some(b)) => {
            let mut reasons: Vec<String> = Vec::with_capacity(2);
            for reason in [a.reasons.first(), b.reasons.first()].into_iter().flatten() {
                if !reasons.contains(reason) {
                    reasons.push(reason.clone());
                }
            }
            (
                (a.probability + b.probability) / 2.0,
                reasons,
                vec![a.modality, b.modality],
            )
        }
        (Some(only), None) | (None, Some(only)) => (
            only.probability,
            only.reasons.iter().take(2).cloned().collect(),
            vec![only.modality],
        ),
        (None, None) => {
            return Err(PipelineError::NoPredictionAvailable(
                "neither sensor nor survey data produced a prediction".to_string(),
            ))
        }
    };

    let probability = quantize(probability.clamp(0.0, 1.0));
    let percentage = quantize(probability * 100.0);
    let risk_level = RiskLevel::from_percentage(percentage);
    Ok(FusedPrediction {
        probability,
        percentage,
        single_source: sources.len() == 1,
        sources,
        reasons,
        risk_level,
        recommendation: risk_level.recommendation().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelSource;
    use pretty_assertions::assert_eq;

    fn result(modality: Modality, probability: f64, reasons: &[&str]) -> PredictionResult {
        PredictionResult {
            modality,
            probability,
            contributions: Vec::new(),
            reasons: reasons.iter().map(|r| r.to_string()).collect(),
            model_source: ModelSource::Base,
            artifact_version: "test".to_string(),
            trend_adjustment: None,
        }
    }

    #[test]
    fn test_average_is_exact() {
        let sensor = result(Modality::Sensor, 0.8, &["Insufficient sleep", "High stress level"]);
        let survey = result(Modality::Survey, 0.4, &["Stress", "Lack of sleep"]);
        let fused = fuse(Some(&sensor), Some(&survey)).unwrap();

        assert_eq!(fused.probability, 0.6);
        assert_eq!(fused.percentage, 60.0);
        assert!(!fused.single_source);
        assert_eq!(fused.reasons, vec!["Insufficient sleep", "Stress"]);
        assert_eq!(fused.risk_level, RiskLevel::High);
    }

    #[test]
    fn test_single_source_survey() {
        let survey = result(Modality::Survey, 0.4, &["Stress", "Lack of sleep", "Travel"]);
        let fused = fuse(None, Some(&survey)).unwrap();

        assert_eq!(fused.probability, 0.4);
        assert!(fused.single_source);
        assert_eq!(fused.sources, vec![Modality::Survey]);
        assert_eq!(fused.reasons, vec!["Stress", "Lack of sleep"]);
        assert_eq!(fused.risk_level, RiskLevel::Moderate);
    }

    #[test]
    fn test_nothing_to_fuse() {
        assert!(matches!(
            fuse(None, None),
            Err(PipelineError::NoPredictionAvailable(_))
        ));
    }

    #[test]
    fn test_shared_top_reason_listed_once() {
        let sensor = result(Modality::Sensor, 0.1, &["Stress"]);
        let survey = result(Modality::Survey, 0.2, &["Stress"]);
        let fused = fuse(Some(&sensor), Some(&survey)).unwrap();
        assert_eq!(fused.reasons, vec!["Stress"]);
        assert_eq!(fused.risk_level, RiskLevel::VeryLow);
    }

    #[test]
    fn test_swapped_modality_rejected() {
        let first = result(Modality::Sensor, 0.3, &["Stress"]);
        let second = result(Modality::Sensor, 0.9, &["Insufficient sleep"]);
        let err = fuse(Some(&first), Some(&second)).unwrap_err();
        assert!(matches!(err, PipelineError::ModalityMismatch(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Consistency);

        let survey = result(Modality::Survey, 0.5, &["Stress"]);
        assert!(matches!(
            fuse(Some(&survey), None),
            Err(PipelineError::ModalityMismatch(_))
        ));
    }
}
