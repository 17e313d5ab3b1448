//! Error types for the personalization pipeline

use thiserror::Error;

/// Errors that can occur while building features, training, or predicting
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Feature encoding error: {0}")]
    FeatureEncoding(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Value out of range: {field} = {value} (expected {min}..={max})")]
    ValueOutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Insufficient population data: {0}")]
    InsufficientPopulationData(String),

    #[error("Retrain error: {0}")]
    Retrain(String),

    #[error("No model available for modality {0}")]
    NoModelAvailable(String),

    #[error("Feature shape mismatch: {0}")]
    FeatureShapeMismatch(String),

    #[error("Modality mismatch: {0}")]
    ModalityMismatch(String),

    #[error("No prediction available: {0}")]
    NoPredictionAvailable(String),

    #[error("Model store error: {0}")]
    Storage(String),

    #[error("Failed to parse input: {0}")]
    Parse(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by callers to decide how to surface a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad or insufficient input for one user; recoverable locally
    Input,
    /// The pipeline has not been bootstrapped for a modality
    ModelUnavailable,
    /// A vector/artifact disagreement; a defect, never silently ignored
    Consistency,
    /// Persistence failure underneath the model store
    Storage,
}

impl PipelineError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::FeatureEncoding(_)
            | PipelineError::InsufficientData(_)
            | PipelineError::SchemaMismatch(_)
            | PipelineError::ValueOutOfRange { .. }
            | PipelineError::InsufficientPopulationData(_)
            | PipelineError::Retrain(_)
            | PipelineError::Parse(_)
            | PipelineError::Json(_) => ErrorKind::Input,
            PipelineError::NoModelAvailable(_) | PipelineError::NoPredictionAvailable(_) => {
                ErrorKind::ModelUnavailable
            }
            PipelineError::FeatureShapeMismatch(_) | PipelineError::ModalityMismatch(_) => {
                ErrorKind::Consistency
            }
            PipelineError::Storage(_) | PipelineError::Io(_) => ErrorKind::Storage,
        }
    }

    /// Stable machine-readable code for logs and wire responses
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::FeatureEncoding(_) => "FEATURE_ENCODING",
            PipelineError::InsufficientData(_) => "INSUFFICIENT_DATA",
            PipelineError::SchemaMismatch(_) => "SCHEMA_MISMATCH",
            PipelineError::ValueOutOfRange { .. } => "VALUE_OUT_OF_RANGE",
            PipelineError::InsufficientPopulationData(_) => "INSUFFICIENT_POPULATION_DATA",
            PipelineError::Retrain(_) => "RETRAIN_FAILED",
            PipelineError::NoModelAvailable(_) => "NO_MODEL_AVAILABLE",
            PipelineError::FeatureShapeMismatch(_) => "FEATURE_SHAPE_MISMATCH",
            PipelineError::ModalityMismatch(_) => "MODALITY_MISMATCH",
            PipelineError::NoPredictionAvailable(_) => "NO_PREDICTION_AVAILABLE",
            PipelineError::Storage(_) => "STORAGE_ERROR",
            PipelineError::Parse(_) => "PARSE_ERROR",
            PipelineError::Json(_) => "JSON_ERROR",
            PipelineError::Io(_) => "IO_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            PipelineError::Retrain("too few".to_string()).kind(),
            ErrorKind::Input
        );
        assert_eq!(
            PipelineError::NoModelAvailable("sensor".to_string()).kind(),
            ErrorKind::ModelUnavailable
        );
        assert_eq!(
            PipelineError::FeatureShapeMismatch("len".to_string()).kind(),
            ErrorKind::Consistency
        );
        assert_eq!(
            PipelineError::ModalityMismatch("sensor".to_string()).kind(),
            ErrorKind::Consistency
        );
    }

    #[test]
    fn test_out_of_range_message() {
        let err = PipelineError::ValueOutOfRange {
            field: "stress_level".to_string(),
            value: 120.0,
            min: 0.0,
            max: 100.0,
        };
        assert_eq!(err.code(), "VALUE_OUT_OF_RANGE");
        assert!(err.to_string().contains("stress_level = 120"));
    }
}
