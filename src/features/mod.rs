//! Feature building
//!
//! Turns typed daily records into fixed-order numeric vectors. The canonical
//! name order for each modality is a versioned [`FeatureSchema`], recorded on
//! every artifact and checked again at prediction time.

mod sensor;
mod survey;

pub use sensor::{SensorFeatureBuilder, SensorTrainingSet};
pub use survey::{
    GenderEncoder, PooledSurveyData, SurveyEncoding, SurveyFeatureBuilder, SurveyTrainingSet,
};

use crate::error::PipelineError;
use crate::schema::{SensorField, Trigger};
use crate::types::{FeatureVector, Modality};
use serde::{Deserialize, Serialize};

/// Current sensor feature schema version
pub const SENSOR_SCHEMA_VERSION: &str = "sensor.v1";

/// Current survey feature schema version
pub const SURVEY_SCHEMA_VERSION: &str = "survey.v1";

/// Ordered, versioned feature names for one modality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub modality: Modality,
    pub version: String,
    pub names: Vec<String>,
}

impl FeatureSchema {
    /// The ten sensor fields in canonical order
    pub fn sensor() -> Self {
        Self {
            modality: Modality::Sensor,
            version: SENSOR_SCHEMA_VERSION.to_string(),
            names: SensorField::ALL
                .iter()
                .map(|f| f.as_str().to_string())
                .collect(),
        }
    }

    /// Triggers, demographics, then per-trigger user mean and std
    pub fn survey() -> Self {
        let mut names: Vec<String> = Trigger::ALL.iter().map(|t| t.as_str().to_string()).collect();
        names.push("age".to_string());
        names.push("gender_encoded".to_string());
        for trigger in Trigger::ALL {
            names.push(format!("user_{}_mean", trigger.as_str()));
            names.push(format!("user_{}_std", trigger.as_str()));
        }

        Self {
            modality: Modality::Survey,
            version: SURVEY_SCHEMA_VERSION.to_string(),
            names,
        }
    }

    pub fn for_modality(modality: Modality) -> Self {
        match modality {
            Modality::Sensor => Self::sensor(),
            Modality::Survey => Self::survey(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Fail unless this schema is the version the builders currently produce
    pub fn ensure_current(&self) -> Result<(), PipelineError> {
        let current = Self::for_modality(self.modality);
        if self.version != current.version {
            return Err(PipelineError::SchemaMismatch(format!(
                "{} artifact uses feature schema {}, builder produces {}",
                self.modality, self.version, current.version
            )));
        }
        Ok(())
    }

    /// Fail unless `vector` has exactly this schema's version, length and name order
    pub fn check(&self, vector: &FeatureVector) -> Result<(), PipelineError> {
        if vector.schema_version != self.version {
            return Err(PipelineError::SchemaMismatch(format!(
                "vector schema {} does not match artifact schema {}",
                vector.schema_version, self.version
            )));
        }
        if vector.values.len() != self.names.len() || vector.names.len() != self.names.len() {
            return Err(PipelineError::FeatureShapeMismatch(format!(
                "expected {} features, got {} values and {} names",
                self.names.len(),
                vector.values.len(),
                vector.names.len()
            )));
        }
        if let Some(pos) = vector.names.iter().zip(&self.names).position(|(a, b)| a != b) {
            return Err(PipelineError::FeatureShapeMismatch(format!(
                "feature {} is '{}', artifact expects '{}'",
                pos, vector.names[pos], self.names[pos]
            )));
        }
        Ok(())
    }

    /// Wrap values in a vector carrying this schema's names, tied to no artifact
    pub fn vector(&self, values: Vec<f64>) -> FeatureVector {
        FeatureVector {
            schema_version: self.version.clone(),
            names: self.names.clone(),
            values,
            artifact_version: None,
        }
    }
}
