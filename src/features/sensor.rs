//! Sensor feature builder
//!
//! Ten physical-unit fields in canonical order. Missing values are imputed
//! with the consuming artifact's per-feature means, then standardized with
//! that artifact's own scaler.

use crate::artifact::ModelArtifact;
use crate::error::PipelineError;
use crate::features::FeatureSchema;
use crate::schema::{DatedRecord, SensorField, SensorRecord};
use crate::types::{FeatureVector, Modality};
use ndarray::{Array1, Array2};

/// Imputed, unscaled training matrix for the sensor modality
#[derive(Debug, Clone)]
pub struct SensorTrainingSet {
    pub x: Array2<f64>,
    pub y: Vec<bool>,
    pub groups: Vec<String>,
}

/// Sensor feature builder
pub struct SensorFeatureBuilder;

impl SensorFeatureBuilder {
    /// Raw values in canonical order, `None` where absent
    pub fn raw(record: &SensorRecord) -> Vec<Option<f64>> {
        SensorField::ALL.iter().map(|f| record.value(*f)).collect()
    }

    /// Build the model-ready vector for `record` against `artifact`
    pub fn build(record: &SensorRecord, artifact: &ModelArtifact) -> Result<FeatureVector, PipelineError> {
        if artifact.schema.modality != Modality::Sensor {
            return Err(PipelineError::SchemaMismatch(format!(
                "sensor record scored against a {} artifact",
                artifact.schema.modality
            )));
        }
        artifact.schema.ensure_current()?;
        record.validate()?;

        if record.present_count() == 0 {
            return Err(PipelineError::InsufficientData(format!(
                "sensor record for {} on {} has no readings",
                record.user_id, record.date
            )));
        }

        let means = artifact.scaler.mean();
        if means.len() != SensorField::ALL.len() {
            return Err(PipelineError::FeatureShapeMismatch(format!(
                "sensor artifact scaler has {} features, expected {}",
                means.len(),
                SensorField::ALL.len()
            )));
        }

        let imputed = Array1::from_iter(
            Self::raw(record)
                .into_iter()
                .zip(means)
                .map(|(v, mean)| v.unwrap_or(*mean)),
        );
        let scaled = artifact.scaler.transform_row(imputed.view())?;
        Ok(artifact.vector(scaled.to_vec()))
    }

    /// Labeled rows with at least one reading; the rest cannot train
    pub fn usable(records: &[SensorRecord]) -> Vec<&SensorRecord> {
        records
            .iter()
            .filter(|r| r.label().is_some() && r.present_count() > 0)
            .collect()
    }

    /// Per-column means over the usable rows of `records`
    pub fn imputation_means(records: &[SensorRecord]) -> Result<Vec<f64>, PipelineError> {
        let n_features = SensorField::ALL.len();
        let mut sums = vec![0.0; n_features];
        let mut counts = vec![0usize; n_features];
        for record in Self::usable(records) {
            for (j, v) in Self::raw(record).into_iter().enumerate() {
                if let Some(v) = v {
                    sums[j] += v;
                    counts[j] += 1;
                }
            }
        }

        SensorField::ALL
            .iter()
            .enumerate()
            .map(|(j, field)| match counts[j] {
                0 => Err(PipelineError::InsufficientData(format!(
                    "no training row carries {}",
                    field.as_str()
                ))),
                n => Ok(sums[j] / n as f64),
            })
            .collect()
    }

    /// Labeled rows with per-column mean imputation fitted on these same rows.
    ///
    /// Unlabeled rows and rows without any reading are skipped.
    pub fn training_set(records: &[SensorRecord]) -> Result<SensorTrainingSet, PipelineError> {
        let means = Self::imputation_means(records)?;
        Self::training_set_with_means(records, &means)
    }

    /// Usable rows of `records`, imputed with means fitted elsewhere
    pub fn training_set_with_means(
        records: &[SensorRecord],
        means: &[f64],
    ) -> Result<SensorTrainingSet, PipelineError> {
        let n_features = SensorField::ALL.len();
        if means.len() != n_features {
            return Err(PipelineError::FeatureShapeMismatch(format!(
                "{} imputation means for {} sensor features",
                means.len(),
                n_features
            )));
        }

        let usable = Self::usable(records);
        if usable.len() < records.len() {
            log::debug!(
                "skipping {} sensor rows without a label or readings",
                records.len() - usable.len()
            );
        }

        let mut x = Array2::zeros((usable.len(), n_features));
        let mut y = Vec::with_capacity(usable.len());
        let mut groups = Vec::with_capacity(usable.len());
        for (i, record) in usable.iter().enumerate() {
            for (j, v) in Self::raw(record).into_iter().enumerate() {
                x[[i, j]] = v.unwrap_or(means[j]);
            }
            y.push(record.label().unwrap_or(false));
            groups.push(record.user_id.clone());
        }

        Ok(SensorTrainingSet { x, y, groups })
    }

    pub fn schema() -> FeatureSchema {
        FeatureSchema::sensor()
    }
}
