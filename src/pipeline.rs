//! Pipeline orchestration
//!
//! This module provides the public API of the crate: population training,
//! the retrain trigger, the inference trigger and the fused daily forecast,
//! all sharing one model store.

use crate::artifact::ModelArtifact;
use crate::config::PipelineConfig;
use crate::encoder::ForecastEncoder;
use crate::ensemble::{fuse, FusedPrediction};
use crate::error::{ErrorKind, PipelineError};
use crate::predictor::Predictor;
use crate::retrainer::{RetrainOutcome, Retrainer};
use crate::schema::{DailyRecord, SensorRecord, UserProfile};
use crate::store::{FileModelStore, MemoryModelStore, ModelStore};
use crate::trainer::BaseTrainer;
use crate::types::{ForecastPayload, InferenceResponse, Modality, PredictionResult};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Fused forecast plus the per-modality results it was built from
#[derive(Debug, Clone)]
pub struct Forecast {
    pub fused: FusedPrediction,
    pub sensor: Option<PredictionResult>,
    pub survey: Option<PredictionResult>,
}

/// Processor owning the trainer, retrainer and predictor over one store.
///
/// Every method takes `&self`; one processor can serve many users from
/// many threads.
pub struct ForecastProcessor {
    store: Arc<dyn ModelStore>,
    trainer: BaseTrainer,
    retrainer: Retrainer,
    predictor: Predictor,
    encoder: ForecastEncoder,
}

impl ForecastProcessor {
    /// Create a processor over an existing store
    pub fn new(config: PipelineConfig, store: Arc<dyn ModelStore>) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            trainer: BaseTrainer::new(config.clone()),
            retrainer: Retrainer::new(config.clone(), store.clone()),
            predictor: Predictor::new(config, store.clone()),
            encoder: ForecastEncoder::new(),
            store,
        })
    }

    /// Processor over a fresh in-memory store
    pub fn in_memory(config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::new(config, Arc::new(MemoryModelStore::new()))
    }

    /// Processor over a directory-backed store at `root`
    pub fn open(config: PipelineConfig, root: impl AsRef<Path>) -> Result<Self, PipelineError> {
        Self::new(config, Arc::new(FileModelStore::open(root)?))
    }

    pub fn store(&self) -> &Arc<dyn ModelStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        self.trainer.config()
    }

    /// Train and save the base sensor artifact
    pub fn train_base_sensor(&self, records: &[SensorRecord]) -> Result<Arc<ModelArtifact>, PipelineError> {
        let artifact = self.trainer.train_sensor(records)?;
        self.store.save_base(artifact)
    }

    /// Train and save the base survey artifact
    pub fn train_base_survey(
        &self,
        records: &[DailyRecord],
        profiles: &BTreeMap<String, UserProfile>,
    ) -> Result<Arc<ModelArtifact>, PipelineError> {
        let artifact = self.trainer.train_survey(records, profiles)?;
        self.store.save_base(artifact)
    }

    /// Retrain trigger for a user's sensor history
    pub fn retrain_sensor(
        &self,
        user_id: &str,
        history: &[SensorRecord],
    ) -> Result<RetrainOutcome, PipelineError> {
        self.retrainer.retrain_sensor(user_id, history)
    }

    /// Retrain trigger for a user's survey history
    pub fn retrain_survey(
        &self,
        user_id: &str,
        history: &[DailyRecord],
        profile: &UserProfile,
    ) -> Result<RetrainOutcome, PipelineError> {
        self.retrainer.retrain_survey(user_id, history, profile)
    }

    /// Inference trigger for recent sensor days
    pub fn predict_sensor(
        &self,
        user_id: &str,
        days: &[SensorRecord],
    ) -> Result<InferenceResponse, PipelineError> {
        let result = self.predictor.predict_sensor_days(user_id, days)?;
        Ok(self.encoder.encode_prediction(&result))
    }

    /// Inference trigger for recent survey days
    pub fn predict_survey(
        &self,
        user_id: &str,
        days: &[DailyRecord],
        profile: Option<&UserProfile>,
    ) -> Result<InferenceResponse, PipelineError> {
        let result = self.predictor.predict_survey_days(user_id, days, profile)?;
        Ok(self.encoder.encode_prediction(&result))
    }

    /// Predict both modalities and fuse them.
    ///
    /// A modality without days, or whose prediction fails on input or missing
    /// models, is left out. Consistency errors are returned, never skipped.
    pub fn forecast(
        &self,
        user_id: &str,
        sensor_days: &[SensorRecord],
        survey_days: &[DailyRecord],
        profile: Option<&UserProfile>,
    ) -> Result<Forecast, PipelineError> {
        let sensor = if sensor_days.is_empty() {
            None
        } else {
            tolerate(
                user_id,
                Modality::Sensor,
                self.predictor.predict_sensor_days(user_id, sensor_days),
            )?
        };
        let survey = if survey_days.is_empty() {
            None
        } else {
            tolerate(
                user_id,
                Modality::Survey,
                self.predictor.predict_survey_days(user_id, survey_days, profile),
            )?
        };

        let fused = fuse(sensor.as_ref(), survey.as_ref())?;
        Ok(Forecast {
            fused,
            sensor,
            survey,
        })
    }

    /// Fused forecast encoded as a wire payload
    pub fn forecast_payload(
        &self,
        user_id: &str,
        sensor_days: &[SensorRecord],
        survey_days: &[DailyRecord],
        profile: Option<&UserProfile>,
    ) -> Result<ForecastPayload, PipelineError> {
        let forecast = self.forecast(user_id, sensor_days, survey_days, profile)?;
        let results: Vec<&PredictionResult> =
            forecast.sensor.iter().chain(forecast.survey.iter()).collect();
        Ok(self.encoder.encode(user_id, &forecast.fused, &results))
    }

    /// Fused forecast as pretty JSON
    pub fn forecast_to_json(
        &self,
        user_id: &str,
        sensor_days: &[SensorRecord],
        survey_days: &[DailyRecord],
        profile: Option<&UserProfile>,
    ) -> Result<String, PipelineError> {
        let payload = self.forecast_payload(user_id, sensor_days, survey_days, profile)?;
        Ok(serde_json::to_string_pretty(&payload)?)
    }
}

/// Drop a failed modality unless the failure is a consistency defect
fn tolerate(
    user_id: &str,
    modality: Modality,
    result: Result<PredictionResult, PipelineError>,
) -> Result<Option<PredictionResult>, PipelineError> {
    match result {
        Ok(r) => Ok(Some(r)),
        Err(e) if e.kind() == ErrorKind::Consistency || e.kind() == ErrorKind::Storage => Err(e),
        Err(e) => {
            log::warn!("{} {} prediction unavailable [{}]: {}", user_id, modality, e.code(), e);
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{SensorFeatureBuilder, SurveyFeatureBuilder};
    use crate::schema::Trigger;
    use crate::testing::{self, day};
    use crate::types::ModelSource;
    use pretty_assertions::assert_eq;

    fn processor() -> ForecastProcessor {
        let processor = ForecastProcessor::in_memory(testing::fast_config()).unwrap();
        processor.store().save_base(testing::sensor_artifact()).unwrap();
        processor.store().save_base(testing::survey_artifact()).unwrap();
        processor
    }

    #[test]
    fn test_end_to_end_survey_personalization() {
        let processor = processor();
        let profile = UserProfile::new(29.0, "female");
        let migraine_days = [1u64, 3, 5, 8, 10];
        let history: Vec<DailyRecord> = (0..12u64)
            .map(|d| {
                let migraine = migraine_days.contains(&d);
                DailyRecord::new("e2e", day(d))
                    .with(Trigger::Stress, migraine)
                    .with(Trigger::SleepDeprivation, migraine)
                    .labeled(migraine)
            })
            .collect();
        assert_eq!(history.iter().filter(|r| r.had_migraine == Some(true)).count(), 5);

        let outcome = processor.retrain_survey("e2e", &history, &profile).unwrap();
        assert!(outcome.success, "{}", outcome.message);

        let mut days = history.clone();
        days.push(
            DailyRecord::new("e2e", day(12))
                .with(Trigger::Stress, true)
                .with(Trigger::SleepDeprivation, true),
        );
        let response = processor.predict_survey("e2e", &days, Some(&profile)).unwrap();
        assert_eq!(response.model_source, ModelSource::User);

        let base = processor.store().load_base(Modality::Survey).unwrap().unwrap();
        let quiet = DailyRecord::new("e2e", day(12));
        let quiet_vector = SurveyFeatureBuilder::build(&quiet, &[], Some(&profile), &base).unwrap();
        let base_quiet = base.score(&quiet_vector).unwrap() * 100.0;

        assert!(response.probability > base_quiet);
    }

    #[test]
    fn test_forecast_fuses_both_modalities() {
        let processor = processor();
        let sensor = testing::sensor_days("both", 3, 21);
        let survey = testing::survey_days("both", 5, 22);

        let forecast = processor.forecast("both", &sensor, &survey, None).unwrap();
        let expected = (forecast.sensor.as_ref().unwrap().probability
            + forecast.survey.as_ref().unwrap().probability)
            / 2.0;
        assert!(!forecast.fused.single_source);
        assert!((forecast.fused.probability - expected).abs() < 1e-9);
    }

    #[test]
    fn test_forecast_survives_missing_modality() {
        let processor = ForecastProcessor::in_memory(testing::fast_config()).unwrap();
        processor.store().save_base(testing::survey_artifact()).unwrap();
        let sensor = testing::sensor_days("half", 2, 1);
        let survey = testing::survey_days("half", 4, 2);

        // No sensor base: that modality drops out
        let forecast = processor.forecast("half", &sensor, &survey, None).unwrap();
        assert!(forecast.fused.single_source);
        assert!(forecast.sensor.is_none());

        let json = processor.forecast_to_json("half", &[], &survey, None).unwrap();
        assert!(json.contains("\"single_source\": true"));

        assert!(matches!(
            processor.forecast("half", &sensor, &[], None),
            Err(PipelineError::NoPredictionAvailable(_))
        ));
    }

    #[test]
    fn test_schema_order_survives_persistence() {
        let root = std::env::temp_dir().join(format!("migraine-pipeline-{}", uuid::Uuid::new_v4()));
        let record = testing::sensor_days("r", 1, 4).remove(0);
        let first = {
            let processor = ForecastProcessor::open(testing::fast_config(), &root).unwrap();
            let artifact = processor
                .train_base_sensor(&testing::sensor_population(6, 15, 13))
                .unwrap();
            let vector = SensorFeatureBuilder::build(&record, &artifact).unwrap();
            assert_eq!(vector.names, artifact.schema.names);
            vector
        };

        let reopened = ForecastProcessor::open(testing::fast_config(), &root).unwrap();
        let artifact = reopened.store().load_base(Modality::Sensor).unwrap().unwrap();
        let rebuilt = SensorFeatureBuilder::build(&record, &artifact).unwrap();
        assert_eq!(rebuilt.names, first.names);
        assert_eq!(rebuilt.schema_version, first.schema_version);
        for (a, b) in rebuilt.values.iter().zip(&first.values) {
            assert!((a - b).abs() < 1e-9);
        }
        let _ = std::fs::remove_dir_all(&root);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig {
            cv_folds: 1,
            ..testing::fast_config()
        };
        assert!(ForecastProcessor::in_memory(config).is_err());
    }
}
