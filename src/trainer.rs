//! Base trainer
//!
//! Fits the population model for each modality. Users, never rows, are split
//! between train and test so no user's days leak across the boundary. The
//! training side is cross-validated with user-grouped folds; the held-out
//! users provide hold-out accuracy, ROC-AUC and a confusion matrix.

use crate::artifact::{ArtifactKey, Classifier, ModelArtifact, ValidationMetrics};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::features::{
    FeatureSchema, PooledSurveyData, SensorFeatureBuilder, SurveyEncoding, SurveyFeatureBuilder,
};
use crate::model::validation::{
    cross_validate, group_k_fold, has_both_classes, stratified_group_split,
};
use crate::model::{ClassWeights, CvReport, HoldoutMetrics, LogisticRegression, RandomForest, Split};
use crate::scaler::StandardScaler;
use crate::schema::{DailyRecord, DatedRecord, RecordAdapter, SensorRecord, UserProfile};
use crate::types::Modality;
use chrono::Utc;
use ndarray::{Array2, Axis};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Scaler plus classifier, fitted together on one training matrix
#[derive(Debug, Clone)]
pub(crate) struct FittedModel {
    pub scaler: StandardScaler,
    pub classifier: Classifier,
}

impl FittedModel {
    /// Fit the modality's classifier with balanced class weights
    pub fn fit(
        modality: Modality,
        x: &Array2<f64>,
        y: &[bool],
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let scaler = StandardScaler::fit(x)?;
        let scaled = scaler.transform(x)?;
        let weights = ClassWeights::balanced(y)?;

        let classifier = match modality {
            Modality::Sensor => Classifier::Forest(RandomForest::fit(
                scaled.view(),
                y,
                &weights,
                &config.forest,
                config.random_seed,
            )?),
            Modality::Survey => Classifier::Logistic(LogisticRegression::fit(
                scaled.view(),
                y,
                &weights.sample_weights(y),
                &config.logistic,
            )?),
        };

        Ok(Self { scaler, classifier })
    }

    /// Probabilities for the unscaled rows of `x`
    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>, PipelineError> {
        let scaled = self.scaler.transform(x)?;
        Ok(scaled
            .rows()
            .into_iter()
            .map(|row| self.classifier.predict_proba(row))
            .collect())
    }

    pub fn oob_accuracy(&self) -> Option<f64> {
        match &self.classifier {
            Classifier::Forest(f) => f.oob_accuracy(),
            Classifier::Logistic(_) => None,
        }
    }
}

pub(crate) fn select_rows(x: &Array2<f64>, rows: &[usize]) -> Array2<f64> {
    x.select(Axis(0), rows)
}

pub(crate) fn select_labels(y: &[bool], rows: &[usize]) -> Vec<bool> {
    rows.iter().map(|i| y[*i]).collect()
}

/// Cross-validate by refitting on every fold
pub(crate) fn cross_validate_model(
    modality: Modality,
    x: &Array2<f64>,
    y: &[bool],
    folds: &[Split],
    config: &PipelineConfig,
) -> Result<CvReport, PipelineError> {
    cross_validate(y, folds, |train, test| {
        let model = FittedModel::fit(modality, &select_rows(x, train), &select_labels(y, train), config)?;
        model.predict(&select_rows(x, test))
    })
}

/// Population trainer for both modalities
pub struct BaseTrainer {
    config: PipelineConfig,
}

impl BaseTrainer {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn check_population(&self, modality: Modality, groups: &[String], y: &[bool]) -> Result<(), PipelineError> {
        let users: BTreeSet<&String> = groups.iter().collect();
        if users.len() < self.config.min_population_users || y.len() < self.config.min_population_rows {
            return Err(PipelineError::InsufficientPopulationData(format!(
                "{} training needs at least {} users and {} labeled rows, got {} users and {} rows",
                modality,
                self.config.min_population_users,
                self.config.min_population_rows,
                users.len(),
                y.len()
            )));
        }
        if !has_both_classes(y) {
            return Err(PipelineError::InsufficientPopulationData(format!(
                "{} training labels need both outcomes",
                modality
            )));
        }
        Ok(())
    }

    fn split(&self, groups: &[String], y: &[bool]) -> Result<Split, PipelineError> {
        let split = stratified_group_split(groups, y, self.config.test_fraction, self.config.random_seed)?;
        if !has_both_classes(&select_labels(y, &split.train)) {
            return Err(PipelineError::InsufficientPopulationData(
                "training users hold a single outcome".to_string(),
            ));
        }
        Ok(split)
    }

    /// Train the population random forest for the sensor modality
    pub fn train_sensor(&self, records: &[SensorRecord]) -> Result<ModelArtifact, PipelineError> {
        for record in records {
            record.validate()?;
        }
        RecordAdapter::ensure_unique_days(records)?;

        let usable = SensorFeatureBuilder::usable(records);
        let groups: Vec<String> = usable.iter().map(|r| r.user_id.clone()).collect();
        let y: Vec<bool> = usable.iter().map(|r| r.label().unwrap_or(false)).collect();
        self.check_population(Modality::Sensor, &groups, &y)?;

        let split = self.split(&groups, &y)?;
        let test_users: BTreeSet<&str> = split.test.iter().map(|i| groups[*i].as_str()).collect();
        let (test_records, train_records): (Vec<SensorRecord>, Vec<SensorRecord>) = records
            .iter()
            .cloned()
            .partition(|r| test_users.contains(r.user_id.as_str()));

        // Held-out users are imputed with training means, never their own
        let means = SensorFeatureBuilder::imputation_means(&train_records)?;
        let train = SensorFeatureBuilder::training_set_with_means(&train_records, &means)?;
        let model = FittedModel::fit(Modality::Sensor, &train.x, &train.y, &self.config)?;

        let folds = group_k_fold(&train.groups, &train.y, self.config.cv_folds, self.config.random_seed)?;
        let cv = cross_validate_model(Modality::Sensor, &train.x, &train.y, &folds, &self.config)?;

        let test = SensorFeatureBuilder::training_set_with_means(&test_records, &means)?;
        let holdout = HoldoutMetrics::evaluate(&test.y, &model.predict(&test.x)?);

        let artifact = ModelArtifact {
            version: Uuid::new_v4(),
            key: ArtifactKey::base(Modality::Sensor),
            schema: FeatureSchema::sensor(),
            metrics: ValidationMetrics {
                cv_accuracy: cv.mean_accuracy,
                cv_fold_accuracies: cv.fold_accuracies,
                oob_accuracy: model.oob_accuracy(),
                holdout: Some(holdout),
            },
            classifier: model.classifier,
            scaler: model.scaler,
            survey: None,
            pooled: None,
            n_samples: train.y.len(),
            n_users: train.groups.iter().collect::<BTreeSet<_>>().len(),
            trained_at: Utc::now(),
            degraded: false,
        };
        log_trained(&artifact);
        Ok(artifact)
    }

    /// Train the population logistic regression for the survey modality
    pub fn train_survey(
        &self,
        records: &[DailyRecord],
        profiles: &BTreeMap<String, UserProfile>,
    ) -> Result<ModelArtifact, PipelineError> {
        for record in records {
            record.validate()?;
        }
        RecordAdapter::ensure_unique_days(records)?;

        let labeled: Vec<&DailyRecord> = records.iter().filter(|r| r.label().is_some()).collect();
        let groups: Vec<String> = labeled.iter().map(|r| r.user_id.clone()).collect();
        let y: Vec<bool> = labeled.iter().map(|r| r.label().unwrap_or(false)).collect();
        self.check_population(Modality::Survey, &groups, &y)?;

        let split = self.split(&groups, &y)?;
        let test_users: BTreeSet<&str> = split.test.iter().map(|i| groups[*i].as_str()).collect();
        let (test_records, train_records): (Vec<DailyRecord>, Vec<DailyRecord>) = records
            .iter()
            .cloned()
            .partition(|r| test_users.contains(r.user_id.as_str()));

        let encoding = SurveyEncoding::fit(&train_records, profiles, &self.config)?;
        let train = SurveyFeatureBuilder::training_set(&train_records, profiles, &encoding)?;
        let model = FittedModel::fit(Modality::Survey, &train.x, &train.y, &self.config)?;

        let folds = group_k_fold(&train.groups, &train.y, self.config.cv_folds, self.config.random_seed)?;
        let cv = cross_validate_model(Modality::Survey, &train.x, &train.y, &folds, &self.config)?;

        let test = SurveyFeatureBuilder::training_set(&test_records, profiles, &encoding)?;
        let holdout = HoldoutMetrics::evaluate(&test.y, &model.predict(&test.x)?);

        let train_users: BTreeSet<&str> = train.groups.iter().map(|g| g.as_str()).collect();
        let pooled = PooledSurveyData {
            profiles: profiles
                .iter()
                .filter(|(user, _)| train_users.contains(user.as_str()))
                .map(|(user, profile)| (user.clone(), profile.clone()))
                .collect(),
            records: train_records,
        };

        let artifact = ModelArtifact {
            version: Uuid::new_v4(),
            key: ArtifactKey::base(Modality::Survey),
            schema: FeatureSchema::survey(),
            metrics: ValidationMetrics {
                cv_accuracy: cv.mean_accuracy,
                cv_fold_accuracies: cv.fold_accuracies,
                oob_accuracy: None,
                holdout: Some(holdout),
            },
            classifier: model.classifier,
            scaler: model.scaler,
            survey: Some(encoding),
            pooled: Some(pooled),
            n_samples: train.y.len(),
            n_users: train_users.len(),
            trained_at: Utc::now(),
            degraded: false,
        };
        log_trained(&artifact);
        Ok(artifact)
    }
}

fn log_trained(artifact: &ModelArtifact) {
    let holdout = artifact.metrics.holdout.as_ref();
    log::info!(
        "trained {} ({}) on {} rows from {} users: cv_accuracy={:.3} oob={} holdout_accuracy={} auc={}",
        artifact.key,
        artifact.classifier.kind(),
        artifact.n_samples,
        artifact.n_users,
        artifact.metrics.cv_accuracy,
        fmt_opt(artifact.metrics.oob_accuracy),
        fmt_opt(holdout.map(|h| h.accuracy)),
        fmt_opt(holdout.and_then(|h| h.roc_auc)),
    );
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.3}", v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SensorField;
    use crate::testing;
    use std::collections::HashSet;

    #[test]
    fn test_train_sensor_base() {
        let config = testing::fast_config();
        let records = testing::sensor_population(8, 20, 3);
        let artifact = BaseTrainer::new(config).train_sensor(&records).unwrap();

        assert!(artifact.check_consistency().is_ok());
        assert_eq!(artifact.key, ArtifactKey::base(Modality::Sensor));
        assert!(artifact.metrics.oob_accuracy.is_some());
        assert!(artifact.metrics.cv_accuracy > 0.6);
        let holdout = artifact.metrics.holdout.as_ref().unwrap();
        assert_eq!(holdout.n_samples + artifact.n_samples, records.len());
        assert!(artifact.n_users < 8);
    }

    #[test]
    fn test_train_survey_base_keeps_pool() {
        let config = testing::fast_config();
        let (records, profiles) = testing::survey_population(8, 20, 5);
        let artifact = BaseTrainer::new(config).train_survey(&records, &profiles).unwrap();

        assert!(artifact.check_consistency().is_ok());
        assert_eq!(artifact.schema.len(), 47);
        let pooled = artifact.pooled.as_ref().unwrap();
        let pooled_users: HashSet<&str> = pooled.records.iter().map(|r| r.user_id.as_str()).collect();
        assert_eq!(pooled_users.len(), artifact.n_users);
        assert!(pooled.profiles.keys().all(|u| pooled_users.contains(u.as_str())));
        assert!(artifact.metrics.holdout.is_some());
    }

    #[test]
    fn test_survey_learns_trigger_direction() {
        let config = testing::fast_config();
        let (records, profiles) = testing::survey_population(10, 20, 9);
        let artifact = BaseTrainer::new(config).train_survey(&records, &profiles).unwrap();
        let Classifier::Logistic(model) = &artifact.classifier else {
            panic!("survey base should be logistic");
        };
        // Stress and sleep deprivation drive the synthetic labels
        assert!(model.coefficients()[0] > 0.0);
        assert!(model.coefficients()[2] > 0.0);
    }

    #[test]
    fn test_too_few_users() {
        let config = testing::fast_config();
        let records = testing::sensor_population(2, 30, 1);
        assert!(matches!(
            BaseTrainer::new(config).train_sensor(&records),
            Err(PipelineError::InsufficientPopulationData(_))
        ));
    }

    #[test]
    fn test_too_few_rows() {
        let config = testing::fast_config();
        let (records, profiles) = testing::survey_population(5, 3, 1);
        assert!(matches!(
            BaseTrainer::new(config).train_survey(&records, &profiles),
            Err(PipelineError::InsufficientPopulationData(_))
        ));
    }

    #[test]
    fn test_sensor_imputation_uses_training_users_only() {
        let mut records = testing::sensor_population(8, 15, 3);
        for (i, record) in records.iter_mut().enumerate() {
            if i % 2 == 0 {
                record.heart_rate_bpm = None;
            }
        }
        let outlier = testing::user_id(7);
        for record in records.iter_mut().filter(|r| r.user_id == outlier) {
            record.heart_rate_bpm = record.heart_rate_bpm.map(|_| 180.0);
        }

        let trainer = BaseTrainer::new(testing::fast_config());
        let artifact = trainer.train_sensor(&records).unwrap();

        let groups: Vec<String> = records.iter().map(|r| r.user_id.clone()).collect();
        let y: Vec<bool> = records.iter().map(|r| r.had_migraine.unwrap_or(false)).collect();
        let split = trainer.split(&groups, &y).unwrap();
        let train_users: BTreeSet<&str> = split.train.iter().map(|i| groups[*i].as_str()).collect();
        let present: Vec<f64> = records
            .iter()
            .filter(|r| train_users.contains(r.user_id.as_str()))
            .filter_map(|r| r.heart_rate_bpm)
            .collect();
        let expected = present.iter().sum::<f64>() / present.len() as f64;

        // Imputed rows sit at the column mean, so the scaler mean equals it
        let heart_rate = SensorField::ALL
            .iter()
            .position(|f| *f == SensorField::HeartRateBpm)
            .unwrap();
        assert!((artifact.scaler.mean()[heart_rate] - expected).abs() < 1e-9);
    }
}
