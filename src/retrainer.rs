//! Per-user retraining
//!
//! Personalizes a modality for one user once their labeled history reaches
//! `min_user_samples`. The sensor path fits a fresh forest on the user's own
//! days. The survey path pools the base artifact's training rows with the
//! user's rows and refits the logistic model, reusing the base encoder tables.
//!
//! A finished artifact is committed whole through the [`ModelStore`]; nothing
//! is written when any step fails.

use crate::artifact::{ArtifactKey, ModelArtifact, ValidationMetrics};
use crate::config::{ForestParams, PipelineConfig};
use crate::error::{ErrorKind, PipelineError};
use crate::features::{FeatureSchema, SensorFeatureBuilder, SurveyFeatureBuilder};
use crate::model::validation::{has_both_classes, stratified_k_fold};
use crate::model::{CvReport, Split};
use crate::schema::{DailyRecord, DatedRecord, RecordAdapter, SensorRecord, UserProfile};
use crate::store::ModelStore;
use crate::trainer::{cross_validate_model, FittedModel};
use crate::types::Modality;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

/// Structured result of a retrain trigger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrainOutcome {
    pub success: bool,
    pub user_id: String,
    pub modality: Modality,
    pub message: String,
    /// Store key of the committed artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_key: Option<String>,
    /// Cross-validated accuracy of the committed artifact
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    /// Committed, but validated worse than the base model
    pub degraded: bool,
    pub n_samples: usize,
}

impl RetrainOutcome {
    fn committed(artifact: &ModelArtifact, user_id: &str) -> Self {
        let message = if artifact.degraded {
            "personalized model committed; validated below the base model".to_string()
        } else {
            "personalized model committed".to_string()
        };
        Self {
            success: true,
            user_id: user_id.to_string(),
            modality: artifact.modality(),
            message,
            model_key: Some(artifact.key.to_string()),
            accuracy: Some(artifact.metrics.cv_accuracy),
            degraded: artifact.degraded,
            n_samples: artifact.n_samples,
        }
    }

    fn declined(user_id: &str, modality: Modality, err: &PipelineError, n_samples: usize) -> Self {
        Self {
            success: false,
            user_id: user_id.to_string(),
            modality,
            message: err.to_string(),
            model_key: None,
            accuracy: None,
            degraded: false,
            n_samples,
        }
    }
}

/// Fits and commits personalized artifacts
pub struct Retrainer {
    config: PipelineConfig,
    store: Arc<dyn ModelStore>,
}

impl Retrainer {
    pub fn new(config: PipelineConfig, store: Arc<dyn ModelStore>) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Retrain trigger for sensor history; input problems become `success = false`
    pub fn retrain_sensor(
        &self,
        user_id: &str,
        history: &[SensorRecord],
    ) -> Result<RetrainOutcome, PipelineError> {
        let result = self.personalize_sensor(user_id, history);
        self.outcome(user_id, Modality::Sensor, history.len(), result)
    }

    /// Retrain trigger for survey history; input problems become `success = false`
    pub fn retrain_survey(
        &self,
        user_id: &str,
        history: &[DailyRecord],
        profile: &UserProfile,
    ) -> Result<RetrainOutcome, PipelineError> {
        let result = self.personalize_survey(user_id, history, profile);
        self.outcome(user_id, Modality::Survey, history.len(), result)
    }

    fn outcome(
        &self,
        user_id: &str,
        modality: Modality,
        n_records: usize,
        result: Result<Arc<ModelArtifact>, PipelineError>,
    ) -> Result<RetrainOutcome, PipelineError> {
        match result {
            Ok(artifact) => Ok(RetrainOutcome::committed(&artifact, user_id)),
            Err(e) if e.kind() == ErrorKind::Input => {
                log::info!("retrain declined for {} ({}): {}", user_id, modality, e);
                Ok(RetrainOutcome::declined(user_id, modality, &e, n_records))
            }
            Err(e) => {
                log::error!("retrain failed for {} ({}) [{}]: {}", user_id, modality, e.code(), e);
                Err(e)
            }
        }
    }

    /// Fit a forest and scaler on this user's own sensor days and commit it
    pub fn personalize_sensor(
        &self,
        user_id: &str,
        history: &[SensorRecord],
    ) -> Result<Arc<ModelArtifact>, PipelineError> {
        self.check_history(user_id, history)?;
        for record in history {
            record.validate()?;
        }
        RecordAdapter::ensure_unique_days(history)?;

        let set = SensorFeatureBuilder::training_set(history)?;
        if set.y.len() < self.config.min_user_samples {
            return Err(PipelineError::Retrain(format!(
                "{} needs at least {} sensor days with readings, got {}",
                user_id,
                self.config.min_user_samples,
                set.y.len()
            )));
        }

        let config = PipelineConfig {
            forest: ForestParams::for_user(set.y.len()),
            ..self.config.clone()
        };
        log::debug!(
            "{} sensor forest on {} days: {} trees, depth {}, split {}, leaf {}",
            user_id,
            set.y.len(),
            config.forest.n_trees,
            config.forest.max_depth,
            config.forest.min_samples_split,
            config.forest.min_samples_leaf
        );

        let model = FittedModel::fit(Modality::Sensor, &set.x, &set.y, &config)?;
        let folds = stratified_k_fold(&set.y, config.cv_folds, config.random_seed)?;
        let cv = cross_validate_model(Modality::Sensor, &set.x, &set.y, &folds, &config)?;

        let base_accuracy = self
            .store
            .load_base(Modality::Sensor)?
            .map(|b| b.metrics.cv_accuracy);
        let artifact = ModelArtifact {
            version: Uuid::new_v4(),
            key: ArtifactKey::user(user_id, Modality::Sensor),
            schema: FeatureSchema::sensor(),
            metrics: ValidationMetrics {
                cv_accuracy: cv.mean_accuracy,
                cv_fold_accuracies: cv.fold_accuracies.clone(),
                oob_accuracy: model.oob_accuracy(),
                holdout: None,
            },
            classifier: model.classifier,
            scaler: model.scaler,
            survey: None,
            pooled: None,
            n_samples: set.y.len(),
            n_users: 1,
            trained_at: Utc::now(),
            degraded: self.is_degraded(&cv, base_accuracy),
        };
        self.commit(artifact, base_accuracy)
    }

    /// Refit the survey model on pooled base rows plus this user's rows and commit it
    pub fn personalize_survey(
        &self,
        user_id: &str,
        history: &[DailyRecord],
        profile: &UserProfile,
    ) -> Result<Arc<ModelArtifact>, PipelineError> {
        self.check_history(user_id, history)?;
        for record in history {
            record.validate()?;
        }
        RecordAdapter::ensure_unique_days(history)?;

        let base = self
            .store
            .load_base(Modality::Survey)?
            .ok_or_else(|| PipelineError::NoModelAvailable(Modality::Survey.to_string()))?;
        let encoding = base.survey.clone().ok_or_else(|| {
            PipelineError::SchemaMismatch(format!("{} carries no encoder tables", base.key))
        })?;

        let mut records: Vec<DailyRecord> = Vec::new();
        let mut profiles = BTreeMap::new();
        match &base.pooled {
            Some(pooled) => {
                records.extend(pooled.records.iter().filter(|r| r.user_id != user_id).cloned());
                profiles.extend(
                    pooled
                        .profiles
                        .iter()
                        .filter(|(u, _)| u.as_str() != user_id)
                        .map(|(u, p)| (u.clone(), p.clone())),
                );
            }
            None => log::warn!("{} has no pooled rows; personalizing on user rows only", base.key),
        }
        records.extend(history.iter().cloned());
        profiles.insert(user_id.to_string(), profile.clone());

        let set = SurveyFeatureBuilder::training_set(&records, &profiles, &encoding)?;
        let model = FittedModel::fit(Modality::Survey, &set.x, &set.y, &self.config)?;

        // Folds are drawn over the user's rows; pooled rows always train
        let (user_rows, pool_rows): (Vec<usize>, Vec<usize>) =
            (0..set.y.len()).partition(|i| set.groups[*i] == user_id);
        let user_y: Vec<bool> = user_rows.iter().map(|i| set.y[*i]).collect();
        let folds: Vec<Split> = stratified_k_fold(&user_y, self.config.cv_folds, self.config.random_seed)?
            .into_iter()
            .map(|fold| Split {
                train: pool_rows
                    .iter()
                    .copied()
                    .chain(fold.train.iter().map(|i| user_rows[*i]))
                    .collect(),
                test: fold.test.iter().map(|i| user_rows[*i]).collect(),
            })
            .collect();
        let cv = cross_validate_model(Modality::Survey, &set.x, &set.y, &folds, &self.config)?;

        let base_accuracy = Some(base.metrics.cv_accuracy);
        let artifact = ModelArtifact {
            version: Uuid::new_v4(),
            key: ArtifactKey::user(user_id, Modality::Survey),
            schema: FeatureSchema::survey(),
            metrics: ValidationMetrics {
                cv_accuracy: cv.mean_accuracy,
                cv_fold_accuracies: cv.fold_accuracies.clone(),
                oob_accuracy: None,
                holdout: None,
            },
            classifier: model.classifier,
            scaler: model.scaler,
            survey: Some(encoding),
            pooled: None,
            n_samples: set.y.len(),
            n_users: set.groups.iter().collect::<BTreeSet<_>>().len(),
            trained_at: Utc::now(),
            degraded: self.is_degraded(&cv, base_accuracy),
        };
        self.commit(artifact, base_accuracy)
    }

    /// Reject histories that cannot personalize
    fn check_history<T: DatedRecord>(&self, user_id: &str, history: &[T]) -> Result<(), PipelineError> {
        if let Some(other) = history.iter().find(|r| r.user_id() != user_id) {
            return Err(PipelineError::Retrain(format!(
                "history for {} contains a record for {}",
                user_id,
                other.user_id()
            )));
        }
        if let Some(unlabeled) = history.iter().find(|r| r.label().is_none()) {
            return Err(PipelineError::Retrain(format!(
                "record for {} on {} is missing had_migraine",
                user_id,
                unlabeled.date()
            )));
        }
        if history.len() < self.config.min_user_samples {
            return Err(PipelineError::Retrain(format!(
                "{} needs at least {} labeled samples, got {}",
                user_id,
                self.config.min_user_samples,
                history.len()
            )));
        }
        let labels: Vec<bool> = history.iter().filter_map(|r| r.label()).collect();
        if !has_both_classes(&labels) {
            return Err(PipelineError::Retrain(format!(
                "{} needs both outcomes in their history to personalize",
                user_id
            )));
        }
        Ok(())
    }

    fn is_degraded(&self, cv: &CvReport, base_accuracy: Option<f64>) -> bool {
        base_accuracy
            .map(|base| cv.mean_accuracy + self.config.degradation_tolerance < base)
            .unwrap_or(false)
    }

    fn commit(
        &self,
        artifact: ModelArtifact,
        base_accuracy: Option<f64>,
    ) -> Result<Arc<ModelArtifact>, PipelineError> {
        if artifact.degraded {
            log::warn!(
                "{} validated at {:.3}, below base {:.3}; committing anyway",
                artifact.key,
                artifact.metrics.cv_accuracy,
                base_accuracy.unwrap_or(f64::NAN)
            );
        }
        let committed = self.store.commit_user(artifact)?;
        log::info!(
            "committed {} v{} on {} rows: cv_accuracy={:.3}",
            committed.key,
            committed.version,
            committed.n_samples,
            committed.metrics.cv_accuracy
        );
        Ok(committed)
    }
}
