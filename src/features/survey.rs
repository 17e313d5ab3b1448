//! Survey feature builder
//!
//! Each scored day becomes 47 values:
//! - 15 trigger flags, blended 0.6 / 0.4 with the previous recorded day
//! - age and label-encoded gender from the user profile
//! - per-trigger mean and std over the user's own prior window
//!
//! Training rows and inference vectors share this construction. Aggregates
//! only ever see days strictly before the scored day.

use crate::artifact::ModelArtifact;
use crate::baseline::{prior_window, TriggerBaseline, TriggerStats};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::schema::{DailyRecord, DatedRecord, RecordAdapter, Trigger, UserProfile};
use crate::types::{FeatureVector, Modality};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Fixed, versioned gender label mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenderEncoder {
    pub version: u32,
    classes: Vec<String>,
}

impl GenderEncoder {
    pub const VERSION: u32 = 1;

    /// Sorted distinct classes, compared case-insensitively
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let mut classes: Vec<String> = values.into_iter().map(normalize_gender).collect();
        classes.sort();
        classes.dedup();
        Self {
            version: Self::VERSION,
            classes,
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Code of a known class; unseen classes are an error, never coerced
    pub fn encode(&self, value: &str) -> Result<f64, PipelineError> {
        let needle = normalize_gender(value);
        self.classes
            .iter()
            .position(|c| *c == needle)
            .map(|i| i as f64)
            .ok_or_else(|| {
                PipelineError::FeatureEncoding(format!(
                    "gender '{}' is not in encoder v{} classes {:?}",
                    value, self.version, self.classes
                ))
            })
    }
}

fn normalize_gender(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Encoder tables and population fallbacks stored on survey artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyEncoding {
    pub gender: GenderEncoder,
    /// Code used when a profile has no gender
    pub modal_gender_code: f64,
    /// Age used when a profile has no age
    pub mean_age: f64,
    /// Trigger statistics used when a user has no prior history
    pub population: TriggerStats,
    pub window_days: usize,
    pub current_day_weight: f64,
    pub previous_day_weight: f64,
}

impl SurveyEncoding {
    /// Fit encoder tables. Gender classes come from every supplied profile;
    /// the fallbacks from the users appearing in `records`.
    pub fn fit(
        records: &[DailyRecord],
        profiles: &BTreeMap<String, UserProfile>,
        config: &PipelineConfig,
    ) -> Result<Self, PipelineError> {
        if records.is_empty() {
            return Err(PipelineError::InsufficientPopulationData(
                "no survey records to fit encoders on".to_string(),
            ));
        }

        let mut users: Vec<&str> = records.iter().map(|r| r.user_id.as_str()).collect();
        users.sort_unstable();
        users.dedup();
        let user_profiles: Vec<&UserProfile> =
            users.iter().filter_map(|u| profiles.get(*u)).collect();

        let gender = GenderEncoder::fit(profiles.values().filter_map(|p| p.gender.as_deref()));

        let mut code_counts: HashMap<usize, usize> = HashMap::new();
        for p in &user_profiles {
            if let Some(g) = p.gender.as_deref() {
                if let Ok(code) = gender.encode(g) {
                    *code_counts.entry(code as usize).or_default() += 1;
                }
            }
        }
        let modal_gender_code = code_counts
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
            .map(|(code, _)| code as f64)
            .unwrap_or(0.0);

        let ages: Vec<f64> = user_profiles.iter().filter_map(|p| p.age).collect();
        let mean_age = if ages.is_empty() {
            log::warn!("no profile carries an age; age feature will be constant");
            0.0
        } else {
            ages.iter().sum::<f64>() / ages.len() as f64
        };

        Ok(Self {
            gender,
            modal_gender_code,
            mean_age,
            population: TriggerStats::population(records),
            window_days: config.survey_window_days,
            current_day_weight: config.current_day_weight,
            previous_day_weight: config.previous_day_weight,
        })
    }

    fn demographics(&self, profile: Option<&UserProfile>) -> Result<(f64, f64), PipelineError> {
        let age = profile.and_then(|p| p.age).unwrap_or(self.mean_age);
        let gender = match profile.and_then(|p| p.gender.as_deref()) {
            Some(g) => self.gender.encode(g)?,
            None => self.modal_gender_code,
        };
        Ok((age, gender))
    }
}

/// Raw survey records and profiles a base artifact was trained on
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PooledSurveyData {
    pub records: Vec<DailyRecord>,
    pub profiles: BTreeMap<String, UserProfile>,
}

/// Unscaled training matrix for the survey modality
#[derive(Debug, Clone)]
pub struct SurveyTrainingSet {
    pub x: Array2<f64>,
    pub y: Vec<bool>,
    pub groups: Vec<String>,
}

/// Survey feature builder
pub struct SurveyFeatureBuilder;

impl SurveyFeatureBuilder {
    /// Unscaled feature values for `current`, given the user's record history
    pub fn raw_row(
        current: &DailyRecord,
        history: &[DailyRecord],
        profile: Option<&UserProfile>,
        encoding: &SurveyEncoding,
    ) -> Result<Vec<f64>, PipelineError> {
        let window = prior_window(history, current.date, encoding.window_days);
        let previous = window.last();

        let mut row = Vec::with_capacity(15 + 2 + 30);
        for trigger in Trigger::ALL {
            let today = current.flag_value(trigger);
            let value = match previous {
                Some(prev) => {
                    encoding.current_day_weight * today
                        + encoding.previous_day_weight * prev.flag_value(trigger)
                }
                None => today,
            };
            row.push(value);
        }

        let (age, gender) = encoding.demographics(profile)?;
        row.push(age);
        row.push(gender);

        let mut baseline = TriggerBaseline::new();
        for record in &window {
            baseline.push(record);
        }
        let stats = baseline.stats_or(&encoding.population);
        for i in 0..Trigger::ALL.len() {
            row.push(stats.means[i]);
            row.push(stats.stds[i]);
        }

        Ok(row)
    }

    /// Build the model-ready vector for `current` against `artifact`
    pub fn build(
        current: &DailyRecord,
        history: &[DailyRecord],
        profile: Option<&UserProfile>,
        artifact: &ModelArtifact,
    ) -> Result<FeatureVector, PipelineError> {
        if artifact.schema.modality != Modality::Survey {
            return Err(PipelineError::SchemaMismatch(format!(
                "survey record scored against a {} artifact",
                artifact.schema.modality
            )));
        }
        artifact.schema.ensure_current()?;
        let encoding = artifact.survey.as_ref().ok_or_else(|| {
            PipelineError::SchemaMismatch("survey artifact carries no encoder tables".to_string())
        })?;

        current.validate()?;
        if let Some(other) = history.iter().find(|r| r.user_id != current.user_id) {
            return Err(PipelineError::InsufficientData(format!(
                "history for {} contains a record for {}",
                current.user_id, other.user_id
            )));
        }
        RecordAdapter::ensure_unique_days(history)?;

        let raw = Self::raw_row(current, history, profile, encoding)?;
        let scaled = artifact.scaler.transform_row(Array1::from(raw).view())?;
        Ok(artifact.vector(scaled.to_vec()))
    }

    /// One row per labeled record; unlabeled records still count as history
    pub fn training_set(
        records: &[DailyRecord],
        profiles: &BTreeMap<String, UserProfile>,
        encoding: &SurveyEncoding,
    ) -> Result<SurveyTrainingSet, PipelineError> {
        let by_user = RecordAdapter::group_by_user(records);

        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut y = Vec::new();
        let mut groups = Vec::new();
        for (user_id, history) in &by_user {
            let profile = profiles.get(user_id);
            for record in history {
                let Some(label) = record.label() else {
                    continue;
                };
                rows.push(Self::raw_row(record, history, profile, encoding)?);
                y.push(label);
                groups.push(user_id.clone());
            }
        }

        let width = crate::features::FeatureSchema::survey().len();
        let mut x = Array2::zeros((rows.len(), width));
        for (i, row) in rows.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                x[[i, j]] = *v;
            }
        }

        Ok(SurveyTrainingSet { x, y, groups })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureSchema;
    use crate::testing;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
    }

    fn encoding() -> SurveyEncoding {
        let mut profiles = BTreeMap::new();
        profiles.insert("a".to_string(), UserProfile::new(30.0, "female"));
        profiles.insert("b".to_string(), UserProfile::new(40.0, "Male"));
        profiles.insert("c".to_string(), UserProfile::new(50.0, "female"));
        let records = vec![
            DailyRecord::new("a", day(1)).with(Trigger::Stress, true),
            DailyRecord::new("b", day(1)),
            DailyRecord::new("c", day(1)),
            DailyRecord::new("c", day(2)).with(Trigger::Stress, true),
        ];
        SurveyEncoding::fit(&records, &profiles, &PipelineConfig::default()).unwrap()
    }

    #[test]
    fn test_gender_encoder() {
        let enc = GenderEncoder::fit(["male", "Female", "female "]);
        assert_eq!(enc.classes(), &["female".to_string(), "male".to_string()]);
        assert_eq!(enc.encode("MALE").unwrap(), 1.0);
        assert!(matches!(
            enc.encode("other"),
            Err(PipelineError::FeatureEncoding(_))
        ));
    }

    #[test]
    fn test_encoding_population_defaults() {
        let enc = encoding();
        assert_eq!(enc.mean_age, 40.0);
        assert_eq!(enc.modal_gender_code, 0.0);
        assert_eq!(enc.population.means[0], 0.5);
    }

    #[test]
    fn test_blending_with_previous_day() {
        let enc = encoding();
        let history = vec![DailyRecord::new("u", day(1)).with(Trigger::Stress, true)];
        let current = DailyRecord::new("u", day(2))
            .with(Trigger::Fatigue, true)
            .with(Trigger::Stress, false);
        let row = SurveyFeatureBuilder::raw_row(&current, &history, None, &enc).unwrap();

        assert!((row[0] - 0.4).abs() < 1e-12);
        assert!((row[4] - 0.6).abs() < 1e-12);
        // Demographics imputed from the population
        assert_eq!(row[15], 40.0);
        assert_eq!(row[16], 0.0);
        // One prior day: mean 1, std 0
        assert_eq!(row[17], 1.0);
        assert_eq!(row[18], 0.0);
    }

    #[test]
    fn test_first_day_unweighted_with_population_stats() {
        let enc = encoding();
        let current = DailyRecord::new("u", day(5)).with(Trigger::Travel, true);
        let row = SurveyFeatureBuilder::raw_row(&current, &[], None, &enc).unwrap();
        assert_eq!(row[14], 1.0);
        assert_eq!(row[17], enc.population.means[0]);
        assert_eq!(row[18], enc.population.stds[0]);
    }

    #[test]
    fn test_future_records_do_not_leak() {
        let artifact = testing::survey_artifact();
        let profile = UserProfile::new(35.0, "female");
        let mut history: Vec<DailyRecord> = (1..=5)
            .map(|d| DailyRecord::new("u", day(d)).with(Trigger::Stress, d % 2 == 0))
            .collect();
        let current = DailyRecord::new("u", day(6)).with(Trigger::Fatigue, true);

        let before =
            SurveyFeatureBuilder::build(&current, &history, Some(&profile), &artifact).unwrap();
        for d in 7..=12 {
            history.push(
                DailyRecord::new("u", day(d))
                    .with(Trigger::Stress, true)
                    .with(Trigger::Travel, true)
                    .labeled(true),
            );
        }
        history.push(current.clone().with(Trigger::Menstrual, true));
        let history: Vec<DailyRecord> = history
            .into_iter()
            .filter(|r| r.date != current.date)
            .collect();
        let after =
            SurveyFeatureBuilder::build(&current, &history, Some(&profile), &artifact).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn test_unseen_gender_fails() {
        let artifact = testing::survey_artifact();
        let profile = UserProfile::new(35.0, "nonexistent-category");
        let current = DailyRecord::new("u", day(6));
        assert!(matches!(
            SurveyFeatureBuilder::build(&current, &[], Some(&profile), &artifact),
            Err(PipelineError::FeatureEncoding(_))
        ));
    }

    #[test]
    fn test_duplicate_history_days_rejected() {
        let artifact = testing::survey_artifact();
        let history = vec![DailyRecord::new("u", day(1)), DailyRecord::new("u", day(1))];
        let current = DailyRecord::new("u", day(2));
        assert!(matches!(
            SurveyFeatureBuilder::build(&current, &history, None, &artifact),
            Err(PipelineError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_training_rows_match_inference_construction() {
        let enc = encoding();
        let records = vec![
            DailyRecord::new("u", day(1)).with(Trigger::Stress, true).labeled(false),
            DailyRecord::new("u", day(2)).labeled(true),
            DailyRecord::new("u", day(3)).with(Trigger::Oversleep, true),
            DailyRecord::new("u", day(4)).with(Trigger::Stress, true).labeled(true),
        ];
        let set = SurveyFeatureBuilder::training_set(&records, &BTreeMap::new(), &enc).unwrap();
        assert_eq!(set.x.nrows(), 3);
        assert_eq!(set.x.ncols(), FeatureSchema::survey().len());

        let expected = SurveyFeatureBuilder::raw_row(&records[3], &records, None, &enc).unwrap();
        assert_eq!(set.x.row(2).to_vec(), expected);
        assert_eq!(set.y, vec![false, true, true]);
    }
}
