//! Daily record schema
//!
//! Strongly-typed inbound records for both modalities. Every optional field is
//! explicit; unknown keys are rejected at deserialization so a renamed column
//! upstream surfaces as a schema mismatch instead of a silently ignored value.

use crate::error::PipelineError;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Current record schema version
pub const SCHEMA_VERSION: &str = "migraine.daily_record.v1";

/// Common accessors for per-user, per-day records
pub trait DatedRecord {
    fn user_id(&self) -> &str;
    fn date(&self) -> NaiveDate;
    /// The `had_migraine` label, if recorded
    fn label(&self) -> Option<bool>;
}

/// Self-reported survey triggers, in canonical feature order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Stress,
    Oversleep,
    SleepDeprivation,
    Exercise,
    Fatigue,
    Menstrual,
    EmotionalDistress,
    ExcessiveNoise,
    ExcessiveSmells,
    ExcessiveAlcohol,
    IrregularMeals,
    Overeating,
    ExcessiveCaffeine,
    ExcessiveSmoking,
    Travel,
}

impl Trigger {
    pub const ALL: [Trigger; 15] = [
        Trigger::Stress,
        Trigger::Oversleep,
        Trigger::SleepDeprivation,
        Trigger::Exercise,
        Trigger::Fatigue,
        Trigger::Menstrual,
        Trigger::EmotionalDistress,
        Trigger::ExcessiveNoise,
        Trigger::ExcessiveSmells,
        Trigger::ExcessiveAlcohol,
        Trigger::IrregularMeals,
        Trigger::Overeating,
        Trigger::ExcessiveCaffeine,
        Trigger::ExcessiveSmoking,
        Trigger::Travel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Stress => "stress",
            Trigger::Oversleep => "oversleep",
            Trigger::SleepDeprivation => "sleep_deprivation",
            Trigger::Exercise => "exercise",
            Trigger::Fatigue => "fatigue",
            Trigger::Menstrual => "menstrual",
            Trigger::EmotionalDistress => "emotional_distress",
            Trigger::ExcessiveNoise => "excessive_noise",
            Trigger::ExcessiveSmells => "excessive_smells",
            Trigger::ExcessiveAlcohol => "excessive_alcohol",
            Trigger::IrregularMeals => "irregular_meals",
            Trigger::Overeating => "overeating",
            Trigger::ExcessiveCaffeine => "excessive_caffeine",
            Trigger::ExcessiveSmoking => "excessive_smoking",
            Trigger::Travel => "travel",
        }
    }

    /// User-facing label for explanations
    pub fn label(&self) -> &'static str {
        match self {
            Trigger::Stress => "Stress",
            Trigger::Oversleep => "Oversleeping",
            Trigger::SleepDeprivation => "Lack of sleep",
            Trigger::Exercise => "Exercise",
            Trigger::Fatigue => "Fatigue",
            Trigger::Menstrual => "Menstrual cycle",
            Trigger::EmotionalDistress => "Emotional distress",
            Trigger::ExcessiveNoise => "Loud noise",
            Trigger::ExcessiveSmells => "Strong smells",
            Trigger::ExcessiveAlcohol => "Alcohol",
            Trigger::IrregularMeals => "Irregular meals",
            Trigger::Overeating => "Overeating",
            Trigger::ExcessiveCaffeine => "Caffeine",
            Trigger::ExcessiveSmoking => "Smoking",
            Trigger::Travel => "Travel",
        }
    }

    pub fn from_name(name: &str) -> Option<Trigger> {
        Trigger::ALL.iter().copied().find(|t| t.as_str() == name)
    }
}

/// One survey row per user per day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DailyRecord {
    pub user_id: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oversleep: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_deprivation: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exercise: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatigue: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menstrual: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotional_distress: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excessive_noise: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excessive_smells: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excessive_alcohol: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub irregular_meals: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overeating: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excessive_caffeine: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excessive_smoking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travel: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub had_migraine: Option<bool>,
}

impl DailyRecord {
    /// Create a record with every trigger absent and no label
    pub fn new(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            date,
            stress: None,
            oversleep: None,
            sleep_deprivation: None,
            exercise: None,
            fatigue: None,
            menstrual: None,
            emotional_distress: None,
            excessive_noise: None,
            excessive_smells: None,
            excessive_alcohol: None,
            irregular_meals: None,
            overeating: None,
            excessive_caffeine: None,
            excessive_smoking: None,
            travel: None,
            had_migraine: None,
        }
    }

    /// Builder-style trigger setter
    pub fn with(mut self, trigger: Trigger, value: bool) -> Self {
        *self.flag_mut(trigger) = Some(value);
        self
    }

    /// Builder-style label setter
    pub fn labeled(mut self, had_migraine: bool) -> Self {
        self.had_migraine = Some(had_migraine);
        self
    }

    pub fn flag(&self, trigger: Trigger) -> Option<bool> {
        match trigger {
            Trigger::Stress => self.stress,
            Trigger::Oversleep => self.oversleep,
            Trigger::SleepDeprivation => self.sleep_deprivation,
            Trigger::Exercise => self.exercise,
            Trigger::Fatigue => self.fatigue,
            Trigger::Menstrual => self.menstrual,
            Trigger::EmotionalDistress => self.emotional_distress,
            Trigger::ExcessiveNoise => self.excessive_noise,
            Trigger::ExcessiveSmells => self.excessive_smells,
            Trigger::ExcessiveAlcohol => self.excessive_alcohol,
            Trigger::IrregularMeals => self.irregular_meals,
            Trigger::Overeating => self.overeating,
            Trigger::ExcessiveCaffeine => self.excessive_caffeine,
            Trigger::ExcessiveSmoking => self.excessive_smoking,
            Trigger::Travel => self.travel,
        }
    }

    fn flag_mut(&mut self, trigger: Trigger) -> &mut Option<bool> {
        match trigger {
            Trigger::Stress => &mut self.stress,
            Trigger::Oversleep => &mut self.oversleep,
            Trigger::SleepDeprivation => &mut self.sleep_deprivation,
            Trigger::Exercise => &mut self.exercise,
            Trigger::Fatigue => &mut self.fatigue,
            Trigger::Menstrual => &mut self.menstrual,
            Trigger::EmotionalDistress => &mut self.emotional_distress,
            Trigger::ExcessiveNoise => &mut self.excessive_noise,
            Trigger::ExcessiveSmells => &mut self.excessive_smells,
            Trigger::ExcessiveAlcohol => &mut self.excessive_alcohol,
            Trigger::IrregularMeals => &mut self.irregular_meals,
            Trigger::Overeating => &mut self.overeating,
            Trigger::ExcessiveCaffeine => &mut self.excessive_caffeine,
            Trigger::ExcessiveSmoking => &mut self.excessive_smoking,
            Trigger::Travel => &mut self.travel,
        }
    }

    /// Numeric trigger value; an absent flag is 0, never its own category
    pub fn flag_value(&self, trigger: Trigger) -> f64 {
        if self.flag(trigger).unwrap_or(false) {
            1.0
        } else {
            0.0
        }
    }

    /// Survey records carry no numeric ranges; only identity is checked
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.user_id.trim().is_empty() {
            return Err(PipelineError::InsufficientData(
                "survey record has an empty user_id".to_string(),
            ));
        }
        Ok(())
    }
}

impl DatedRecord for DailyRecord {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn label(&self) -> Option<bool> {
        self.had_migraine
    }
}

/// Physiological, environmental and behavioral sensor fields, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorField {
    ScreenTimeHours,
    HeartRateBpm,
    Steps,
    SleepHours,
    StressLevel,
    RespirationRate,
    TemperatureC,
    AirQualityIndex,
    ActivityLevel,
    AirPressureHpa,
}

/// Which side of a threshold counts as risky
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskDirection {
    Above,
    Below,
}

impl SensorField {
    pub const ALL: [SensorField; 10] = [
        SensorField::ScreenTimeHours,
        SensorField::HeartRateBpm,
        SensorField::Steps,
        SensorField::SleepHours,
        SensorField::StressLevel,
        SensorField::RespirationRate,
        SensorField::TemperatureC,
        SensorField::AirQualityIndex,
        SensorField::ActivityLevel,
        SensorField::AirPressureHpa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorField::ScreenTimeHours => "screen_time_hours",
            SensorField::HeartRateBpm => "heart_rate_bpm",
            SensorField::Steps => "steps",
            SensorField::SleepHours => "sleep_hours",
            SensorField::StressLevel => "stress_level",
            SensorField::RespirationRate => "respiration_rate",
            SensorField::TemperatureC => "temperature_c",
            SensorField::AirQualityIndex => "air_quality_index",
            SensorField::ActivityLevel => "activity_level",
            SensorField::AirPressureHpa => "air_pressure_hpa",
        }
    }

    pub fn from_name(name: &str) -> Option<SensorField> {
        SensorField::ALL.iter().copied().find(|f| f.as_str() == name)
    }

    /// Physically plausible range (inclusive)
    pub fn valid_range(&self) -> (f64, f64) {
        match self {
            SensorField::ScreenTimeHours => (0.0, 24.0),
            SensorField::HeartRateBpm => (40.0, 200.0),
            SensorField::Steps => (0.0, 50_000.0),
            SensorField::SleepHours => (0.0, 24.0),
            SensorField::StressLevel => (0.0, 100.0),
            SensorField::RespirationRate => (8.0, 30.0),
            SensorField::TemperatureC => (-20.0, 50.0),
            SensorField::AirQualityIndex => (0.0, 5.0),
            SensorField::ActivityLevel => (0.0, 3.0),
            SensorField::AirPressureHpa => (950.0, 1050.0),
        }
    }

    /// Threshold beyond which the field is considered a risk factor
    pub fn risk_threshold(&self) -> (f64, RiskDirection) {
        match self {
            SensorField::ScreenTimeHours => (8.0, RiskDirection::Above),
            SensorField::HeartRateBpm => (80.0, RiskDirection::Above),
            SensorField::Steps => (5000.0, RiskDirection::Below),
            SensorField::SleepHours => (6.5, RiskDirection::Below),
            SensorField::StressLevel => (70.0, RiskDirection::Above),
            SensorField::RespirationRate => (18.0, RiskDirection::Above),
            SensorField::TemperatureC => (27.0, RiskDirection::Above),
            SensorField::AirQualityIndex => (3.0, RiskDirection::Above),
            SensorField::ActivityLevel => (2.0, RiskDirection::Above),
            SensorField::AirPressureHpa => (1010.0, RiskDirection::Above),
        }
    }

    /// User-facing label for explanations
    pub fn label(&self) -> &'static str {
        match self {
            SensorField::ScreenTimeHours => "High screen time",
            SensorField::HeartRateBpm => "Elevated heart rate",
            SensorField::Steps => "Low physical activity",
            SensorField::SleepHours => "Insufficient sleep",
            SensorField::StressLevel => "High stress level",
            SensorField::RespirationRate => "Elevated respiration rate",
            SensorField::TemperatureC => "High temperature",
            SensorField::AirQualityIndex => "Poor air quality",
            SensorField::ActivityLevel => "Strenuous activity",
            SensorField::AirPressureHpa => "Air pressure changes",
        }
    }
}

/// One sensor observation window per user per day, in physical units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SensorRecord {
    pub user_id: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screen_time_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heart_rate_bpm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sleep_hours: Option<f64>,
    /// Self-reported stress, 0-100
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stress_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub respiration_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_quality_index: Option<f64>,
    /// Activity level, 0-3
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_pressure_hpa: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub had_migraine: Option<bool>,
}

impl SensorRecord {
    /// Create a record with every field absent and no label
    pub fn new(user_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            user_id: user_id.into(),
            date,
            screen_time_hours: None,
            heart_rate_bpm: None,
            steps: None,
            sleep_hours: None,
            stress_level: None,
            respiration_rate: None,
            temperature_c: None,
            air_quality_index: None,
            activity_level: None,
            air_pressure_hpa: None,
            had_migraine: None,
        }
    }

    /// Builder-style field setter
    pub fn with(mut self, field: SensorField, value: f64) -> Self {
        *self.value_mut(field) = Some(value);
        self
    }

    /// Builder-style label setter
    pub fn labeled(mut self, had_migraine: bool) -> Self {
        self.had_migraine = Some(had_migraine);
        self
    }

    pub fn value(&self, field: SensorField) -> Option<f64> {
        match field {
            SensorField::ScreenTimeHours => self.screen_time_hours,
            SensorField::HeartRateBpm => self.heart_rate_bpm,
            SensorField::Steps => self.steps,
            SensorField::SleepHours => self.sleep_hours,
            SensorField::StressLevel => self.stress_level,
            SensorField::RespirationRate => self.respiration_rate,
            SensorField::TemperatureC => self.temperature_c,
            SensorField::AirQualityIndex => self.air_quality_index,
            SensorField::ActivityLevel => self.activity_level,
            SensorField::AirPressureHpa => self.air_pressure_hpa,
        }
    }

    fn value_mut(&mut self, field: SensorField) -> &mut Option<f64> {
        match field {
            SensorField::ScreenTimeHours => &mut self.screen_time_hours,
            SensorField::HeartRateBpm => &mut self.heart_rate_bpm,
            SensorField::Steps => &mut self.steps,
            SensorField::SleepHours => &mut self.sleep_hours,
            SensorField::StressLevel => &mut self.stress_level,
            SensorField::RespirationRate => &mut self.respiration_rate,
            SensorField::TemperatureC => &mut self.temperature_c,
            SensorField::AirQualityIndex => &mut self.air_quality_index,
            SensorField::ActivityLevel => &mut self.activity_level,
            SensorField::AirPressureHpa => &mut self.air_pressure_hpa,
        }
    }

    /// Number of numeric fields present
    pub fn present_count(&self) -> usize {
        SensorField::ALL
            .iter()
            .filter(|f| self.value(**f).is_some())
            .count()
    }

    /// Check identity and that every present value is finite and in range
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.user_id.trim().is_empty() {
            return Err(PipelineError::InsufficientData(
                "sensor record has an empty user_id".to_string(),
            ));
        }

        for field in SensorField::ALL {
            if let Some(value) = self.value(field) {
                let (min, max) = field.valid_range();
                if !value.is_finite() || value < min || value > max {
                    return Err(PipelineError::ValueOutOfRange {
                        field: field.as_str().to_string(),
                        value,
                        min,
                        max,
                    });
                }
            }
        }

        Ok(())
    }
}

impl DatedRecord for SensorRecord {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn date(&self) -> NaiveDate {
        self.date
    }

    fn label(&self) -> Option<bool> {
        self.had_migraine
    }
}

/// Demographics joined in at feature-build time, never embedded per record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
}

impl UserProfile {
    pub fn new(age: f64, gender: impl Into<String>) -> Self {
        Self {
            age: Some(age),
            gender: Some(gender.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_missing_flags_are_zero() {
        let record = DailyRecord::new("u1", day(1)).with(Trigger::Stress, true);
        assert_eq!(record.flag_value(Trigger::Stress), 1.0);
        assert_eq!(record.flag_value(Trigger::Travel), 0.0);
        assert_eq!(record.flag(Trigger::Travel), None);
    }

    #[test]
    fn test_trigger_names_round_trip() {
        for trigger in Trigger::ALL {
            assert_eq!(Trigger::from_name(trigger.as_str()), Some(trigger));
        }
        for field in SensorField::ALL {
            assert_eq!(SensorField::from_name(field.as_str()), Some(field));
        }
    }

    #[test]
    fn test_unknown_key_rejected() {
        let json = r#"{"user_id": "u1", "date": "2024-03-01", "stress": true, "mood": 3}"#;
        let result: Result<DailyRecord, _> = serde_json::from_str(json);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("unknown field"));
    }

    #[test]
    fn test_deserialize_sensor_record() {
        let json = r#"{
            "user_id": "u1",
            "date": "2024-03-01",
            "heart_rate_bpm": 72.0,
            "sleep_hours": 6.5,
            "stress_level": 40,
            "had_migraine": false
        }"#;
        let record: SensorRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.value(SensorField::HeartRateBpm), Some(72.0));
        assert_eq!(record.value(SensorField::Steps), None);
        assert_eq!(record.present_count(), 3);
        assert_eq!(record.label(), Some(false));
    }

    #[test]
    fn test_sensor_range_validation() {
        let ok = SensorRecord::new("u1", day(1)).with(SensorField::StressLevel, 55.0);
        assert!(ok.validate().is_ok());

        let bad = SensorRecord::new("u1", day(1)).with(SensorField::HeartRateBpm, 250.0);
        match bad.validate() {
            Err(PipelineError::ValueOutOfRange { field, .. }) => {
                assert_eq!(field, "heart_rate_bpm")
            }
            other => panic!("expected out of range, got {:?}", other),
        }
    }
}
