//! Deterministic synthetic data shared by unit tests

use crate::artifact::ModelArtifact;
use crate::config::{ForestParams, PipelineConfig};
use crate::schema::{DailyRecord, SensorField, SensorRecord, Trigger, UserProfile};
use crate::trainer::BaseTrainer;
use chrono::{Days, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Defaults with a small forest so tests stay quick
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        cv_folds: 3,
        forest: ForestParams {
            n_trees: 15,
            ..ForestParams::default()
        },
        ..PipelineConfig::default()
    }
}

pub fn day(offset: u64) -> NaiveDate {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    start.checked_add_days(Days::new(offset)).unwrap()
}

pub fn user_id(u: usize) -> String {
    format!("user{}", u)
}

/// Fully populated, labeled sensor days for one user.
///
/// Short sleep, high stress and long screen time drive the label.
pub fn sensor_days(user: &str, days: usize, seed: u64) -> Vec<SensorRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..days)
        .map(|d| {
            let sleep = rng.gen_range(4.0..9.0);
            let stress = rng.gen_range(20.0..95.0);
            let screen = rng.gen_range(2.0..12.0);
            let score = (7.0 - sleep) / 2.0 + (stress - 55.0) / 25.0 + (screen - 7.0) / 5.0
                + rng.gen_range(-0.4..0.4);

            SensorRecord::new(user, day(d as u64))
                .with(SensorField::ScreenTimeHours, screen)
                .with(SensorField::HeartRateBpm, rng.gen_range(55.0..95.0))
                .with(SensorField::Steps, rng.gen_range(2000.0..14000.0))
                .with(SensorField::SleepHours, sleep)
                .with(SensorField::StressLevel, stress)
                .with(SensorField::RespirationRate, rng.gen_range(12.0..20.0))
                .with(SensorField::TemperatureC, rng.gen_range(15.0..32.0))
                .with(SensorField::AirQualityIndex, rng.gen_range(1.0..5.0))
                .with(SensorField::ActivityLevel, rng.gen_range(0.0..3.0))
                .with(SensorField::AirPressureHpa, rng.gen_range(990.0..1030.0))
                .labeled(score > 0.5)
        })
        .collect()
}

/// Sensor days where every third day is a migraine.
///
/// Migraine days carry short sleep, high stress and long screen time; the
/// other readings vary at random.
pub fn patterned_sensor_days(user: &str, days: usize) -> Vec<SensorRecord> {
    sensor_days(user, days, 17)
        .into_iter()
        .enumerate()
        .map(|(d, record)| patterned_day(record, d % 3 == 0))
        .collect()
}

/// Overwrite the label-driving readings of `record` for a migraine or calm day
pub fn patterned_day(record: SensorRecord, migraine: bool) -> SensorRecord {
    let (sleep, stress, screen) = if migraine { (4.5, 88.0, 10.0) } else { (8.0, 30.0, 3.0) };
    record
        .with(SensorField::SleepHours, sleep)
        .with(SensorField::StressLevel, stress)
        .with(SensorField::ScreenTimeHours, screen)
        .labeled(migraine)
}

/// `users` users with `days` days each, user-major and date-ordered
pub fn sensor_population(users: usize, days: usize, seed: u64) -> Vec<SensorRecord> {
    (0..users)
        .flat_map(|u| sensor_days(&user_id(u), days, seed.wrapping_mul(1000) + u as u64))
        .collect()
}

/// Labeled survey days for one user; stress and sleep deprivation drive the label
pub fn survey_days(user: &str, days: usize, seed: u64) -> Vec<DailyRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..days)
        .map(|d| {
            let mut record = DailyRecord::new(user, day(d as u64));
            for trigger in Trigger::ALL {
                record = record.with(trigger, rng.gen_bool(0.3));
            }
            let stress = record.flag(Trigger::Stress).unwrap_or(false);
            let sleep = record.flag(Trigger::SleepDeprivation).unwrap_or(false);
            let label = match (stress, sleep) {
                (true, true) => true,
                (true, false) | (false, true) => rng.gen_bool(0.6),
                (false, false) => rng.gen_bool(0.05),
            };
            record.labeled(label)
        })
        .collect()
}

pub fn profile(u: usize) -> UserProfile {
    let gender = if u % 2 == 0 { "female" } else { "male" };
    UserProfile::new(25.0 + ((u * 7) % 30) as f64, gender)
}

/// Survey records plus one profile per user
pub fn survey_population(
    users: usize,
    days: usize,
    seed: u64,
) -> (Vec<DailyRecord>, BTreeMap<String, UserProfile>) {
    let records = (0..users)
        .flat_map(|u| survey_days(&user_id(u), days, seed.wrapping_mul(1000) + u as u64))
        .collect();
    let profiles = (0..users).map(|u| (user_id(u), profile(u))).collect();
    (records, profiles)
}

/// A trained base sensor artifact, built once per test binary
pub fn sensor_artifact() -> ModelArtifact {
    static ARTIFACT: OnceLock<ModelArtifact> = OnceLock::new();
    ARTIFACT
        .get_or_init(|| {
            BaseTrainer::new(fast_config())
                .train_sensor(&sensor_population(6, 15, 7))
                .unwrap()
        })
        .clone()
}

/// A trained base survey artifact, built once per test binary
pub fn survey_artifact() -> ModelArtifact {
    static ARTIFACT: OnceLock<ModelArtifact> = OnceLock::new();
    ARTIFACT
        .get_or_init(|| {
            let (records, profiles) = survey_population(6, 15, 7);
            BaseTrainer::new(fast_config())
                .train_survey(&records, &profiles)
                .unwrap()
        })
        .clone()
}
