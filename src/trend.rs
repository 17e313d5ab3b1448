//! Multi-day sensor trend adjustment
//!
//! Looks across a window of sensor days for sustained patterns that a
//! single-day model cannot see: accumulated sleep debt, repeated high stress,
//! runs of poor days, falling activity. Each pattern adds percentage points to
//! the model's output. Missing readings never count toward a pattern.

use crate::schema::{SensorField, SensorRecord};
use serde::{Deserialize, Serialize};

const SLEEP_TARGET_HOURS: f64 = 7.0;

/// Individual pattern contributions, in percentage points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub days: usize,
    pub sleep_debt: f64,
    pub high_stress: f64,
    pub poor_day_run: f64,
    pub activity_drop: f64,
    pub screen_time: f64,
    pub heart_rate: f64,
    pub severe_sleep_loss: f64,
    pub extreme_stress: f64,
}

impl TrendAnalysis {
    /// Analyze days in date order
    pub fn analyze(days: &[SensorRecord]) -> Self {
        let mut sorted: Vec<&SensorRecord> = days.iter().collect();
        sorted.sort_by_key(|r| r.date);

        let values = |field: SensorField| -> Vec<Option<f64>> {
            sorted.iter().map(|r| r.value(field)).collect()
        };
        let sleep = values(SensorField::SleepHours);
        let stress = values(SensorField::StressLevel);
        let steps = values(SensorField::Steps);
        let screen = values(SensorField::ScreenTimeHours);
        let heart = values(SensorField::HeartRateBpm);

        let count = |series: &[Option<f64>], pred: &dyn Fn(f64) -> bool| {
            series.iter().flatten().filter(|v| pred(**v)).count()
        };

        let mut analysis = Self {
            days: sorted.len(),
            ..Self::default()
        };

        let debt: f64 = sleep
            .iter()
            .flatten()
            .map(|h| (SLEEP_TARGET_HOURS - h).max(0.0))
            .sum();
        if debt > 7.0 {
            analysis.sleep_debt = debt.min(10.0);
        }

        let stressed = count(&stress, &|v: f64| v > 70.0);
        if stressed >= 3 {
            analysis.high_stress = (2.0 * stressed as f64).min(8.0);
        }

        let run = longest_poor_run(&sorted);
        if run >= 3 {
            analysis.poor_day_run = (4.0 * run as f64).min(15.0);
        }

        if sorted.len() >= 3 {
            if let (Some(Some(first)), Some(Some(last))) = (steps.first(), steps.last()) {
                if *last < 0.6 * first {
                    analysis.activity_drop = 3.0;
                }
            }
        }

        let long_screen = count(&screen, &|v: f64| v > 9.0);
        if long_screen >= 4 {
            analysis.screen_time = (long_screen as f64).min(5.0);
        }

        let raised_hr = count(&heart, &|v: f64| v > 78.0);
        if raised_hr >= 4 {
            analysis.heart_rate = (raised_hr as f64).min(5.0);
        }

        let short_nights = count(&sleep, &|v: f64| v < 5.5);
        if short_nights >= 4 {
            analysis.severe_sleep_loss = (2.0 * short_nights as f64).min(8.0);
        }

        let extreme = count(&stress, &|v: f64| v > 85.0);
        if extreme >= 3 {
            analysis.extreme_stress = (3.0 * extreme as f64).min(10.0);
        }

        analysis
    }

    /// Total adjustment in percentage points
    pub fn total(&self) -> f64 {
        self.sleep_debt
            + self.high_stress
            + self.poor_day_run
            + self.activity_drop
            + self.screen_time
            + self.heart_rate
            + self.severe_sleep_loss
            + self.extreme_stress
    }

    /// Apply the adjustment to a probability, clamped to [0, 1]
    pub fn apply(&self, probability: f64) -> f64 {
        (probability + self.total() / 100.0).clamp(0.0, 1.0)
    }
}

/// Two or more risk signals on the same day
fn is_poor_day(record: &SensorRecord) -> bool {
    let checks = [
        record.value(SensorField::SleepHours).map(|v| v < 6.5),
        record.value(SensorField::StressLevel).map(|v| v > 70.0),
        record.value(SensorField::Steps).map(|v| v < 5000.0),
        record.value(SensorField::ScreenTimeHours).map(|v| v > 8.0),
    ];
    checks.iter().filter(|c| **c == Some(true)).count() >= 2
}

fn longest_poor_run(sorted: &[&SensorRecord]) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for record in sorted {
        if is_poor_day(record) {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::day;
    use pretty_assertions::assert_eq;

    fn healthy(d: u64) -> SensorRecord {
        SensorRecord::new("u", day(d))
            .with(SensorField::SleepHours, 7.5)
            .with(SensorField::StressLevel, 30.0)
            .with(SensorField::Steps, 9000.0)
            .with(SensorField::ScreenTimeHours, 4.0)
            .with(SensorField::HeartRateBpm, 65.0)
    }

    #[test]
    fn test_healthy_week_has_no_adjustment() {
        let days: Vec<SensorRecord> = (0..7).map(healthy).collect();
        let analysis = TrendAnalysis::analyze(&days);
        assert_eq!(analysis.total(), 0.0);
        assert_eq!(analysis.apply(0.3), 0.3);
    }

    #[test]
    fn test_bad_week_patterns() {
        let days: Vec<SensorRecord> = (0..5)
            .map(|d| {
                healthy(d)
                    .with(SensorField::SleepHours, 5.0)
                    .with(SensorField::StressLevel, 90.0)
                    .with(SensorField::Steps, if d == 4 { 3000.0 } else { 8000.0 })
            })
            .collect();
        let analysis = TrendAnalysis::analyze(&days);

        // 5 nights at 2h short
        assert_eq!(analysis.sleep_debt, 10.0);
        assert_eq!(analysis.high_stress, 8.0);
        assert_eq!(analysis.poor_day_run, 15.0);
        assert_eq!(analysis.activity_drop, 3.0);
        assert_eq!(analysis.severe_sleep_loss, 8.0);
        assert_eq!(analysis.extreme_stress, 10.0);
        assert_eq!(analysis.screen_time, 0.0);
        assert_eq!(analysis.apply(0.9), 1.0);
    }

    #[test]
    fn test_missing_values_do_not_count() {
        let days: Vec<SensorRecord> = (0..4)
            .map(|d| SensorRecord::new("u", day(d)).with(SensorField::HeartRateBpm, 85.0))
            .collect();
        let analysis = TrendAnalysis::analyze(&days);
        assert_eq!(analysis.heart_rate, 4.0);
        assert_eq!(analysis.sleep_debt, 0.0);
        assert_eq!(analysis.poor_day_run, 0.0);
    }

    #[test]
    fn test_run_resets_on_good_day() {
        let poor = |d| healthy(d).with(SensorField::SleepHours, 6.0).with(SensorField::Steps, 4000.0);
        let days = vec![poor(0), poor(1), healthy(2), poor(3), poor(4)];
        assert_eq!(TrendAnalysis::analyze(&days).poor_day_run, 0.0);
    }
}
