//! Trigger baselines
//!
//! Per-user mean and standard deviation of every survey trigger, accumulated
//! over history that strictly precedes the day being scored. Baselines give
//! the survey model a sense of what is normal for a given user.

use crate::schema::{DailyRecord, Trigger};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const N_TRIGGERS: usize = Trigger::ALL.len();

/// Mean and sample standard deviation per trigger, in canonical trigger order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerStats {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    /// Number of days the statistics were computed from
    pub days: usize,
}

impl TriggerStats {
    /// Statistics over every row of a pooled dataset
    pub fn population(records: &[DailyRecord]) -> Self {
        let mut baseline = TriggerBaseline::new();
        for record in records {
            baseline.push(record);
        }
        baseline.stats()
    }
}

/// Running per-trigger sums for one user
#[derive(Debug, Clone, Default)]
pub struct TriggerBaseline {
    sums: [f64; N_TRIGGERS],
    sum_squares: [f64; N_TRIGGERS],
    days: usize,
}

impl TriggerBaseline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Baseline over the most recent `window` records dated strictly before `date`
    pub fn before(history: &[DailyRecord], date: NaiveDate, window: usize) -> Self {
        let mut baseline = Self::new();
        for record in prior_window(history, date, window) {
            baseline.push(record);
        }
        baseline
    }

    /// Add one day to the baseline
    pub fn push(&mut self, record: &DailyRecord) {
        for (i, trigger) in Trigger::ALL.iter().enumerate() {
            let v = record.flag_value(*trigger);
            self.sums[i] += v;
            self.sum_squares[i] += v * v;
        }
        self.days += 1;
    }

    pub fn days(&self) -> usize {
        self.days
    }

    pub fn is_empty(&self) -> bool {
        self.days == 0
    }

    /// Current statistics. A single day has a standard deviation of 0.
    pub fn stats(&self) -> TriggerStats {
        let n = self.days as f64;
        let mut means = Vec::with_capacity(N_TRIGGERS);
        let mut stds = Vec::with_capacity(N_TRIGGERS);

        for i in 0..N_TRIGGERS {
            if self.days == 0 {
                means.push(0.0);
                stds.push(0.0);
                continue;
            }
            let mean = self.sums[i] / n;
            means.push(mean);
            if self.days < 2 {
                stds.push(0.0);
            } else {
                let var = (self.sum_squares[i] - n * mean * mean) / (n - 1.0);
                stds.push(var.max(0.0).sqrt());
            }
        }

        TriggerStats {
            means,
            stds,
            days: self.days,
        }
    }

    /// Statistics from this baseline, or `fallback` when it holds no days
    pub fn stats_or(&self, fallback: &TriggerStats) -> TriggerStats {
        if self.is_empty() {
            fallback.clone()
        } else {
            self.stats()
        }
    }
}

/// The most recent `window` records dated strictly before `date`, oldest first
pub fn prior_window(history: &[DailyRecord], date: NaiveDate, window: usize) -> Vec<&DailyRecord> {
    let mut prior: Vec<&DailyRecord> = history.iter().filter(|r| r.date < date).collect();
    prior.sort_by_key(|r| r.date);
    let skip = prior.len().saturating_sub(window);
    prior.split_off(skip)
}
