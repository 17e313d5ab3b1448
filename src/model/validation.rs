//! Class weighting, user-aware splitting and validation metrics
//!
//! Splits and folds are drawn per user, never per row, so one user's days can
//! never sit on both sides of a train/test boundary.

use crate::error::PipelineError;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Explicit inverse-frequency class weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    pub negative: f64,
    pub positive: f64,
}

impl ClassWeights {
    /// `n_samples / (2 * n_class)` for each class. Both classes must be present.
    pub fn balanced(y: &[bool]) -> Result<Self, PipelineError> {
        let n = y.len() as f64;
        let positives = y.iter().filter(|v| **v).count() as f64;
        let negatives = n - positives;
        if positives == 0.0 || negatives == 0.0 {
            return Err(PipelineError::InsufficientData(
                "training labels need both outcomes".to_string(),
            ));
        }
        Ok(Self {
            negative: n / (2.0 * negatives),
            positive: n / (2.0 * positives),
        })
    }

    pub fn weight(&self, label: bool) -> f64 {
        if label {
            self.positive
        } else {
            self.negative
        }
    }

    /// Per-sample weights for a label vector
    pub fn sample_weights(&self, y: &[bool]) -> Vec<f64> {
        y.iter().map(|v| self.weight(*v)).collect()
    }
}

/// True when `y` holds both outcomes
pub fn has_both_classes(y: &[bool]) -> bool {
    y.iter().any(|v| *v) && y.iter().any(|v| !*v)
}

/// Row indices of a train/test partition
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Users ordered by positive rate, ties broken by a seeded shuffle
fn users_by_rate(groups: &[String], y: &[bool], rng: &mut StdRng) -> Vec<(String, Vec<usize>)> {
    let mut by_user: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, g) in groups.iter().enumerate() {
        by_user.entry(g.as_str()).or_default().push(i);
    }

    let mut users: Vec<(String, Vec<usize>)> = by_user
        .into_iter()
        .map(|(u, rows)| (u.to_string(), rows))
        .collect();
    users.shuffle(rng);

    let rate = |rows: &[usize]| rows.iter().filter(|i| y[**i]).count() as f64 / rows.len() as f64;
    users.sort_by(|a, b| rate(&a.1).total_cmp(&rate(&b.1)));
    users
}

/// Hold out whole users, stratified by each user's positive rate.
///
/// Users are ranked by positive rate and cut into consecutive strata of
/// `round(1 / test_fraction)` users; one user per stratum goes to the test side.
pub fn stratified_group_split(
    groups: &[String],
    y: &[bool],
    test_fraction: f64,
    seed: u64,
) -> Result<Split, PipelineError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let users = users_by_rate(groups, y, &mut rng);
    if users.len() < 2 {
        return Err(PipelineError::InsufficientPopulationData(format!(
            "a user-grouped split needs at least 2 users, got {}",
            users.len()
        )));
    }

    let stratum = ((1.0 / test_fraction).round() as usize).max(2);
    let mut test_users = vec![false; users.len()];
    for (chunk_idx, chunk) in users.chunks(stratum).enumerate() {
        let start = chunk_idx * stratum;
        // A partial trailing stratum contributes a test user proportionally
        if chunk.len() < stratum && !rng.gen_bool(chunk.len() as f64 / stratum as f64) {
            continue;
        }
        test_users[start + rng.gen_range(0..chunk.len())] = true;
    }

    if !test_users.iter().any(|t| *t) {
        let idx = rng.gen_range(0..users.len());
        test_users[idx] = true;
    }
    if test_users.iter().all(|t| *t) {
        test_users[0] = false;
    }

    let mut split = Split {
        train: Vec::new(),
        test: Vec::new(),
    };
    for ((_, rows), is_test) in users.iter().zip(test_users) {
        if is_test {
            split.test.extend(rows);
        } else {
            split.train.extend(rows);
        }
    }
    split.train.sort_unstable();
    split.test.sort_unstable();
    Ok(split)
}

/// K folds over users, interleaved by positive rate
pub fn group_k_fold(
    groups: &[String],
    y: &[bool],
    k: usize,
    seed: u64,
) -> Result<Vec<Split>, PipelineError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let users = users_by_rate(groups, y, &mut rng);
    let k = k.min(users.len());
    if k < 2 {
        return Err(PipelineError::InsufficientPopulationData(
            "cross-validation needs at least 2 users".to_string(),
        ));
    }

    let mut fold_of_row = vec![0usize; y.len()];
    for (i, (_, rows)) in users.iter().enumerate() {
        for row in rows {
            fold_of_row[*row] = i % k;
        }
    }
    Ok(folds_from_assignment(&fold_of_row, k))
}

/// K folds over rows, stratified by label
pub fn stratified_k_fold(y: &[bool], k: usize, seed: u64) -> Result<Vec<Split>, PipelineError> {
    let k = k.min(y.len());
    if k < 2 {
        return Err(PipelineError::InsufficientData(
            "cross-validation needs at least 2 samples".to_string(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut positives: Vec<usize> = (0..y.len()).filter(|i| y[*i]).collect();
    let mut negatives: Vec<usize> = (0..y.len()).filter(|i| !y[*i]).collect();
    positives.shuffle(&mut rng);
    negatives.shuffle(&mut rng);

    let mut fold_of_row = vec![0usize; y.len()];
    for (i, row) in positives.iter().chain(negatives.iter()).enumerate() {
        fold_of_row[*row] = i % k;
    }
    Ok(folds_from_assignment(&fold_of_row, k))
}

fn folds_from_assignment(fold_of_row: &[usize], k: usize) -> Vec<Split> {
    (0..k)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..fold_of_row.len()).partition(|i| fold_of_row[*i] == fold);
            Split { train, test }
        })
        .filter(|s| !s.test.is_empty() && !s.train.is_empty())
        .collect()
}

/// Per-fold and mean accuracy of a cross-validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvReport {
    pub fold_accuracies: Vec<f64>,
    pub mean_accuracy: f64,
}

/// Run `fit_predict(train, test)` on every fold and score the test predictions.
///
/// A fold whose training side holds a single outcome predicts that outcome.
pub fn cross_validate<F>(y: &[bool], folds: &[Split], mut fit_predict: F) -> Result<CvReport, PipelineError>
where
    F: FnMut(&[usize], &[usize]) -> Result<Vec<f64>, PipelineError>,
{
    let mut fold_accuracies = Vec::with_capacity(folds.len());
    for split in folds {
        let train_y: Vec<bool> = split.train.iter().map(|i| y[*i]).collect();
        let probabilities = if has_both_classes(&train_y) {
            fit_predict(&split.train, &split.test)?
        } else {
            let constant = if train_y.first().copied().unwrap_or(false) { 1.0 } else { 0.0 };
            vec![constant; split.test.len()]
        };
        let test_y: Vec<bool> = split.test.iter().map(|i| y[*i]).collect();
        fold_accuracies.push(accuracy(&test_y, &probabilities));
    }

    if fold_accuracies.is_empty() {
        return Err(PipelineError::InsufficientData(
            "no usable cross-validation folds".to_string(),
        ));
    }
    let mean_accuracy = fold_accuracies.iter().sum::<f64>() / fold_accuracies.len() as f64;
    Ok(CvReport {
        fold_accuracies,
        mean_accuracy,
    })
}

/// Share of predictions on the correct side of 0.5
pub fn accuracy(y: &[bool], probabilities: &[f64]) -> f64 {
    if y.is_empty() {
        return 0.0;
    }
    let correct = y
        .iter()
        .zip(probabilities)
        .filter(|(label, p)| (**p >= 0.5) == **label)
        .count();
    correct as f64 / y.len() as f64
}

/// Area under the ROC curve via average ranks; `None` with a single outcome
pub fn roc_auc(y: &[bool], probabilities: &[f64]) -> Option<f64> {
    let n_pos = y.iter().filter(|v| **v).count();
    let n_neg = y.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..y.len()).collect();
    order.sort_by(|a, b| probabilities[*a].total_cmp(&probabilities[*b]));

    let mut ranks = vec![0.0; y.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probabilities[order[j + 1]] == probabilities[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for idx in &order[i..=j] {
            ranks[*idx] = avg_rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = (0..y.len()).filter(|i| y[*i]).map(|i| ranks[i]).sum();
    let n_pos = n_pos as f64;
    Some((pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg as f64))
}

/// Binary confusion counts at a 0.5 threshold
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(y: &[bool], probabilities: &[f64]) -> Self {
        let mut m = Self::default();
        for (label, p) in y.iter().zip(probabilities) {
            match (*label, *p >= 0.5) {
                (false, false) => m.true_negative += 1,
                (false, true) => m.false_positive += 1,
                (true, false) => m.false_negative += 1,
                (true, true) => m.true_positive += 1,
            }
        }
        m
    }
}

/// Metrics on the held-out users of the base trainer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoldoutMetrics {
    pub accuracy: f64,
    pub roc_auc: Option<f64>,
    pub confusion: ConfusionMatrix,
    pub n_samples: usize,
}

impl HoldoutMetrics {
    pub fn evaluate(y: &[bool], probabilities: &[f64]) -> Self {
        Self {
            accuracy: accuracy(y, probabilities),
            roc_auc: roc_auc(y, probabilities),
            confusion: ConfusionMatrix::from_predictions(y, probabilities),
            n_samples: y.len(),
        }
    }
}
