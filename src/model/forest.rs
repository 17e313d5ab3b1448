//! Random forest classifier
//!
//! Bootstrap-aggregated CART trees grown on weighted Gini impurity. Class
//! weights enter as sample weights, multiplied by each sample's bootstrap
//! count. Leaves store the weighted positive fraction; the forest probability
//! is the mean over trees.

use crate::config::ForestParams;
use crate::error::PipelineError;
use crate::model::validation::ClassWeights;
use ndarray::{ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "snake_case")]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single fitted tree, nodes stored in a flat arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    pub fn predict_proba(&self, row: ArrayView1<f64>) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if row[*feature] <= *threshold { *left } else { *right };
                }
                None => return 0.5,
            }
        }
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Weighted sample inside a node
#[derive(Debug, Clone, Copy)]
struct Sample {
    row: usize,
    weight: f64,
    label: bool,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    position: usize,
    impurity_decrease: f64,
}

fn gini(pos: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    let p = pos / total;
    1.0 - p * p - (1.0 - p) * (1.0 - p)
}

fn weighted_positive(samples: &[Sample]) -> (f64, f64) {
    samples.iter().fold((0.0, 0.0), |(pos, total), s| {
        (pos + if s.label { s.weight } else { 0.0 }, total + s.weight)
    })
}

struct TreeBuilder<'a> {
    x: ArrayView2<'a, f64>,
    params: &'a ForestParams,
    max_features: usize,
    /// Total sample weight at the root, for the relative impurity threshold
    root_weight: f64,
    nodes: Vec<Node>,
    importances: Vec<f64>,
}

impl<'a> TreeBuilder<'a> {
    fn grow(&mut self, samples: &mut [Sample], depth: usize, rng: &mut StdRng) -> usize {
        let (pos, total) = weighted_positive(samples);
        let node_idx = self.nodes.len();
        let leaf_value = if total > 0.0 { pos / total } else { 0.5 };
        self.nodes.push(Node::Leaf { value: leaf_value });

        let impurity = gini(pos, total);
        if depth >= self.params.max_depth
            || samples.len() < self.params.min_samples_split
            || samples.len() < 2 * self.params.min_samples_leaf
            || impurity <= 1e-12
        {
            return node_idx;
        }

        let Some(best) = self.find_split(samples, pos, total, impurity, rng) else {
            return node_idx;
        };

        samples.sort_by(|a, b| {
            self.x[[a.row, best.feature]].total_cmp(&self.x[[b.row, best.feature]])
        });
        self.importances[best.feature] += best.impurity_decrease;

        let (left_samples, right_samples) = samples.split_at_mut(best.position);
        let left = self.grow(left_samples, depth + 1, rng);
        let right = self.grow(right_samples, depth + 1, rng);
        self.nodes[node_idx] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        node_idx
    }

    /// Search `max_features` random candidates, drawing more only while no valid split exists
    fn find_split(
        &self,
        samples: &mut [Sample],
        pos: f64,
        total: f64,
        impurity: f64,
        rng: &mut StdRng,
    ) -> Option<BestSplit> {
        let mut features: Vec<usize> = (0..self.x.ncols()).collect();
        features.shuffle(rng);

        let min_leaf = self.params.min_samples_leaf.max(1);
        let mut best: Option<BestSplit> = None;

        for (visited, feature) in features.into_iter().enumerate() {
            if visited >= self.max_features && best.is_some() {
                break;
            }

            samples.sort_by(|a, b| self.x[[a.row, feature]].total_cmp(&self.x[[b.row, feature]]));

            let mut left_pos = 0.0;
            let mut left_total = 0.0;
            for i in 0..samples.len() - 1 {
                let s = samples[i];
                left_total += s.weight;
                if s.label {
                    left_pos += s.weight;
                }

                let n_left = i + 1;
                if n_left < min_leaf || samples.len() - n_left < min_leaf {
                    continue;
                }
                let here = self.x[[s.row, feature]];
                let next = self.x[[samples[i + 1].row, feature]];
                if next <= here {
                    continue;
                }

                let right_total = total - left_total;
                let decrease = total * impurity
                    - left_total * gini(left_pos, left_total)
                    - right_total * gini(pos - left_pos, right_total);

                if best.as_ref().map_or(true, |b| decrease > b.impurity_decrease) {
                    best = Some(BestSplit {
                        feature,
                        threshold: here + (next - here) / 2.0,
                        position: n_left,
                        impurity_decrease: decrease,
                    });
                }
            }
        }

        best.filter(|b| {
            b.impurity_decrease > 0.0
                && b.impurity_decrease / self.root_weight >= self.params.min_impurity_decrease
        })
    }
}

/// Bagged ensemble of weighted CART trees
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
    n_features: usize,
    importances: Vec<f64>,
    oob_accuracy: Option<f64>,
}

impl RandomForest {
    /// Fit on rows of `x` with boolean labels `y`
    pub fn fit(
        x: ArrayView2<f64>,
        y: &[bool],
        class_weights: &ClassWeights,
        params: &ForestParams,
        seed: u64,
    ) -> Result<Self, PipelineError> {
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(PipelineError::InsufficientData(format!(
                "forest needs matching rows and labels, got {} rows and {} labels",
                n,
                y.len()
            )));
        }

        let n_features = x.ncols();
        let max_features = params.max_features.resolve(n_features);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut trees = Vec::with_capacity(params.n_trees);
        let mut importances = vec![0.0; n_features];
        let mut oob_sum = vec![0.0; n];
        let mut oob_count = vec![0usize; n];

        for _ in 0..params.n_trees {
            let mut counts = vec![0usize; n];
            for _ in 0..n {
                counts[rng.gen_range(0..n)] += 1;
            }

            let mut samples: Vec<Sample> = counts
                .iter()
                .enumerate()
                .filter(|(_, c)| **c > 0)
                .map(|(row, c)| Sample {
                    row,
                    weight: class_weights.weight(y[row]) * *c as f64,
                    label: y[row],
                })
                .collect();

            let root_weight = samples.iter().map(|s| s.weight).sum();
            let mut builder = TreeBuilder {
                x: x.view(),
                params,
                max_features,
                root_weight,
                nodes: Vec::new(),
                importances: vec![0.0; n_features],
            };
            builder.grow(&mut samples, 0, &mut rng);

            let tree_total: f64 = builder.importances.iter().sum();
            if tree_total > 0.0 {
                for (acc, v) in importances.iter_mut().zip(&builder.importances) {
                    *acc += v / tree_total;
                }
            }

            let tree = DecisionTree {
                nodes: builder.nodes,
            };
            for row in (0..n).filter(|r| counts[*r] == 0) {
                oob_sum[row] += tree.predict_proba(x.row(row));
                oob_count[row] += 1;
            }
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for v in importances.iter_mut() {
                *v /= total;
            }
        }

        let scored: Vec<usize> = (0..n).filter(|r| oob_count[*r] > 0).collect();
        let oob_accuracy = if scored.is_empty() {
            None
        } else {
            let correct = scored
                .iter()
                .filter(|r| (oob_sum[**r] / oob_count[**r] as f64 >= 0.5) == y[**r])
                .count();
            Some(correct as f64 / scored.len() as f64)
        };

        Ok(Self {
            trees,
            n_features,
            importances,
            oob_accuracy,
        })
    }

    /// Positive-class probability for one row
    pub fn predict_proba(&self, row: ArrayView1<f64>) -> f64 {
        if self.trees.is_empty() {
            return 0.5;
        }
        self.trees.iter().map(|t| t.predict_proba(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn predict_proba_matrix(&self, x: ArrayView2<f64>) -> Vec<f64> {
        x.rows().into_iter().map(|row| self.predict_proba(row)).collect()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Normalized mean impurity decrease per feature
    pub fn feature_importances(&self) -> &[f64] {
        &self.importances
    }

    /// Out-of-bag accuracy, when any sample was left out of some bootstrap
    pub fn oob_accuracy(&self) -> Option<f64> {
        self.oob_accuracy
    }

    pub fn max_depth(&self) -> usize {
        self.trees.iter().map(|t| t.depth()).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn separable(n: usize) -> (Array2<f64>, Vec<bool>) {
        let mut x = Array2::zeros((n, 3));
        let mut y = Vec::with_capacity(n);
        for i in 0..n {
            let signal = i as f64 / n as f64;
            x[[i, 0]] = signal;
            x[[i, 1]] = ((i * 7) % 11) as f64;
            x[[i, 2]] = ((i * 5) % 3) as f64;
            y.push(signal > 0.6);
        }
        (x, y)
    }

    fn small_params() -> ForestParams {
        ForestParams {
            n_trees: 25,
            ..ForestParams::default()
        }
    }

    #[test]
    fn test_learns_separable_signal() {
        let (x, y) = separable(120);
        let weights = ClassWeights::balanced(&y).unwrap();
        let forest = RandomForest::fit(x.view(), &y, &weights, &small_params(), 42).unwrap();

        let low = ndarray::array![0.1, 3.0, 1.0];
        let high = ndarray::array![0.95, 3.0, 1.0];
        assert!(forest.predict_proba(low.view()) < 0.3);
        assert!(forest.predict_proba(high.view()) > 0.7);
        assert!(forest.oob_accuracy().unwrap() > 0.8);
    }

    #[test]
    fn test_importances_favor_signal() {
        let (x, y) = separable(120);
        let weights = ClassWeights::balanced(&y).unwrap();
        let forest = RandomForest::fit(x.view(), &y, &weights, &small_params(), 42).unwrap();

        let imp = forest.feature_importances();
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(imp[0] > imp[1]);
        assert!(imp[0] > imp[2]);
    }

    #[test]
    fn test_respects_depth_and_seed() {
        let (x, y) = separable(200);
        let weights = ClassWeights::balanced(&y).unwrap();
        let params = ForestParams {
            n_trees: 5,
            max_depth: 2,
            ..ForestParams::default()
        };
        let a = RandomForest::fit(x.view(), &y, &weights, &params, 7).unwrap();
        let b = RandomForest::fit(x.view(), &y, &weights, &params, 7).unwrap();
        assert!(a.max_depth() <= 2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_min_impurity_decrease_prunes_weak_splits() {
        let (x, y) = separable(80);
        let weights = ClassWeights::balanced(&y).unwrap();
        let strict = ForestParams {
            n_trees: 5,
            min_impurity_decrease: 1.0,
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(x.view(), &y, &weights, &strict, 3).unwrap();
        assert_eq!(forest.max_depth(), 0);

        let loose = ForestParams {
            min_impurity_decrease: 0.01,
            ..strict
        };
        let forest = RandomForest::fit(x.view(), &y, &weights, &loose, 3).unwrap();
        assert!(forest.max_depth() > 0);
    }

    #[test]
    fn test_serde_round_trip_preserves_predictions() {
        let (x, y) = separable(60);
        let weights = ClassWeights::balanced(&y).unwrap();
        let forest = RandomForest::fit(x.view(), &y, &weights, &small_params(), 1).unwrap();
        let restored: RandomForest =
            serde_json::from_str(&serde_json::to_string(&forest).unwrap()).unwrap();
        let row = x.row(10);
        assert!((forest.predict_proba(row) - restored.predict_proba(row)).abs() < 1e-12);
    }
}
