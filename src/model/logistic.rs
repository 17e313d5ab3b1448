//! L2-regularized logistic regression
//!
//! Minimizes `0.5 * ||w||^2 + C * sum_i s_i * logloss_i` with Newton steps and
//! step halving. The intercept is not penalized. Sample weights carry the class
//! balancing.

use crate::config::LogisticParams;
use crate::error::PipelineError;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Numerically stable `log(1 + exp(z))`
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// Fitted binary logistic model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegression {
    coef: Vec<f64>,
    intercept: f64,
    n_iter: usize,
    converged: bool,
}

impl LogisticRegression {
    pub fn fit(
        x: ArrayView2<f64>,
        y: &[bool],
        sample_weight: &[f64],
        params: &LogisticParams,
    ) -> Result<Self, PipelineError> {
        let (n, d) = x.dim();
        if n == 0 || n != y.len() || n != sample_weight.len() {
            return Err(PipelineError::InsufficientData(format!(
                "logistic regression needs matching rows, labels and weights, got {}/{}/{}",
                n,
                y.len(),
                sample_weight.len()
            )));
        }

        let c = params.c;
        let targets: Vec<f64> = y.iter().map(|v| if *v { 1.0 } else { 0.0 }).collect();
        // theta = [w_0 .. w_{d-1}, b]
        let mut theta = Array1::<f64>::zeros(d + 1);

        let objective = |theta: &Array1<f64>| -> f64 {
            let w = theta.slice(ndarray::s![..d]);
            let b = theta[d];
            let mut loss = 0.0;
            for i in 0..n {
                let z = x.row(i).dot(&w) + b;
                loss += sample_weight[i] * (softplus(z) - targets[i] * z);
            }
            0.5 * w.dot(&w) + c * loss
        };

        let mut converged = false;
        let mut n_iter = 0;
        let mut current = objective(&theta);

        while n_iter < params.max_iter {
            n_iter += 1;

            let w = theta.slice(ndarray::s![..d]).to_owned();
            let b = theta[d];
            let mut grad = Array1::<f64>::zeros(d + 1);
            let mut hess = Array2::<f64>::zeros((d + 1, d + 1));

            for i in 0..n {
                let row = x.row(i);
                let p = sigmoid(row.dot(&w) + b);
                let g = c * sample_weight[i] * (p - targets[i]);
                let h = c * sample_weight[i] * p * (1.0 - p);
                for j in 0..d {
                    grad[j] += g * row[j];
                    for k in j..d {
                        hess[[j, k]] += h * row[j] * row[k];
                    }
                    hess[[j, d]] += h * row[j];
                }
                grad[d] += g;
                hess[[d, d]] += h;
            }
            for j in 0..d {
                grad[j] += w[j];
                hess[[j, j]] += 1.0;
                for k in 0..j {
                    hess[[j, k]] = hess[[k, j]];
                }
                hess[[d, j]] = hess[[j, d]];
            }
            hess[[d, d]] += 1e-10;

            let max_grad = grad.iter().fold(0.0f64, |m, v| m.max(v.abs()));
            if max_grad < params.tol {
                converged = true;
                break;
            }

            let step = solve(hess, grad)?;

            // Halve the Newton step until the objective does not increase
            let mut scale = 1.0;
            let mut accepted = false;
            for _ in 0..30 {
                let candidate = &theta - &(&step * scale);
                let value = objective(&candidate);
                if value <= current {
                    theta = candidate;
                    current = value;
                    accepted = true;
                    break;
                }
                scale *= 0.5;
            }
            if !accepted {
                converged = true;
                break;
            }
        }

        if !converged {
            log::warn!(
                "logistic regression stopped after {} iterations without converging",
                n_iter
            );
        }

        Ok(Self {
            coef: theta.slice(ndarray::s![..d]).to_vec(),
            intercept: theta[d],
            n_iter,
            converged,
        })
    }

    /// Positive-class probability for one row
    pub fn predict_proba(&self, row: ArrayView1<f64>) -> f64 {
        let z: f64 = row
            .iter()
            .zip(&self.coef)
            .map(|(x, w)| x * w)
            .sum::<f64>()
            + self.intercept;
        sigmoid(z)
    }

    pub fn predict_proba_matrix(&self, x: ArrayView2<f64>) -> Vec<f64> {
        x.rows().into_iter().map(|row| self.predict_proba(row)).collect()
    }

    pub fn coefficients(&self) -> &[f64] {
        &self.coef
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn n_features(&self) -> usize {
        self.coef.len()
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn n_iter(&self) -> usize {
        self.n_iter
    }
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>, PipelineError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|i, j| a[[*i, col]].abs().total_cmp(&a[[*j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-14 {
            return Err(PipelineError::InsufficientData(
                "singular system while fitting logistic regression".to_string(),
            ));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }

        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let mut acc = b[row];
        for k in row + 1..n {
            acc -= a[[row, k]] * x[k];
        }
        x[row] = acc / a[[row, row]];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_solve() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![3.0, 5.0];
        let x = solve(a, b).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_learns_direction() {
        let x = array![
            [0.0, 1.0],
            [0.2, 0.0],
            [0.4, 1.0],
            [0.6, 0.0],
            [0.8, 1.0],
            [1.0, 0.0],
            [1.2, 1.0],
            [1.4, 0.0]
        ];
        let y = vec![false, false, false, true, false, true, true, true];
        let weights = vec![1.0; y.len()];
        let model = LogisticRegression::fit(x.view(), &y, &weights, &LogisticParams::default())
            .unwrap();

        assert!(model.converged());
        assert!(model.coefficients()[0] > 0.0);
        assert!(model.predict_proba(array![1.4, 0.5].view()) > model.predict_proba(array![0.0, 0.5].view()));
    }

    #[test]
    fn test_regularization_shrinks_coefficients() {
        let x = array![[-1.0], [-0.5], [0.5], [1.0]];
        let y = vec![false, false, true, true];
        let weights = vec![1.0; 4];
        let loose = LogisticRegression::fit(
            x.view(),
            &y,
            &weights,
            &LogisticParams { c: 100.0, ..LogisticParams::default() },
        )
        .unwrap();
        let tight = LogisticRegression::fit(
            x.view(),
            &y,
            &weights,
            &LogisticParams { c: 0.01, ..LogisticParams::default() },
        )
        .unwrap();
        assert!(loose.coefficients()[0] > tight.coefficients()[0]);
        assert!(tight.coefficients()[0] > 0.0);
    }

    #[test]
    fn test_sample_weights_shift_probability() {
        let x = array![[0.0], [0.0], [0.0], [0.0]];
        let y = vec![true, false, false, false];
        let even = LogisticRegression::fit(x.view(), &y, &[1.0; 4], &LogisticParams::default())
            .unwrap();
        let balanced = LogisticRegression::fit(
            x.view(),
            &y,
            &[2.0, 2.0 / 3.0, 2.0 / 3.0, 2.0 / 3.0],
            &LogisticParams::default(),
        )
        .unwrap();
        let zero = array![0.0];
        assert!((even.predict_proba(zero.view()) - 0.25).abs() < 1e-3);
        assert!((balanced.predict_proba(zero.view()) - 0.5).abs() < 1e-3);
    }
}
