//! Standard scaler
//!
//! Zero-mean, unit-variance scaling fitted per model. Each artifact carries its
//! own scaler; parameters are never shared between users' models.

use crate::error::PipelineError;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Per-column mean and scale, fitted on a training matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on the columns of `x`. Constant columns get a scale of 1.
    pub fn fit(x: &Array2<f64>) -> Result<Self, PipelineError> {
        if x.nrows() == 0 {
            return Err(PipelineError::InsufficientData(
                "cannot fit a scaler on zero rows".to_string(),
            ));
        }

        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PipelineError::InsufficientData("empty matrix".to_string()))?;
        // Population standard deviation, as used for standardization
        let scale = x
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > 1e-12 { s } else { 1.0 });

        Ok(Self {
            mean: mean.to_vec(),
            scale: scale.to_vec(),
        })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    /// Column means in raw units
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// Scale a single row
    pub fn transform_row(&self, row: ArrayView1<f64>) -> Result<Array1<f64>, PipelineError> {
        if row.len() != self.mean.len() {
            return Err(PipelineError::FeatureShapeMismatch(format!(
                "scaler expects {} features, got {}",
                self.mean.len(),
                row.len()
            )));
        }
        Ok(Array1::from_iter(
            row.iter()
                .zip(self.mean.iter().zip(self.scale.iter()))
                .map(|(v, (m, s))| (v - m) / s),
        ))
    }

    /// Scale every row of a matrix
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>, PipelineError> {
        if x.ncols() != self.mean.len() {
            return Err(PipelineError::FeatureShapeMismatch(format!(
                "scaler expects {} features, got {}",
                self.mean.len(),
                x.ncols()
            )));
        }
        let mut out = x.clone();
        for mut row in out.rows_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - self.mean[j]) / self.scale[j];
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fit_transform() {
        let x = array![[1.0, 10.0], [3.0, 10.0]];
        let scaler = StandardScaler::fit(&x).unwrap();
        assert_eq!(scaler.mean(), &[2.0, 10.0]);
        // Constant column keeps unit scale
        assert_eq!(scaler.scale()[1], 1.0);

        let scaled = scaler.transform(&x).unwrap();
        assert!((scaled[[0, 0]] + 1.0).abs() < 1e-12);
        assert!((scaled[[1, 0]] - 1.0).abs() < 1e-12);
        assert_eq!(scaled[[0, 1]], 0.0);
    }

    #[test]
    fn test_row_length_checked() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let scaler = StandardScaler::fit(&x).unwrap();
        let row = array![1.0, 2.0, 3.0];
        assert!(matches!(
            scaler.transform_row(row.view()),
            Err(PipelineError::FeatureShapeMismatch(_))
        ));
    }
}
