use anyhow::{anyhow, Context, Result};
use ndarray::{Array1, Array2, Axis};
use ndarray_stats::interpolate::Midpoint;
use ndarray_stats::QuantileExt;
use noisy_float::types::n64;
use serde::{Deserialize, Serialize};

/// Median imputation followed by standard scaling, fitted column-wise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Preprocessor {
    /// Replacement for NaN inputs, per column
    pub medians: Array1<f64>,
    pub means: Array1<f64>,
    /// Population standard deviations; constant columns use 1.0
    pub scales: Array1<f64>,
}

impl Preprocessor {
    pub fn fit(x: &Array2<f64>) -> Result<Self> {
        if x.nrows() == 0 || x.ncols() == 0 {
            anyhow::bail!("Cannot fit preprocessing on an empty matrix");
        }

        // All-NaN columns have no median; they impute to 0.
        let medians = x
            .to_owned()
            .quantile_axis_skipnan_mut(Axis(0), n64(0.5), &Midpoint)
            .map_err(|e| anyhow!("Failed to compute column medians: {e:?}"))?
            .mapv(|m| if m.is_nan() { 0.0 } else { m });

        let filled = impute(x, &medians);
        let means = filled
            .mean_axis(Axis(0))
            .context("Cannot average an empty matrix")?;
        let scales = filled
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s > f64::EPSILON { s } else { 1.0 });

        Ok(Self {
            medians,
            means,
            scales,
        })
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.width() {
            anyhow::bail!(
                "Matrix has {} columns, preprocessing was fitted on {}",
                x.ncols(),
                self.width()
            );
        }
        Ok((impute(x, &self.medians) - &self.means) / &self.scales)
    }
}

fn impute(x: &Array2<f64>, medians: &Array1<f64>) -> Array2<f64> {
    let mut filled = x.to_owned();
    for (mut column, &median) in filled.axis_iter_mut(Axis(1)).zip(medians) {
        column.mapv_inplace(|v| if v.is_nan() { median } else { v });
    }
    filled
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_medians_even_and_odd() {
        let x = array![[3.0, 4.0], [1.0, 1.0], [2.0, 3.0], [f64::NAN, 2.0]];
        let pre = Preprocessor::fit(&x).unwrap();
        assert_eq!(pre.medians, array![2.0, 2.5]);
    }

    #[test]
    fn test_scaled_columns_have_zero_mean_unit_variance() {
        let x = array![[1.0, 10.0], [2.0, 20.0], [3.0, 30.0], [4.0, 40.0]];
        let scaled = Preprocessor::fit(&x).unwrap().transform(&x).unwrap();
        for column in scaled.axis_iter(Axis(1)) {
            assert!(column.mean().unwrap().abs() < 1e-12);
            assert!((column.var(0.0) - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_nan_is_imputed_with_median() {
        let x = array![[1.0], [f64::NAN], [3.0], [100.0]];
        let pre = Preprocessor::fit(&x).unwrap();
        assert_eq!(pre.medians, array![3.0]);
        let t = pre.transform(&array![[f64::NAN], [3.0]]).unwrap();
        assert_eq!(t[[0, 0]], t[[1, 0]]);
    }

    #[test]
    fn test_all_nan_column_imputes_zero() {
        let x = array![[f64::NAN, 1.0], [f64::NAN, 2.0]];
        let pre = Preprocessor::fit(&x).unwrap();
        assert_eq!(pre.medians[0], 0.0);
        assert!(pre.transform(&x).unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_constant_column_does_not_divide_by_zero() {
        let x = array![[5.0], [5.0], [5.0]];
        let pre = Preprocessor::fit(&x).unwrap();
        assert_eq!(pre.scales, array![1.0]);
        assert_eq!(pre.transform(&array![[5.0]]).unwrap(), array![[0.0]]);
    }

    #[test]
    fn test_wrong_width_rejected() {
        let pre = Preprocessor::fit(&array![[1.0, 2.0], [3.0, 4.0]]).unwrap();
        assert!(pre.transform(&array![[1.0]]).is_err());
        assert!(Preprocessor::fit(&Array2::zeros((0, 2))).is_err());
    }
}
