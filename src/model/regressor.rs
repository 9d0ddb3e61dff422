use anyhow::{anyhow, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::lasso::{Lasso, LassoParameters};
use smartcore::linear::linear_regression::{
    LinearRegression, LinearRegressionParameters, LinearRegressionSolverName,
};
use smartcore::linear::ridge_regression::{RidgeRegression, RidgeRegressionParameters};
use std::fmt;

/// Fixed so retraining on the same table picks the same bootstrap samples.
const FOREST_SEED: u64 = 42;

type Matrix = DenseMatrix<f64>;

/// Regressors fitted on standardized inputs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegressorKind {
    /// Ordinary least squares
    Linear,
    /// L2-penalised least squares
    Ridge { alpha: f64 },
    /// L1-penalised least squares
    Lasso { alpha: f64 },
    /// Bagged regression trees; `max_depth: None` grows trees fully
    RandomForest { trees: usize, max_depth: Option<u16> },
}

impl RegressorKind {
    /// The candidates compared by the trainer.
    pub fn candidates() -> [RegressorKind; 4] {
        [
            RegressorKind::Linear,
            RegressorKind::Ridge { alpha: 1.0 },
            RegressorKind::Lasso { alpha: 0.1 },
            RegressorKind::RandomForest {
                trees: 100,
                max_depth: None,
            },
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            RegressorKind::Linear => "linear",
            RegressorKind::Ridge { .. } => "ridge",
            RegressorKind::Lasso { .. } => "lasso",
            RegressorKind::RandomForest { .. } => "random_forest",
        }
    }

    /// Fit on already-preprocessed inputs. The linear models fit their own
    /// intercept and are told not to rescale again.
    pub fn fit(&self, x: &Array2<f64>, y: &[f64]) -> Result<FittedRegressor> {
        if x.nrows() == 0 || x.nrows() != y.len() {
            anyhow::bail!(
                "Expected one target per row, got {} rows and {} targets",
                x.nrows(),
                y.len()
            );
        }

        let matrix = dense(x);
        let y = y.to_vec();
        let fitted = match *self {
            RegressorKind::Linear => LinearRegression::fit(
                &matrix,
                &y,
                LinearRegressionParameters::default().with_solver(LinearRegressionSolverName::SVD),
            )
            .map(FittedRegressor::Linear),
            RegressorKind::Ridge { alpha } => RidgeRegression::fit(
                &matrix,
                &y,
                RidgeRegressionParameters::default()
                    .with_alpha(alpha)
                    .with_normalize(false),
            )
            .map(FittedRegressor::Ridge),
            RegressorKind::Lasso { alpha } => Lasso::fit(
                &matrix,
                &y,
                LassoParameters::default()
                    .with_alpha(alpha)
                    .with_normalize(false),
            )
            .map(FittedRegressor::Lasso),
            RegressorKind::RandomForest { trees, max_depth } => {
                let mut params = RandomForestRegressorParameters::default()
                    .with_n_trees(trees)
                    .with_seed(FOREST_SEED);
                if let Some(depth) = max_depth {
                    params = params.with_max_depth(depth);
                }
                RandomForestRegressor::fit(&matrix, &y, params).map(FittedRegressor::RandomForest)
            }
        };

        fitted.map_err(|e| anyhow!("Fitting {} regressor failed: {e}", self.name()))
    }
}

/// A fitted model, persisted inside the artifact.
#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", content = "model", rename_all = "snake_case")]
pub enum FittedRegressor {
    Linear(LinearRegression<f64, f64, Matrix, Vec<f64>>),
    Ridge(RidgeRegression<f64, f64, Matrix, Vec<f64>>),
    Lasso(Lasso<f64, f64, Matrix, Vec<f64>>),
    RandomForest(RandomForestRegressor<f64, f64, Matrix, Vec<f64>>),
}

impl FittedRegressor {
    /// Name of the matching [`RegressorKind`].
    pub fn name(&self) -> &'static str {
        match self {
            FittedRegressor::Linear(_) => "linear",
            FittedRegressor::Ridge(_) => "ridge",
            FittedRegressor::Lasso(_) => "lasso",
            FittedRegressor::RandomForest(_) => "random_forest",
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        if x.nrows() == 0 {
            return Ok(Vec::new());
        }
        let matrix = dense(x);
        let predicted = match self {
            FittedRegressor::Linear(m) => m.predict(&matrix),
            FittedRegressor::Ridge(m) => m.predict(&matrix),
            FittedRegressor::Lasso(m) => m.predict(&matrix),
            FittedRegressor::RandomForest(m) => m.predict(&matrix),
        };
        predicted.map_err(|e| anyhow!("{} prediction failed: {e}", self.name()))
    }
}

impl fmt::Debug for FittedRegressor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FittedRegressor").field(&self.name()).finish()
    }
}

fn dense(x: &Array2<f64>) -> Matrix {
    let rows: Vec<Vec<f64>> = x.outer_iter().map(|row| row.to_vec()).collect();
    DenseMatrix::from_2d_vec(&rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    /// y = 3·x0 - 2·x1 + 5.
    fn exact_data() -> (Array2<f64>, Vec<f64>) {
        let x = array![
            [-1.5, 0.5],
            [-0.5, -1.0],
            [0.5, 1.0],
            [1.5, -0.5],
            [0.0, 0.0],
            [1.0, 2.0],
        ];
        let y = x
            .outer_iter()
            .map(|r| 3.0 * r[0] - 2.0 * r[1] + 5.0)
            .collect();
        (x, y)
    }

    #[test]
    fn test_linear_recovers_exact_relation() {
        let (x, y) = exact_data();
        let model = RegressorKind::Linear.fit(&x, &y).unwrap();
        let predicted = model.predict(&array![[1.0, 1.0], [0.0, 0.0]]).unwrap();
        assert!((predicted[0] - 6.0).abs() < 1e-6, "{predicted:?}");
        assert!((predicted[1] - 5.0).abs() < 1e-6, "{predicted:?}");
    }

    #[test]
    fn test_ridge_shrinks_towards_the_mean() {
        let (x, y) = exact_data();
        let far = array![[4.0, -4.0]];
        let ols = RegressorKind::Linear.fit(&x, &y).unwrap().predict(&far).unwrap()[0];
        let ridge = RegressorKind::Ridge { alpha: 10.0 }
            .fit(&x, &y)
            .unwrap()
            .predict(&far)
            .unwrap()[0];
        let mean = y.iter().sum::<f64>() / y.len() as f64;
        assert!((ridge - mean).abs() < (ols - mean).abs());
    }

    #[test]
    fn test_lasso_fits_dominant_column() {
        let x = Array2::from_shape_fn((20, 2), |(i, j)| {
            if j == 0 {
                i as f64 - 9.5
            } else if i % 2 == 0 {
                0.01
            } else {
                -0.01
            }
        });
        let y: Vec<f64> = x.column(0).iter().map(|a| 2.0 * a).collect();
        let model = RegressorKind::Lasso { alpha: 0.1 }.fit(&x, &y).unwrap();
        let predicted = model.predict(&array![[5.0, 0.0]]).unwrap();
        assert!((predicted[0] - 10.0).abs() < 0.5, "{predicted:?}");
    }

    #[test]
    fn test_forest_learns_a_threshold() {
        let x = Array2::from_shape_fn((40, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 3) as f64 });
        let y: Vec<f64> = x.column(0).iter().map(|&v| if v < 20.0 { 1.0 } else { 5.0 }).collect();
        let kind = RegressorKind::RandomForest {
            trees: 20,
            max_depth: Some(4),
        };
        let model = kind.fit(&x, &y).unwrap();
        let predicted = model.predict(&array![[3.0, 0.0], [35.0, 1.0]]).unwrap();
        assert!(predicted[0] < 2.0, "{predicted:?}");
        assert!(predicted[1] > 4.0, "{predicted:?}");
    }

    #[test]
    fn test_fitted_model_survives_serde() {
        let (x, y) = exact_data();
        for kind in RegressorKind::candidates() {
            let model = kind.fit(&x, &y).unwrap();
            let json = serde_json::to_string(&model).unwrap();
            let restored: FittedRegressor = serde_json::from_str(&json).unwrap();
            assert_eq!(restored.name(), kind.name());
            let before = model.predict(&x).unwrap();
            let after = restored.predict(&x).unwrap();
            for (a, b) in before.iter().zip(&after) {
                assert!((a - b).abs() < 1e-9, "{}: {a} vs {b}", kind.name());
            }
        }
    }

    #[test]
    fn test_mismatched_targets_rejected() {
        let x = array![[1.0]];
        assert!(RegressorKind::Linear.fit(&x, &[1.0, 2.0]).is_err());
    }

    #[test]
    fn test_kind_serializes_with_tag() {
        let json = serde_json::to_value(RegressorKind::Ridge { alpha: 1.0 }).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "ridge", "alpha": 1.0}));
        let forest = serde_json::to_value(RegressorKind::RandomForest {
            trees: 100,
            max_depth: None,
        })
        .unwrap();
        assert_eq!(
            forest,
            serde_json::json!({"kind": "random_forest", "trees": 100, "max_depth": null})
        );
    }
}
