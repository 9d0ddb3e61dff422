use anyhow::{Context, Result};
use chrono::Utc;
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::path::Path;

use super::artifact::{EvaluationMetrics, ModelArtifact, ARTIFACT_FORMAT_VERSION};
use super::pipeline::Preprocessor;
use super::regressor::{FittedRegressor, RegressorKind};
use crate::features::{FeatureSet, FeatureTable, TARGET_COLUMN};

/// Below this the held-out split and the folds become meaningless.
pub const MIN_TRAINING_ROWS: usize = 10;

#[derive(Debug, Clone)]
pub struct TrainOptions {
    /// Share of rows held out for evaluation
    pub test_fraction: f64,
    /// Seed for the train/test shuffle
    pub seed: u64,
    /// Cross-validation folds
    pub folds: usize,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            folds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub regressor: RegressorKind,
    pub metrics: EvaluationMetrics,
}

/// Summary written next to the artifact as `<set>_metrics.json`.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub feature_set: FeatureSet,
    pub rows: usize,
    pub train_rows: usize,
    pub test_rows: usize,
    pub candidates: Vec<CandidateReport>,
    /// Name of the selected regressor
    pub best: String,
}

impl TrainingReport {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }
}

/// A fitted preprocessing + regression pair.
struct FittedPipeline {
    preprocessor: Preprocessor,
    model: FittedRegressor,
}

impl FittedPipeline {
    fn fit(kind: RegressorKind, x: &Array2<f64>, y: &[f64]) -> Result<Self> {
        let preprocessor = Preprocessor::fit(x)?;
        let model = kind.fit(&preprocessor.transform(x)?, y)?;
        Ok(Self {
            preprocessor,
            model,
        })
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Vec<f64>> {
        self.model.predict(&self.preprocessor.transform(x)?)
    }
}

/// Train/test matrices after the seeded split.
struct Split {
    x_train: Array2<f64>,
    y_train: Vec<f64>,
    x_test: Array2<f64>,
    y_test: Vec<f64>,
}

/// Fit every candidate regressor on `set`'s columns and keep the one with
/// the best held-out R². Candidates that fail to fit or score are skipped.
pub fn train(
    table: &FeatureTable,
    set: FeatureSet,
    options: &TrainOptions,
) -> Result<(ModelArtifact, TrainingReport)> {
    let x = table.select(set.columns())?;
    let y = table
        .column(TARGET_COLUMN)
        .with_context(|| format!("Feature table has no target column {TARGET_COLUMN:?}"))?;

    let n = x.nrows();
    if n < MIN_TRAINING_ROWS {
        anyhow::bail!("Need at least {MIN_TRAINING_ROWS} rows to train, found {n}");
    }

    let (train_idx, test_idx) = shuffled_split(n, options.test_fraction, options.seed);
    let split = Split {
        x_train: x.select(Axis(0), &train_idx),
        y_train: gather(&y, &train_idx),
        x_test: x.select(Axis(0), &test_idx),
        y_test: gather(&y, &test_idx),
    };

    let mut candidates = Vec::new();
    let mut best: Option<ModelArtifact> = None;

    for kind in RegressorKind::candidates() {
        let (fitted, metrics) = match evaluate(kind, &split, &x, &y, options.folds) {
            Ok(evaluated) => evaluated,
            Err(e) => {
                tracing::warn!(model = kind.name(), "Skipping candidate: {e:#}");
                continue;
            }
        };

        tracing::info!(
            model = kind.name(),
            test_r2 = metrics.test_r2,
            test_rmse = metrics.test_rmse,
            cv_r2_mean = metrics.cv_r2_mean,
            cv_r2_std = metrics.cv_r2_std,
            "Evaluated candidate"
        );

        let improves = match &best {
            None => true,
            Some(b) => metrics.test_r2 > b.metrics.test_r2,
        };

        candidates.push(CandidateReport {
            regressor: kind,
            metrics: metrics.clone(),
        });

        if improves {
            best = Some(ModelArtifact {
                format_version: ARTIFACT_FORMAT_VERSION,
                regressor: kind,
                feature_set: set,
                feature_columns: set.columns().iter().map(|c| c.to_string()).collect(),
                target_column: TARGET_COLUMN.to_string(),
                preprocessor: fitted.preprocessor,
                model: fitted.model,
                metrics,
                training_rows: split.x_train.nrows(),
                trained_at: Utc::now(),
            });
        }
    }

    let best = best.context("No candidate regressor could be fitted")?;
    let report = TrainingReport {
        feature_set: set,
        rows: n,
        train_rows: train_idx.len(),
        test_rows: test_idx.len(),
        candidates,
        best: best.regressor.name().to_string(),
    };
    Ok((best, report))
}

/// Fit on the training split, score on the held-out split and cross-validate.
fn evaluate(
    kind: RegressorKind,
    split: &Split,
    x: &Array2<f64>,
    y: &[f64],
    folds: usize,
) -> Result<(FittedPipeline, EvaluationMetrics)> {
    let fitted = FittedPipeline::fit(kind, &split.x_train, &split.y_train)?;
    let predicted = fitted.predict(&split.x_test)?;
    let (cv_r2_mean, cv_r2_std) = cross_val_r2(kind, x, y, folds)?;

    let metrics = EvaluationMetrics {
        test_r2: r2_score(&split.y_test, &predicted),
        test_rmse: rmse(
            &split.y_test.iter().map(|v| v.exp_m1()).collect::<Vec<_>>(),
            &predicted.iter().map(|v| v.exp_m1()).collect::<Vec<_>>(),
        ),
        cv_r2_mean,
        cv_r2_std,
    };

    // NaN or infinite scores cannot be compared or written as JSON.
    let scores = [metrics.test_r2, metrics.test_rmse, cv_r2_mean, cv_r2_std];
    if scores.iter().any(|v| !v.is_finite()) {
        anyhow::bail!("non-finite evaluation metrics {metrics:?}");
    }
    Ok((fitted, metrics))
}

/// Shuffle row indices with a fixed seed and hold out the first
/// `ceil(n * test_fraction)` of them (at least one row on each side).
fn shuffled_split(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut idx: Vec<usize> = (0..n).collect();
    idx.shuffle(&mut StdRng::seed_from_u64(seed));
    let test_len = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n - 1);
    let train = idx.split_off(test_len);
    (train, idx)
}

fn gather(values: &[f64], idx: &[usize]) -> Vec<f64> {
    idx.iter().map(|&i| values[i]).collect()
}

/// R² over contiguous folds; returns (mean, population std).
fn cross_val_r2(kind: RegressorKind, x: &Array2<f64>, y: &[f64], folds: usize) -> Result<(f64, f64)> {
    let n = x.nrows();
    let folds = folds.clamp(2, n / 2);
    let mut scores = Vec::with_capacity(folds);

    let mut start = 0;
    for fold in 0..folds {
        let len = n / folds + usize::from(fold < n % folds);
        let end = start + len;

        let train_idx: Vec<usize> = (0..start).chain(end..n).collect();
        let test_idx: Vec<usize> = (start..end).collect();
        let fitted = FittedPipeline::fit(kind, &x.select(Axis(0), &train_idx), &gather(y, &train_idx))?;
        let predicted = fitted.predict(&x.select(Axis(0), &test_idx))?;
        scores.push(r2_score(&y[start..end], &predicted));

        start = end;
    }

    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;
    Ok((mean, var.sqrt()))
}

/// Coefficient of determination.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    let mean = actual.iter().sum::<f64>() / actual.len() as f64;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    let sum: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum();
    (sum / actual.len() as f64).sqrt()
}
