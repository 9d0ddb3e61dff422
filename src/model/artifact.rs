use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::pipeline::Preprocessor;
use super::regressor::{FittedRegressor, RegressorKind};
use super::Predictor;
use crate::features::{FeatureSet, TARGET_COLUMN};

/// Bumped whenever the serialized layout changes.
pub const ARTIFACT_FORMAT_VERSION: u32 = 2;

/// Held-out evaluation of one fitted candidate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationMetrics {
    /// R² on the held-out split, in log space
    pub test_r2: f64,
    /// RMSE on the held-out split, in star counts
    pub test_rmse: f64,
    pub cv_r2_mean: f64,
    pub cv_r2_std: f64,
}

/// A trained preprocessing + regression pipeline predicting `log1p(stars)`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub regressor: RegressorKind,
    pub feature_set: FeatureSet,
    /// Input column names, in the order rows must be supplied
    pub feature_columns: Vec<String>,
    pub target_column: String,
    pub preprocessor: Preprocessor,
    pub model: FittedRegressor,
    pub metrics: EvaluationMetrics,
    pub training_rows: usize,
    pub trained_at: DateTime<Utc>,
}

impl ModelArtifact {
    /// Log-space predictions, one per row, in a single pass.
    pub fn predict_log(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        let width = self.feature_columns.len();
        if let Some(i) = rows.iter().position(|r| r.len() != width) {
            anyhow::bail!(
                "Row {i} has {} features but the {} model expects {width}",
                rows[i].len(),
                self.feature_set.name()
            );
        }

        let x = Array2::from_shape_vec((rows.len(), width), rows.concat())
            .context("Failed to assemble feature matrix")?;
        self.model.predict(&self.preprocessor.transform(&x)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model artifact {}", path.display()))?;
        let artifact: Self = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse model artifact {}", path.display()))?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<()> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            anyhow::bail!(
                "Unsupported artifact format version {} (expected {ARTIFACT_FORMAT_VERSION})",
                self.format_version
            );
        }
        if self.target_column != TARGET_COLUMN {
            anyhow::bail!("Artifact predicts {:?}, expected {TARGET_COLUMN:?}", self.target_column);
        }
        let width = self.feature_columns.len();
        if self.preprocessor.width() != width {
            anyhow::bail!("Artifact dimensions do not match its {width} feature columns");
        }
        if self.model.name() != self.regressor.name() {
            anyhow::bail!(
                "Artifact declares a {} regressor but stores a {} model",
                self.regressor.name(),
                self.model.name()
            );
        }
        Ok(())
    }
}

impl Predictor for ModelArtifact {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        Ok(self
            .predict_log(rows)?
            .into_iter()
            .map(f64::exp_m1)
            .collect())
    }

    fn feature_count(&self) -> usize {
        self.feature_columns.len()
    }
}
