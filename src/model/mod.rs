//! Star-count regression: preprocessing, regressors, training and the
//! persisted model artifact.

pub mod artifact;
pub mod pipeline;
pub mod regressor;
pub mod train;

use anyhow::Result;
use std::sync::Arc;

pub use artifact::{EvaluationMetrics, ModelArtifact, ARTIFACT_FORMAT_VERSION};
pub use regressor::{FittedRegressor, RegressorKind};
pub use train::{train, TrainOptions, TrainingReport};

/// Anything that turns feature rows into star counts.
///
/// Implementations must be immutable once built: a single instance is
/// shared by every worker in a process.
pub trait Predictor: Send + Sync {
    /// Predicted star counts (original scale), one per row.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>>;

    /// Number of values expected in each row.
    fn feature_count(&self) -> usize;
}

/// Process-wide handle to a loaded model.
pub type SharedPredictor = Arc<dyn Predictor>;

/// Load an artifact once and wrap it in a shared handle.
pub fn load_shared(path: &std::path::Path) -> Result<SharedPredictor> {
    let artifact = ModelArtifact::load(path)?;
    tracing::info!(
        path = %path.display(),
        regressor = artifact.regressor.name(),
        feature_set = artifact.feature_set.name(),
        test_r2 = artifact.metrics.test_r2,
        "Loaded model artifact"
    );
    Ok(Arc::new(artifact))
}
