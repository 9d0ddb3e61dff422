//! Feature engineering: raw repository records to numeric model inputs.
//!
//! - [`extract`] derives a [`RepoFeatures`] row from one record and "now"
//! - [`table`] holds the columnar feature table written by the builder
//! - [`build`] reads persisted search pages and produces the table

pub mod build;
pub mod extract;
pub mod table;

use serde::{Deserialize, Serialize};

pub use build::{build_feature_table, load_raw_pages, BuildReport};
pub use extract::{log1p_filled, RepoFeatures};
pub use table::FeatureTable;

/// Training target: `log1p(stars)`.
pub const TARGET_COLUMN: &str = "log1p_stars";

/// Column order of the prediction form. Fixed external interface.
pub const FORM_COLUMNS: [&str; 10] = [
    "issues",
    "size_kb",
    "topics",
    "commits",
    "commits_per_day",
    "forks_per_day",
    "days_since_update",
    "age_days",
    "has_homepage",
    "recently_updated",
];

/// Columns used by the random-sampling predictor.
pub const RANDOM_COLUMNS: [&str; 12] = [
    "log1p_forks",
    "log1p_issues",
    "log1p_size_kb",
    "age_days",
    "activity_ratio",
    "issues_per_size",
    "log1p_commits",
    "log1p_commits_per_day",
    "log1p_watchers_per_fork",
    "log1p_days_since_update",
    "creation_year",
    "creation_month",
];

/// A named, ordered selection of feature columns used as model input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FeatureSet {
    /// The ten raw columns entered through the web form
    Form,
    /// The twelve log-scaled columns used for random sampling
    Random,
}

impl FeatureSet {
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            FeatureSet::Form => &FORM_COLUMNS,
            FeatureSet::Random => &RANDOM_COLUMNS,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FeatureSet::Form => "form",
            FeatureSet::Random => "random",
        }
    }
}
