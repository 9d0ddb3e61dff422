use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of repositories submitted together by the prediction form.
pub const BATCH_SIZE: usize = 5;

/// A repository record as returned by the GitHub search and repository APIs.
///
/// Only the fields used for feature engineering are decoded; the collector
/// persists the full response untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRepo {
    pub full_name: String,
    #[serde(default)]
    pub stargazers_count: u64,
    #[serde(default)]
    pub forks_count: u64,
    #[serde(default)]
    pub watchers_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
    /// Repository size in kilobytes
    #[serde(default)]
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub pushed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl RawRepo {
    pub fn has_homepage(&self) -> bool {
        self.homepage
            .as_deref()
            .is_some_and(|h| !h.trim().is_empty())
    }
}

/// One named row of the prediction form.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoInput {
    pub name: String,
    pub features: Vec<f64>,
}

/// A repository annotated with its predicted star count.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RankedRepo {
    pub name: String,
    pub predicted_stars: i64,
}

/// Per-repository outcome of the random-sampling predictor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RandomPrediction {
    Predicted {
        repo: String,
        predicted_stars: i64,
        actual_stars: u64,
    },
    Failed {
        repo: String,
        error: String,
    },
}

impl RandomPrediction {
    pub fn repo(&self) -> &str {
        match self {
            RandomPrediction::Predicted { repo, .. } | RandomPrediction::Failed { repo, .. } => {
                repo
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo_json() -> serde_json::Value {
        serde_json::json!({
            "full_name": "octo/widgets",
            "stargazers_count": 120,
            "forks_count": 7,
            "watchers_count": 120,
            "open_issues_count": 3,
            "size": 2048,
            "created_at": "2020-01-15T10:00:00Z",
            "updated_at": "2024-05-01T08:30:00Z",
            "pushed_at": null,
            "topics": ["cli", "rust"],
            "homepage": "",
            "language": "Rust",
            "owner": {"login": "octo"}
        })
    }

    #[test]
    fn test_raw_repo_ignores_unknown_fields() {
        let repo: RawRepo = serde_json::from_value(repo_json()).unwrap();
        assert_eq!(repo.full_name, "octo/widgets");
        assert_eq!(repo.topics.len(), 2);
        assert!(repo.pushed_at.is_none());
    }

    #[test]
    fn test_empty_homepage_is_not_a_homepage() {
        let mut repo: RawRepo = serde_json::from_value(repo_json()).unwrap();
        assert!(!repo.has_homepage());
        repo.homepage = Some("https://widgets.dev".to_string());
        assert!(repo.has_homepage());
    }

    #[test]
    fn test_random_prediction_serializes_without_tag() {
        let ok = RandomPrediction::Predicted {
            repo: "a/b".to_string(),
            predicted_stars: 10,
            actual_stars: 12,
        };
        let failed = RandomPrediction::Failed {
            repo: "c/d".to_string(),
            error: "boom".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            serde_json::json!({"repo": "a/b", "predicted_stars": 10, "actual_stars": 12})
        );
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            serde_json::json!({"repo": "c/d", "error": "boom"})
        );
    }
}
