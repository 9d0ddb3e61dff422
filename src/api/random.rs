use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::features::{FeatureSet, RepoFeatures};
use crate::github::{CommitSource, GithubClient, SearchQuery};
use crate::model::SharedPredictor;
use crate::models::RandomPrediction;
use crate::state::AppState;

use super::predict::to_star_count;

const SEARCH_PER_PAGE: u32 = 100;

/// Pick up to `n` distinct names without replacement.
pub fn sample_names<R: Rng + ?Sized>(names: &[String], n: usize, rng: &mut R) -> Vec<String> {
    names.choose_multiple(rng, n).cloned().collect()
}

async fn try_predict_one(
    github: &GithubClient,
    model: &SharedPredictor,
    full_name: &str,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> Result<(i64, u64)> {
    let repo = github.repository(full_name).await?;

    let commits = match github.commits_since(full_name, now - window).await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(repo = full_name, "Commit count unavailable, using 0: {e:#}");
            0
        }
    };

    let row = RepoFeatures::extract(&repo, commits, now).vector(FeatureSet::Random);
    let stars = model.predict(&[row])?;
    let predicted = stars
        .first()
        .copied()
        .context("Model returned no prediction")?;
    Ok((to_star_count(predicted), repo.stargazers_count))
}

/// Predict one sampled repository; failures are reported inline.
pub async fn predict_one(
    github: &GithubClient,
    model: &SharedPredictor,
    full_name: &str,
    now: DateTime<Utc>,
    window: chrono::Duration,
) -> RandomPrediction {
    match try_predict_one(github, model, full_name, now, window).await {
        Ok((predicted_stars, actual_stars)) => RandomPrediction::Predicted {
            repo: full_name.to_string(),
            predicted_stars,
            actual_stars,
        },
        Err(e) => {
            tracing::warn!(repo = full_name, "Random prediction failed: {e:#}");
            RandomPrediction::Failed {
                repo: full_name.to_string(),
                error: format!("{e:#}"),
            }
        }
    }
}

/// GET /predict_random_repos - Predict stars for a random sample of popular repos
pub async fn predict_random_repos(
    State(state): State<AppState>,
) -> Result<Json<Vec<RandomPrediction>>, (StatusCode, String)> {
    let (Some(github), Some(model)) = (&state.github, &state.random_model) else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Random-repo predictions are not configured".to_string(),
        ));
    };
    let serving = &state.config.serving;

    let page = rand::thread_rng().gen_range(1..=serving.random_max_page.max(1));
    let query = SearchQuery::new(serving.random_query.as_str(), page, SEARCH_PER_PAGE);
    let names = github.search_full_names(&query).await.map_err(|e| {
        tracing::error!(page, "Repository search failed: {e:#}");
        (
            StatusCode::BAD_GATEWAY,
            format!("Repository search failed: {e:#}"),
        )
    })?;

    let sample = sample_names(&names, serving.random_sample_size, &mut rand::thread_rng());
    tracing::info!(page, sampled = sample.len(), "Predicting random repositories");

    let now = Utc::now();
    let window = chrono::Duration::days(state.config.collector.commit_window_days);
    let results = join_all(
        sample
            .iter()
            .map(|name| predict_one(github, model, name, now, window)),
    )
    .await;

    Ok(Json(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("owner/repo{i}")).collect()
    }

    #[test]
    fn test_sample_is_distinct_and_sized() {
        let mut rng = StdRng::seed_from_u64(7);
        let sample = sample_names(&names(100), 5, &mut rng);
        assert_eq!(sample.len(), 5);
        assert_eq!(sample.iter().collect::<HashSet<_>>().len(), 5);
    }

    #[test]
    fn test_sample_smaller_population() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(sample_names(&names(3), 5, &mut rng).len(), 3);
        assert!(sample_names(&[], 5, &mut rng).is_empty());
    }

    #[test]
    fn test_sample_is_seed_deterministic() {
        let a = sample_names(&names(50), 5, &mut StdRng::seed_from_u64(1));
        let b = sample_names(&names(50), 5, &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
    }
}
