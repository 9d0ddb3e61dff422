use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Html;
use axum::Form;
use std::collections::HashMap;

use crate::broker::BrokerError;
use crate::features::FORM_COLUMNS;
use crate::models::{RankedRepo, RepoInput, BATCH_SIZE};
use crate::state::AppState;

/// Form submission decoded into model rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBatch {
    pub repos: Vec<RepoInput>,
    /// Field names whose values were present but not numbers
    pub coerced: Vec<String>,
}

/// Parse a form value; blank or missing is `Ok(None)`.
fn parse_value(raw: Option<&String>) -> Result<Option<f64>, ()> {
    match raw.map(|v| v.trim()) {
        None | Some("") => Ok(None),
        Some(v) => v.parse::<f64>().map(Some).map_err(|_| ()),
    }
}

/// Read `name{i}` and `<column>{i}` for each of the five slots. Never
/// fails: unusable values become 0.0.
pub fn parse_form(form: &HashMap<String, String>) -> ParsedBatch {
    let mut coerced = Vec::new();
    let repos = (1..=BATCH_SIZE)
        .map(|i| {
            let name = form
                .get(&format!("name{i}"))
                .map(|n| n.trim())
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Repo {i}"));

            let features = FORM_COLUMNS
                .iter()
                .map(|col| {
                    let key = format!("{col}{i}");
                    match parse_value(form.get(&key)) {
                        Ok(v) => v.unwrap_or(0.0),
                        Err(()) => {
                            coerced.push(key);
                            0.0
                        }
                    }
                })
                .collect();

            RepoInput { name, features }
        })
        .collect();

    ParsedBatch { repos, coerced }
}

/// Whole stars for display. Negative and NaN predictions become 0.
pub fn to_star_count(prediction: f64) -> i64 {
    if prediction.is_nan() {
        return 0;
    }
    prediction.round().max(0.0) as i64
}

/// Pair names with predictions and sort by predicted stars, highest first.
/// Ties keep submission order.
pub fn rank(repos: Vec<RepoInput>, predictions: &[f64]) -> Vec<RankedRepo> {
    let mut ranked: Vec<(RepoInput, f64)> = repos.into_iter().zip(predictions.iter().copied()).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
        .into_iter()
        .map(|(repo, p)| RankedRepo {
            name: repo.name,
            predicted_stars: to_star_count(p),
        })
        .collect()
}

pub fn render_results(ranked: &[RankedRepo], coerced: &[String]) -> String {
    let mut html = String::from("<div class=\"results\">\n<h2>Predicted ranking</h2>\n<ol>\n");
    for repo in ranked {
        html.push_str(&format!(
            "<li><strong>{}</strong>: {} stars</li>\n",
            html_escape::encode_text(&repo.name),
            repo.predicted_stars
        ));
    }
    html.push_str("</ol>\n");
    if !coerced.is_empty() {
        html.push_str(&format!(
            "<p class=\"warning\">{} invalid value(s) treated as 0: {}</p>\n",
            coerced.len(),
            html_escape::encode_text(&coerced.join(", "))
        ));
    }
    html.push_str("</div>\n");
    html
}

pub fn render_error(message: &str) -> String {
    format!(
        "<div class=\"error\"><p>Prediction failed: {}</p></div>\n",
        html_escape::encode_text(message)
    )
}

fn status_for(err: &BrokerError) -> StatusCode {
    match err {
        BrokerError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        BrokerError::Closed | BrokerError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn predict_batch(state: &AppState, repos: &[RepoInput]) -> Result<Vec<f64>, BrokerError> {
    let rows = repos.iter().map(|r| r.features.clone()).collect();
    let predictions = state.broker.predict(rows, state.result_timeout()).await?;
    if predictions.len() != repos.len() {
        return Err(BrokerError::Worker(format!(
            "expected {} predictions, got {}",
            repos.len(),
            predictions.len()
        )));
    }
    tracing::debug!(count = predictions.len(), "Received predictions");
    Ok(predictions)
}

/// POST /predict - Rank five repositories by predicted stars
pub async fn predict(
    State(state): State<AppState>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Html<String>) {
    let batch = parse_form(&form);
    if !batch.coerced.is_empty() {
        tracing::warn!(
            count = batch.coerced.len(),
            fields = ?batch.coerced,
            "Coerced non-numeric form values to 0"
        );
    }

    match predict_batch(&state, &batch.repos).await {
        Ok(predictions) => {
            let ranked = rank(batch.repos, &predictions);
            (
                StatusCode::OK,
                Html(render_results(&ranked, &batch.coerced)),
            )
        }
        Err(e) => {
            tracing::error!("Form prediction failed: {e}");
            (status_for(&e), Html(render_error(&e.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_full_form_in_column_order() {
        let mut fields = HashMap::new();
        for i in 1..=5 {
            fields.insert(format!("name{i}"), format!("r{i}"));
            for (j, col) in FORM_COLUMNS.iter().enumerate() {
                fields.insert(format!("{col}{i}"), (i * 100 + j).to_string());
            }
        }

        let batch = parse_form(&fields);
        assert!(batch.coerced.is_empty());
        assert_eq!(batch.repos.len(), 5);
        assert_eq!(batch.repos[2].name, "r3");
        assert_eq!(batch.repos[2].features.len(), FORM_COLUMNS.len());
        assert_eq!(batch.repos[2].features[0], 300.0);
        assert_eq!(batch.repos[2].features[9], 309.0);
    }

    #[test]
    fn test_invalid_values_coerced_and_reported() {
        let batch = parse_form(&form(&[("issues1", "abc"), ("size_kb1", " 12.5 "), ("topics1", "")]));
        let first = &batch.repos[0].features;
        assert_eq!(first[0], 0.0);
        assert_eq!(first[1], 12.5);
        assert_eq!(first[2], 0.0);
        assert_eq!(batch.coerced, vec!["issues1".to_string()]);
    }

    #[test]
    fn test_missing_names_default() {
        let batch = parse_form(&form(&[("name2", "octo/widgets"), ("name4", "   ")]));
        let names: Vec<&str> = batch.repos.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Repo 1", "octo/widgets", "Repo 3", "Repo 4", "Repo 5"]);
        assert!(batch.repos.iter().all(|r| r.features.iter().all(|v| *v == 0.0)));
    }

    #[test]
    fn test_rank_sorts_descending_and_keeps_ties_stable() {
        let repos = ["A", "B", "C", "D", "E"]
            .iter()
            .map(|n| RepoInput {
                name: n.to_string(),
                features: vec![],
            })
            .collect();
        let ranked = rank(repos, &[10.0, 50.0, 30.0, 50.0, 5.0]);
        let names: Vec<&str> = ranked.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["B", "D", "C", "A", "E"]);
        assert_eq!(ranked[0].predicted_stars, 50);
    }

    #[test]
    fn test_to_star_count() {
        assert_eq!(to_star_count(41.6), 42);
        assert_eq!(to_star_count(-3.0), 0);
        assert_eq!(to_star_count(f64::NAN), 0);
    }

    #[test]
    fn test_render_escapes_names() {
        let html = render_results(
            &[RankedRepo {
                name: "<script>".to_string(),
                predicted_stars: 7,
            }],
            &["issues1".to_string()],
        );
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("7 stars"));
        assert!(html.contains("1 invalid value(s)"));
        assert!(render_error("a & b").contains("a &amp; b"));
    }

    #[test]
    fn test_user_markup_is_escaped_everywhere() {
        let name = "x</strong><img src=x onerror=alert(1)>";
        let html = render_results(
            &[RankedRepo {
                name: name.to_string(),
                predicted_stars: 1,
            }],
            &["<b>issues2</b>".to_string()],
        );
        assert!(!html.contains("<img"));
        assert!(!html.contains("<b>"));
        assert!(html.contains("x&lt;/strong&gt;&lt;img src=x onerror=alert(1)&gt;"));
        assert!(!render_error("<i>down</i>").contains("<i>"));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_for(&BrokerError::Timeout(std::time::Duration::from_secs(1))),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(status_for(&BrokerError::Closed), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_for(&BrokerError::QueueFull(std::time::Duration::from_secs(1))),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&BrokerError::Worker("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
