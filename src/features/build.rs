use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use futures_util::stream::{self, StreamExt};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::extract::RepoFeatures;
use super::table::FeatureTable;
use crate::github::CommitSource;
use crate::models::RawRepo;

/// Items of one persisted search page.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub path: PathBuf,
    pub items: Vec<serde_json::Value>,
}

/// Counters reported after a feature build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub pages: usize,
    pub rows: usize,
    /// Items that could not be decoded as a repository record
    pub skipped_items: usize,
    /// Repositories whose commit count fell back to zero
    pub commit_failures: usize,
}

fn is_page_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy())
        .is_some_and(|n| n.starts_with("repos_page_") && n.ends_with(".json"))
}

/// Read every `repos_page_*.json` in `raw_dir`, in file name order.
pub fn load_raw_pages(raw_dir: &Path) -> Result<Vec<RawPage>> {
    let mut pages = Vec::new();

    for entry in WalkDir::new(raw_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("Failed to list {}", raw_dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !is_page_file(path) {
            continue;
        }

        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let mut page: serde_json::Value = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let items = match page.get_mut("items").map(serde_json::Value::take) {
            Some(serde_json::Value::Array(items)) => items,
            _ => {
                tracing::warn!(path = %path.display(), "Search page has no items array");
                Vec::new()
            }
        };

        pages.push(RawPage {
            path: path.to_path_buf(),
            items,
        });
    }

    Ok(pages)
}

/// Build the feature table for every repository in `raw_dir`.
///
/// Commit counts over the `commit_window` before `now` are fetched with at
/// most `concurrency` requests in flight. A failed count is logged and
/// recorded as zero; it never aborts the build.
pub async fn build_feature_table<C>(
    raw_dir: &Path,
    commits: &C,
    now: DateTime<Utc>,
    commit_window: Duration,
    concurrency: usize,
) -> Result<(FeatureTable, BuildReport)>
where
    C: CommitSource + ?Sized,
{
    let pages = load_raw_pages(raw_dir)?;
    if pages.is_empty() {
        anyhow::bail!("No repos_page_*.json files found in {}", raw_dir.display());
    }

    let mut report = BuildReport {
        pages: pages.len(),
        ..BuildReport::default()
    };

    let mut repos = Vec::new();
    for page in pages {
        for item in page.items {
            match serde_json::from_value::<RawRepo>(item) {
                Ok(repo) => repos.push(repo),
                Err(e) => {
                    report.skipped_items += 1;
                    tracing::warn!(path = %page.path.display(), "Skipping undecodable item: {e}");
                }
            }
        }
    }

    let since = now - commit_window;
    let counts: Vec<Result<u64>> = stream::iter(repos.iter())
        .map(|repo| commits.commits_since(&repo.full_name, since))
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut rows = Vec::with_capacity(repos.len());
    for (repo, count) in repos.iter().zip(counts) {
        let count = match count {
            Ok(n) => n,
            Err(e) => {
                report.commit_failures += 1;
                tracing::warn!("Commit count for {} failed, using 0: {e:#}", repo.full_name);
                0
            }
        };
        rows.push(RepoFeatures::extract(repo, count, now));
    }

    report.rows = rows.len();
    Ok((FeatureTable::from_rows(&rows)?, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Fails for any repository whose name contains "broken".
    struct FakeCommits;

    #[async_trait]
    impl CommitSource for FakeCommits {
        async fn commits_since(&self, full_name: &str, _since: DateTime<Utc>) -> Result<u64> {
            if full_name.contains("broken") {
                anyhow::bail!("GitHub API returned 409 Conflict: Git Repository is empty.");
            }
            Ok(full_name.len() as u64)
        }
    }

    fn item(name: &str, stars: u64, language: &str) -> serde_json::Value {
        serde_json::json!({
            "full_name": name,
            "stargazers_count": stars,
            "forks_count": 3,
            "watchers_count": stars,
            "open_issues_count": 2,
            "size": 100,
            "created_at": "2021-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z",
            "pushed_at": "2024-01-01T00:00:00Z",
            "topics": ["a"],
            "homepage": null,
            "language": language
        })
    }

    fn write_page(dir: &Path, file: &str, items: Vec<serde_json::Value>) {
        let page = serde_json::json!({"total_count": items.len(), "items": items});
        std::fs::write(dir.join(file), serde_json::to_string(&page).unwrap()).unwrap();
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_load_raw_pages_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        write_page(dir.path(), "repos_page_02.json", vec![item("b/b", 1, "Go")]);
        write_page(dir.path(), "repos_page_01.json", vec![item("a/a", 1, "Go")]);
        std::fs::write(dir.path().join("notes.json"), "{}").unwrap();

        let pages = load_raw_pages(dir.path()).unwrap();
        assert_eq!(pages.len(), 2);
        assert!(pages[0].path.ends_with("repos_page_01.json"));
        assert_eq!(pages[1].items[0]["full_name"], "b/b");
    }

    #[tokio::test]
    async fn test_commit_failure_defaults_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        write_page(
            dir.path(),
            "repos_page_01.json",
            vec![item("ok/first", 10, "Python"), item("broken/repo", 20, "Python")],
        );

        let (table, report) =
            build_feature_table(dir.path(), &FakeCommits, now(), Duration::days(30), 2)
                .await
                .unwrap();

        assert_eq!(report.rows, 2);
        assert_eq!(report.commit_failures, 1);
        assert_eq!(table.column("commits").unwrap(), &[8.0, 0.0]);
    }

    #[tokio::test]
    async fn test_rows_follow_page_order_and_skip_bad_items() {
        let dir = tempfile::tempdir().unwrap();
        write_page(
            dir.path(),
            "repos_page_01.json",
            vec![item("a/first", 1, "Rust"), serde_json::json!({"full_name": "no/dates"})],
        );
        write_page(dir.path(), "repos_page_02.json", vec![item("b/second", 2, "Go")]);

        let (table, report) =
            build_feature_table(dir.path(), &FakeCommits, now(), Duration::days(30), 4)
                .await
                .unwrap();

        assert_eq!(table.full_names(), vec!["a/first", "b/second"]);
        assert_eq!(report.pages, 2);
        assert_eq!(report.skipped_items, 1);
        assert_eq!(table.column("days_since_update").unwrap(), &[10.0, 10.0]);
        assert_eq!(table.column("lang_Go").unwrap(), &[0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            build_feature_table(dir.path(), &FakeCommits, now(), Duration::days(30), 1).await;
        assert!(result.is_err());
    }
}
