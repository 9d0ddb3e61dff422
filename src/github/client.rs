use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::config::GithubConfig;
use crate::models::RawRepo;

const USER_AGENT: &str = concat!("star-predictor/", env!("CARGO_PKG_VERSION"));

/// Commit listing is capped at one page, so counts saturate at this value.
const COMMITS_PER_PAGE: u32 = 100;

/// One page of a repository search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub q: String,
    pub page: u32,
    pub per_page: u32,
}

impl SearchQuery {
    pub fn new(q: impl Into<String>, page: u32, per_page: u32) -> Self {
        Self {
            q: q.into(),
            page,
            per_page,
        }
    }
}

#[derive(Deserialize)]
struct SearchItems {
    #[serde(default)]
    items: Vec<SearchItemName>,
}

#[derive(Deserialize)]
struct SearchItemName {
    full_name: String,
}

/// Source of recent commit counts. Implemented by [`GithubClient`]; the
/// feature builder is generic over it so it can run offline and in tests.
#[async_trait]
pub trait CommitSource: Send + Sync {
    /// Number of commits on the default branch since `since`.
    async fn commits_since(&self, full_name: &str, since: DateTime<Utc>) -> Result<u64>;
}

/// Commit source for offline feature builds: every count is zero.
pub struct OfflineCommits;

#[async_trait]
impl CommitSource for OfflineCommits {
    async fn commits_since(&self, _full_name: &str, _since: DateTime<Utc>) -> Result<u64> {
        Ok(0)
    }
}

/// Thin authenticated client for the GitHub REST API.
#[derive(Clone)]
pub struct GithubClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

/// Read a personal access token from disk, trimming surrounding whitespace.
pub fn read_token(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read GitHub token from {}", path.display()))?;
    let token = raw.trim().to_string();
    if token.is_empty() {
        anyhow::bail!("GitHub token file {} is empty", path.display());
    }
    Ok(token)
}

impl GithubClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Build a client from configuration. The token file must exist.
    pub fn from_config(config: &GithubConfig) -> Result<Self> {
        let token = read_token(&config.token_path)?;
        Self::new(
            &config.api_base_url,
            Some(token),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let req = self
            .client
            .get(format!("{}{path}", self.base_url))
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Fetch one search page and return the response body untouched.
    pub async fn search_page(&self, query: &SearchQuery) -> Result<serde_json::Value> {
        let resp = self
            .get("/search/repositories")
            .query(&[
                ("q", query.q.as_str()),
                ("sort", "stars"),
                ("order", "desc"),
            ])
            .query(&[("per_page", query.per_page), ("page", query.page)])
            .send()
            .await
            .context("Failed to call GitHub search API")?;

        let resp = ensure_success(resp).await?;
        resp.json()
            .await
            .context("Failed to parse GitHub search response")
    }

    /// Full names of the repositories on one search page, in result order.
    pub async fn search_full_names(&self, query: &SearchQuery) -> Result<Vec<String>> {
        let page = self.search_page(query).await?;
        let items: SearchItems =
            serde_json::from_value(page).context("Search response has no usable items")?;
        Ok(items.items.into_iter().map(|i| i.full_name).collect())
    }

    pub async fn repository(&self, full_name: &str) -> Result<RawRepo> {
        let resp = self
            .get(&format!("/repos/{full_name}"))
            .send()
            .await
            .with_context(|| format!("Failed to fetch repository {full_name}"))?;

        let resp = ensure_success(resp).await?;
        resp.json()
            .await
            .with_context(|| format!("Failed to parse repository {full_name}"))
    }
}

#[async_trait]
impl CommitSource for GithubClient {
    async fn commits_since(&self, full_name: &str, since: DateTime<Utc>) -> Result<u64> {
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let resp = self
            .get(&format!("/repos/{full_name}/commits"))
            .query(&[("since", since)])
            .query(&[("per_page", COMMITS_PER_PAGE)])
            .send()
            .await
            .with_context(|| format!("Failed to list commits for {full_name}"))?;

        let resp = ensure_success(resp).await?;
        let commits: Vec<serde_json::Value> = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse commits for {full_name}"))?;
        Ok(commits.len() as u64)
    }
}

async fn ensure_success(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    anyhow::bail!("GitHub API returned {status}: {body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_token_trims_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.txt");
        std::fs::write(&path, "  ghp_secret\n").unwrap();
        assert_eq!(read_token(&path).unwrap(), "ghp_secret");
    }

    #[test]
    fn test_read_token_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.txt");
        std::fs::write(&path, "\n").unwrap();
        assert!(read_token(&path).is_err());
    }

    #[test]
    fn test_read_token_missing_file_names_path() {
        let err = read_token(Path::new("/nonexistent/token.txt")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/token.txt"));
    }

    #[test]
    fn test_new_strips_trailing_slash() {
        let client =
            GithubClient::new("http://localhost:1234/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://localhost:1234");
    }

    #[tokio::test]
    async fn test_offline_commits_are_zero() {
        let count = OfflineCommits
            .commits_since("a/b", Utc::now())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
